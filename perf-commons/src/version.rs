use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = env!("PERF_COMMONS_GIT_COMMIT");
const BUILD_EPOCH: &str = env!("PERF_COMMONS_BUILD_EPOCH");

pub fn build_date() -> Option<DateTime<Utc>> {
    BUILD_EPOCH
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

pub fn os_arch() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_date: String,
    pub os_arch: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_commit: GIT_COMMIT,
            build_date: build_date().map(|d| d.to_rfc3339()).unwrap_or_default(),
            os_arch: os_arch(),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)?;
        if !self.git_commit.is_empty() {
            write!(f, " ({})", self.git_commit)?;
        }
        if !self.build_date.is_empty() {
            write!(f, " built {}", self.build_date)?;
        }
        write!(f, " {}", self.os_arch)
    }
}
