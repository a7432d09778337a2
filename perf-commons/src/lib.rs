//! Shared building blocks for OpenShift/Kubernetes performance tooling:
//! cluster helpers, document indexers, Prometheus queries, baseline
//! comparison, SSH keys and cluster metadata discovery.

cfg_if::cfg_if! {
    if #[cfg(feature = "telemetry")] {
        pub use perf_commons_telemetry as logging;
    } else {
        pub mod log;
        pub use log as logging;
    }
}

pub mod comparison;
pub mod error;
pub mod indexers;
pub mod k8s;
pub mod ocp_metadata;
pub mod prometheus;
pub mod ssh;
pub mod utils;
pub mod version;

pub use error::{Error, Result};
