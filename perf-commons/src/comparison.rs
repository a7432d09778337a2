//! Checks a measured value against a baseline stored in Elasticsearch or
//! OpenSearch.

use std::{fmt, str::FromStr};

use k8s_openapi::serde_json::{self, json, Value};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::indexers::http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Min,
    Max,
    Avg,
    Sum,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stat::Min => "min",
            Stat::Max => "max",
            Stat::Avg => "avg",
            Stat::Sum => "sum",
        })
    }
}

impl FromStr for Stat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(Stat::Min),
            "max" => Ok(Stat::Max),
            "avg" => Ok(Stat::Avg),
            "sum" => Ok(Stat::Sum),
            other => Err(Error::Config(format!("stat not supported: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub avg: Option<f64>,
    #[serde(default)]
    pub sum: f64,
}

impl Stats {
    pub fn get(&self, stat: Stat) -> f64 {
        match stat {
            Stat::Min => self.min.unwrap_or_default(),
            Stat::Max => self.max.unwrap_or_default(),
            Stat::Avg => self.avg.unwrap_or_default(),
            Stat::Sum => self.sum,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    aggregations: Aggregations,
}

#[derive(Debug, Deserialize)]
struct Aggregations {
    stats: Stats,
}

/// Checks `value` against `baseline` with a tolerance in percent.
///
/// A positive tolerance bounds how far below the baseline the value may
/// fall; a negative one bounds how far above it may rise.
pub fn check_tolerance(value: f64, baseline: f64, tolerancy: i32) -> Result<String> {
    let t = f64::from(tolerancy);
    if tolerancy >= 0 {
        let limit = baseline * (100.0 - t) / 100.0;
        if value < limit {
            return Err(Error::Backend(format!(
                "with a tolerancy of {tolerancy}%: {value:.2} is {:.2}% lower than baseline: {baseline:.2}",
                100.0 - value * 100.0 / baseline
            )));
        }
    } else {
        let limit = baseline * (100.0 + t) / 100.0;
        if value > limit {
            return Err(Error::Backend(format!(
                "with a tolerancy of {tolerancy}%: {value:.2} is {:.2}% higher than baseline: {baseline:.2}",
                value * 100.0 / baseline - 100.0
            )));
        }
    }
    Ok(format!(
        "{value:2.0} meets {tolerancy}% tolerancy against {baseline:.2}"
    ))
}

#[derive(Debug, Clone)]
pub struct Comparator {
    transport: HttpTransport,
    index: String,
}

impl Comparator {
    pub fn new(transport: HttpTransport, index: impl Into<String>) -> Self {
        Self {
            transport,
            index: index.into(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn compare(
        &self,
        field: &str,
        query: &str,
        stat: Stat,
        value: f64,
        tolerancy: i32,
    ) -> Result<String> {
        let stats = self.query_string_stats(field, query).await?;
        check_tolerance(value, stats.get(stat), tolerancy)
    }

    /// `stats` aggregation of `field` over the documents matching `query`.
    pub async fn query_string_stats(&self, field: &str, query: &str) -> Result<Stats> {
        let body = json!({
            "size": 0,
            "query": {"query_string": {"query": query}},
            "aggs": {"stats": {"stats": {"field": field}}},
        });
        let response = self
            .transport
            .post_json(&format!("{}/_search", self.index), serde_json::to_vec(&body)?)
            .await?;
        let status = response.status();
        let text = response.text().await?;

        let parse_error = |e: serde_json::Error| {
            Error::Backend(format!("error parsing the response body: {e}"))
        };
        if !status.is_success() {
            let e: Value = serde_json::from_str(&text).map_err(parse_error)?;
            let field = |name: &str| {
                e.pointer(&format!("/error/{name}"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Err(Error::Backend(format!(
                "{status} {} {}",
                field("type"),
                field("reason")
            )));
        }
        let response: SearchResponse = serde_json::from_str(&text).map_err(parse_error)?;
        Ok(response.aggregations.stats)
    }
}
