use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::serde_json::Value;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    Stdev,
    P99,
    P95,
    P90,
    P50,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Stdev => "stdev",
            Aggregation::P99 => "99",
            Aggregation::P95 => "95",
            Aggregation::P90 => "90",
            Aggregation::P50 => "50",
        }
    }

    /// Reduces `values`; `None` when there is nothing to reduce.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let value = match self {
            Aggregation::Avg => values.iter().sum::<f64>() / n,
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Stdev => {
                let mean = values.iter().sum::<f64>() / n;
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
            }
            Aggregation::P99 => percentile(values, 99.0),
            Aggregation::P95 => percentile(values, 95.0),
            Aggregation::P90 => percentile(values, 90.0),
            Aggregation::P50 => percentile(values, 50.0),
        };
        Some(value)
    }
}

/// Nearest-rank percentile.
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "avg" => Aggregation::Avg,
            "max" => Aggregation::Max,
            "min" => Aggregation::Min,
            "stdev" => Aggregation::Stdev,
            "99" => Aggregation::P99,
            "95" => Aggregation::P95,
            "90" => Aggregation::P90,
            "50" => Aggregation::P50,
            other => return Err(Error::Config(format!("aggregation not supported: {other}"))),
        })
    }
}

/// `[unix seconds, "value"]` as sent by the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "(f64, String)")]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

impl TryFrom<(f64, String)> for SamplePair {
    type Error = String;

    fn try_from((timestamp, value): (f64, String)) -> Result<Self, Self::Error> {
        let value = value
            .parse::<f64>()
            .map_err(|e| format!("invalid sample value {value:?}: {e}"))?;
        Ok(Self { timestamp, value })
    }
}

impl SamplePair {
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt((self.timestamp * 1000.0) as i64)
            .single()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: SamplePair,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeSamples {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryValue {
    Vector(Vec<InstantSample>),
    Matrix(Vec<RangeSamples>),
    Scalar(SamplePair),
    String((f64, String)),
}

impl QueryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Vector(_) => "vector",
            QueryValue::Matrix(_) => "matrix",
            QueryValue::Scalar(_) => "scalar",
            QueryValue::String(_) => "string",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiResponse {
    pub status: String,
    pub data: Option<QueryValue>,
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub error: String,
}

/// One indexed datapoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub uuid: String,
    pub query: String,
    pub metric_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub job_name: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub job_config: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Context shared by the datapoints of one query.
#[derive(Debug, Clone, Default)]
pub struct MetricContext {
    pub uuid: String,
    pub query: String,
    pub metric_name: String,
    pub job_name: String,
    pub metadata: BTreeMap<String, Value>,
}

impl MetricContext {
    /// `__name__` is dropped from the labels and NaN is stored as 0.
    pub fn metric(&self, labels: &BTreeMap<String, String>, sample: &SamplePair) -> Metric {
        Metric {
            labels: labels
                .iter()
                .filter(|(k, _)| k.as_str() != "__name__")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            value: if sample.value.is_nan() { 0.0 } else { sample.value },
            uuid: self.uuid.clone(),
            query: self.query.clone(),
            metric_name: self.metric_name.clone(),
            job_name: self.job_name.clone(),
            job_config: Value::Null,
            timestamp: sample.time(),
            metadata: self.metadata.clone(),
        }
    }

    /// One document per sample of a vector or matrix result.
    pub fn metrics(&self, value: &QueryValue) -> Result<Vec<Metric>, Error> {
        match value {
            QueryValue::Vector(samples) => Ok(samples
                .iter()
                .map(|s| self.metric(&s.metric, &s.value))
                .collect()),
            QueryValue::Matrix(series) => Ok(series
                .iter()
                .flat_map(|s| s.values.iter().map(|v| self.metric(&s.metric, v)))
                .collect()),
            other => Err(Error::Backend(format!(
                "unsupported result format: {}",
                other.type_name()
            ))),
        }
    }
}
