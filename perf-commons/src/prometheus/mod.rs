use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod scrape;
mod types;

pub use scrape::{
    find_job, load_metric_profile, render_query, Job, MetricQuery, QueryResult, ScrapeConfig, DEFAULT_STEP,
};
pub use types::{Aggregation, InstantSample, Metric, MetricContext, QueryValue, RangeSamples, SamplePair};
use types::ApiResponse;

const RUNTIME_INFO: &str = "api/v1/status/runtimeinfo";
const QUERY: &str = "api/v1/query";
const QUERY_RANGE: &str = "api/v1/query_range";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrometheusConfig {
    pub url: String,
    pub token: String,
    pub username: String,
    pub password: String,
    pub insecure_skip_verify: bool,
}

/// Prometheus HTTP API client. A bearer token takes precedence over basic
/// auth when both are configured.
#[derive(Debug, Clone)]
pub struct Prometheus {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    basic_auth: Option<(String, String)>,
}

fn unix_seconds(t: &DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

impl Prometheus {
    /// Builds the client and checks the server answers before returning it.
    #[tracing::instrument(skip_all, fields(url = %config.url))]
    pub async fn new(config: &PrometheusConfig) -> Result<Self> {
        let mut endpoint = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("invalid Prometheus URL {:?}: {e}", config.url)))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;

        let prometheus = Self {
            client,
            endpoint,
            token: Some(config.token.clone()).filter(|t| !t.is_empty()),
            basic_auth: Some((config.username.clone(), config.password.clone()))
                .filter(|(user, _)| !user.is_empty()),
        };
        prometheus.verify_connection().await?;
        Ok(prometheus)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| Error::Config(format!("invalid path {path}: {e}")))?;
        let builder = self.client.get(url);
        Ok(match (&self.token, &self.basic_auth) {
            (Some(token), _) => builder.bearer_auth(token),
            (None, Some((user, password))) => builder.basic_auth(user, Some(password)),
            (None, None) => builder,
        })
    }

    async fn verify_connection(&self) -> Result<()> {
        let response = self.request(RUNTIME_INFO)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "prometheus connection check failed: [{status}] {body}"
            )));
        }
        Ok(())
    }

    async fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<QueryValue> {
        let response = self.request(path)?.query(params).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let parsed: ApiResponse = match k8s_openapi::serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(Error::Backend(format!(
                    "[{status}] {}",
                    String::from_utf8_lossy(&body)
                )))
            }
        };
        if parsed.status != "success" {
            return Err(Error::Backend(format!("{}: {}", parsed.error_type, parsed.error)));
        }
        parsed
            .data
            .ok_or_else(|| Error::Backend("prometheus response without data".to_string()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryValue> {
        self.fetch(QUERY, &[("query", query.to_string()), ("time", unix_seconds(&time))])
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<QueryValue> {
        self.fetch(
            QUERY_RANGE,
            &[
                ("query", query.to_string()),
                ("start", unix_seconds(&start)),
                ("end", unix_seconds(&end)),
                ("step", format!("{}", step.as_secs_f64())),
            ],
        )
        .await
    }

    /// Runs a range query and reduces every sample of every series to one value.
    pub async fn query_range_aggregated(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        aggregation: &str,
    ) -> Result<f64> {
        let value = self.query_range(query, start, end, step).await?;
        let QueryValue::Matrix(series) = value else {
            return Err(Error::Backend(format!(
                "result format is not a range vector: {}",
                value.type_name()
            )));
        };
        let aggregation: Aggregation = aggregation.parse()?;
        let values: Vec<f64> = series
            .iter()
            .flat_map(|s| s.values.iter().map(|v| v.value))
            .collect();
        Ok(aggregation.apply(&values).unwrap_or_default())
    }
}
