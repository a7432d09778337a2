//! Metric profile scraping.
//!
//! A metric profile is a list of PromQL templates. Each one is rendered with
//! the process environment plus `elapsed`, run as an instant query at the end
//! of the last job or as a range query over the whole job list, and every
//! sample becomes a [`Metric`] tagged with the job that was running at its
//! timestamp.

use std::{collections::BTreeMap, path::Path, sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use k8s_openapi::serde_json::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Metric, MetricContext, Prometheus, QueryValue};
use crate::error::{Error, Result};
use crate::utils::env_to_map;

pub const DEFAULT_STEP: Duration = Duration::from_secs(30);

// `{{.name}}` field references become plain `{{name}}` lookups
static FIELD_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\s*)\.([A-Za-z_])").expect("valid field reference pattern"));

/// One entry of a metric profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    pub query: String,
    pub metric_name: String,
    #[serde(default)]
    pub instant: bool,
}

/// Reads a YAML metric profile.
pub fn load_metric_profile(path: impl AsRef<Path>) -> Result<Vec<MetricQuery>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| Error::Io {
        context: format!("Error reading metric profile {}", path.display()),
        source: e,
    })?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// A benchmark job window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub job_config: Value,
}

/// The job running at `timestamp`: the first one, in list order, that had
/// not ended yet.
pub fn find_job(jobs: &[Job], timestamp: DateTime<Utc>) -> Option<&Job> {
    jobs.iter().find(|job| timestamp < job.end)
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub uuid: String,
    pub step: Duration,
    pub metadata: BTreeMap<String, Value>,
    pub metric_profile: Vec<MetricQuery>,
    /// Chronological; the scrape window spans the first start to the last end.
    pub jobs: Vec<Job>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            step: DEFAULT_STEP,
            metadata: BTreeMap::new(),
            metric_profile: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

/// Outcome of one metric profile entry.
#[derive(Debug)]
pub struct QueryResult {
    pub metric_name: String,
    pub query: String,
    pub datapoints: Result<Vec<Metric>>,
}

/// Renders a query template. Unknown variables render empty and HTML is not
/// escaped, PromQL label matchers stay as written.
pub fn render_query(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    let template = FIELD_REFERENCE.replace_all(template, "{{${1}${2}");
    handlebars
        .render_template(&template, vars)
        .map_err(|e| Error::Config(format!("Error rendering query {template}: {e}")))
}

impl Prometheus {
    /// Runs every query of the metric profile over the job window.
    ///
    /// A failing query does not stop the others; its error is kept in the
    /// matching [`QueryResult`].
    #[tracing::instrument(skip_all, fields(uuid = %config.uuid, queries = config.metric_profile.len()))]
    pub async fn scrape_jobs_metrics(&self, config: &ScrapeConfig) -> Result<Vec<QueryResult>> {
        let (Some(first), Some(last)) = (config.jobs.first(), config.jobs.last()) else {
            return Err(Error::Config("job list is empty".to_string()));
        };
        let (start, end) = (first.start, last.end);

        let mut vars = env_to_map();
        vars.insert(
            "elapsed".to_string(),
            format!("{}m", (end - start).num_minutes()),
        );

        let mut results = Vec::with_capacity(config.metric_profile.len());
        for entry in &config.metric_profile {
            let query = match render_query(&entry.query, &vars) {
                Ok(query) => query,
                Err(e) => {
                    results.push(QueryResult {
                        metric_name: entry.metric_name.clone(),
                        query: entry.query.clone(),
                        datapoints: Err(e),
                    });
                    continue;
                }
            };
            tracing::debug!(metric = %entry.metric_name, %query, instant = entry.instant, "scraping");

            let value = if entry.instant {
                self.query(&query, end).await
            } else {
                self.query_range(&query, start, end, config.step).await
            };
            let datapoints = match value {
                Ok(value) => self.datapoints(config, entry, &query, &value),
                Err(e) => Err(Error::Backend(format!("Error found with query {query}: {e}"))),
            };
            if let Err(e) = &datapoints {
                tracing::warn!("{e}");
            }
            results.push(QueryResult {
                metric_name: entry.metric_name.clone(),
                query,
                datapoints,
            });
        }
        Ok(results)
    }

    fn datapoints(
        &self,
        config: &ScrapeConfig,
        entry: &MetricQuery,
        query: &str,
        value: &QueryValue,
    ) -> Result<Vec<Metric>> {
        let context = MetricContext {
            uuid: config.uuid.clone(),
            query: query.to_string(),
            metric_name: entry.metric_name.clone(),
            metadata: config.metadata.clone(),
            ..Default::default()
        };
        let mut metrics = context.metrics(value).map_err(|e| {
            Error::Backend(format!("Error found parsing result from query {query}: {e}"))
        })?;
        for metric in &mut metrics {
            if let Some(job) = find_job(&config.jobs, metric.timestamp) {
                metric.job_name = job.name.clone();
                metric.job_config = job.job_config.clone();
            }
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus::PrometheusConfig;
    use chrono::TimeZone;
    use k8s_openapi::serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn jobs() -> Vec<Job> {
        vec![
            Job {
                name: "node-density".to_string(),
                start: at(1_700_000_000),
                end: at(1_700_000_600),
                job_config: json!({"jobIterations": 10}),
            },
            Job {
                name: "cluster-density".to_string(),
                start: at(1_700_000_600),
                end: at(1_700_001_800),
                job_config: json!({"jobIterations": 20}),
            },
        ]
    }

    async fn prometheus(server: &MockServer) -> Prometheus {
        Mock::given(method("GET"))
            .and(path("/api/v1/status/runtimeinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success", "data": {}})))
            .mount(server)
            .await;
        Prometheus::new(&PrometheusConfig {
            url: server.uri(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_render_query() {
        let vars = BTreeMap::from([
            ("elapsed".to_string(), "30m".to_string()),
            ("NS".to_string(), "perf".to_string()),
        ]);
        assert_eq!(
            render_query(r#"max_over_time(up{namespace="{{.NS}}"}[{{ .elapsed }}])"#, &vars).unwrap(),
            r#"max_over_time(up{namespace="perf"}[30m])"#
        );
        assert_eq!(render_query("rate(x[{{elapsed}}])", &vars).unwrap(), "rate(x[30m])");
        assert_eq!(render_query("a < b and {{.MISSING}}", &vars).unwrap(), "a < b and ");
        assert!(render_query("{{#if}}", &vars).is_err());
    }

    #[test]
    fn test_find_job() {
        let jobs = jobs();
        assert_eq!(find_job(&jobs, at(1_700_000_100)).unwrap().name, "node-density");
        assert_eq!(find_job(&jobs, at(1_700_000_600)).unwrap().name, "cluster-density");
        assert!(find_job(&jobs, at(1_700_002_000)).is_none());
        assert!(find_job(&[], at(0)).is_none());
    }

    #[test]
    fn test_load_metric_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("metrics.yml");
        std::fs::write(
            &file,
            "- query: up\n  metricName: up\n  instant: true\n- query: rate(x[2m])\n  metricName: xRate\n",
        )
        .unwrap();
        let profile = load_metric_profile(&file).unwrap();
        assert_eq!(profile.len(), 2);
        assert!(profile[0].instant);
        assert_eq!(profile[1].metric_name, "xRate");
        assert!(!profile[1].instant);

        let err = load_metric_profile(tmp.path().join("missing.yml")).unwrap_err();
        assert!(err.to_string().starts_with("Error reading metric profile"));
    }

    #[tokio::test]
    async fn test_scrape_requires_jobs() {
        let server = MockServer::start().await;
        let err = prometheus(&server)
            .await
            .scrape_jobs_metrics(&ScrapeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "job list is empty");
    }

    #[tokio::test]
    async fn test_scrape_jobs_metrics() {
        let server = MockServer::start().await;
        let prometheus = prometheus(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "count(kube_node_info)"))
            .and(query_param("time", "1700001800.000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": [
                    {"metric": {"__name__": "kube_node_info"}, "value": [1700001799, "6"]},
                ]},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .and(query_param("query", "rate(apiserver_request_total[30m])"))
            .and(query_param("start", "1700000000.000"))
            .and(query_param("step", "30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "matrix", "result": [
                    {"metric": {"verb": "GET"}, "values": [[1700000300, "1.5"], [1700000900, "NaN"]]},
                ]},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .and(query_param("query", "up{"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "unexpected end of input",
            })))
            .mount(&server)
            .await;

        let config = ScrapeConfig {
            uuid: "run-1".to_string(),
            metadata: BTreeMap::from([("platform".to_string(), json!("AWS"))]),
            metric_profile: vec![
                MetricQuery {
                    query: "up{".to_string(),
                    metric_name: "broken".to_string(),
                    instant: false,
                },
                MetricQuery {
                    query: "rate(apiserver_request_total[{{.elapsed}}])".to_string(),
                    metric_name: "apiRate".to_string(),
                    instant: false,
                },
                MetricQuery {
                    query: "count(kube_node_info)".to_string(),
                    metric_name: "nodeCount".to_string(),
                    instant: true,
                },
            ],
            jobs: jobs(),
            ..Default::default()
        };
        let results = prometheus.scrape_jobs_metrics(&config).await.unwrap();
        assert_eq!(results.len(), 3);

        let err = results[0].datapoints.as_ref().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error found with query up{: bad_data: unexpected end of input"
        );

        assert_eq!(results[1].query, "rate(apiserver_request_total[30m])");
        let range = results[1].datapoints.as_ref().unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].job_name, "node-density");
        assert_eq!(range[0].job_config["jobIterations"], 10);
        assert_eq!(range[0].value, 1.5);
        assert_eq!(range[1].job_name, "cluster-density");
        assert_eq!(range[1].value, 0.0);
        assert_eq!(range[1].uuid, "run-1");
        assert_eq!(range[1].metadata["platform"], "AWS");

        let instant = results[2].datapoints.as_ref().unwrap();
        assert_eq!(instant.len(), 1);
        assert_eq!(instant[0].metric_name, "nodeCount");
        assert_eq!(instant[0].job_name, "cluster-density");
        assert!(instant[0].labels.is_empty());
    }

    #[tokio::test]
    async fn test_scrape_unsupported_result() {
        let server = MockServer::start().await;
        let prometheus = prometheus(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "scalar", "result": [1700001800, "3"]},
            })))
            .mount(&server)
            .await;
        let config = ScrapeConfig {
            metric_profile: vec![MetricQuery {
                query: "scalar(up)".to_string(),
                metric_name: "s".to_string(),
                instant: true,
            }],
            jobs: jobs(),
            ..Default::default()
        };
        let results = prometheus.scrape_jobs_metrics(&config).await.unwrap();
        let err = results[0].datapoints.as_ref().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error found parsing result from query scalar(up): unsupported result format: scalar"
        );
    }
}
