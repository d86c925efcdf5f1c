//! HTTP client for the Prometheus query API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::error::{MetricsError, Result};
use crate::source::MetricsSource;
use crate::types::{InstantUsage, NodeAvgUsage, NodeCpuSeries};

const CPU_USAGE_QUERY: &str = "node_cpu_utilization";
const CPU_DIFF_QUERY: &str = "node_cpu_diff";
const CPU_COUNT_QUERY: &str = r#"count without(cpu, mode) (node_cpu_seconds_total{mode="idle"})"#;
const ENERGY_QUERY: &str = "fake_energy_consumption";

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(default)]
    result: Vec<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

fn sample_from(pair: &(f64, String)) -> Result<InstantUsage> {
    let usage: f64 = pair.1.parse().map_err(|_| MetricsError::BadSample {
        raw: pair.1.clone(),
    })?;
    #[allow(clippy::cast_possible_truncation)] // whole epoch seconds
    let secs = pair.0.trunc() as i64;
    let timestamp = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| MetricsError::BadSample {
            raw: pair.0.to_string(),
        })?;
    Ok(InstantUsage { timestamp, usage })
}

fn check(resp: ApiResponse) -> Result<ApiData> {
    if resp.status != "success" {
        return Err(MetricsError::BadResponse {
            message: resp.error.unwrap_or(resp.status),
        });
    }
    resp.data.ok_or_else(|| MetricsError::BadResponse {
        message: "missing data section".to_string(),
    })
}

fn instant_series(data: ApiData, label: &str) -> Result<Vec<NodeCpuSeries>> {
    let mut series = Vec::with_capacity(data.result.len());
    for entry in data.result {
        let Some(value) = entry.value.as_ref() else {
            continue;
        };
        let name = entry.metric.get(label).cloned().unwrap_or_default();
        series.push(NodeCpuSeries {
            node_name: name,
            data: vec![sample_from(value)?],
        });
    }
    Ok(series)
}

fn matrix_series(data: ApiData, label: &str) -> Result<Vec<NodeCpuSeries>> {
    let mut series = Vec::with_capacity(data.result.len());
    for entry in data.result {
        let name = entry.metric.get(label).cloned().unwrap_or_default();
        let mut samples = Vec::new();
        for pair in entry.values.unwrap_or_default() {
            samples.push(sample_from(&pair)?);
        }
        series.push(NodeCpuSeries {
            node_name: name,
            data: samples,
        });
    }
    Ok(series)
}

fn labeled_values(data: ApiData, label: &str) -> Result<HashMap<String, f64>> {
    let mut out = HashMap::new();
    for entry in data.result {
        let Some(value) = entry.value.as_ref() else {
            continue;
        };
        let name = entry.metric.get(label).cloned().unwrap_or_default();
        out.insert(name, sample_from(value)?.usage);
    }
    Ok(out)
}

/// Prometheus HTTP-API client.
#[derive(Debug, Clone)]
pub struct PromClient {
    base_url: String,
    http: reqwest::Client,
}

impl PromClient {
    /// Creates a client for the given base URL (e.g. `http://prom:9090`).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(QUERY_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn query(&self, query: &str) -> Result<ApiData> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp: ApiResponse = self
            .http
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await?
            .json()
            .await?;
        check(resp)
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ApiData> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let resp: ApiResponse = self
            .http
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", "1".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;
        check(resp)
    }

    /// Verifies the backend answers queries at all. Used at boot; a failure
    /// is fatal for the process.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable or unhealthy.
    pub async fn probe(&self) -> Result<()> {
        self.query("up").await.map(|_| ())
    }
}

#[async_trait]
impl MetricsSource for PromClient {
    async fn current_cpu_diff(&self) -> Result<Vec<NodeCpuSeries>> {
        let data = self.query(CPU_DIFF_QUERY).await?;
        instant_series(data, "instance")
    }

    async fn node_cpu_diff(&self, node: &str) -> Result<f64> {
        let query = format!("{CPU_DIFF_QUERY}{{instance=\"{node}\"}}");
        let data = self.query(&query).await?;
        let series = instant_series(data, "instance")?;
        series
            .first()
            .and_then(NodeCpuSeries::last_usage)
            .ok_or(MetricsError::NoData { query })
    }

    async fn avg_cpu_usage(&self, window_minutes: u32) -> Result<Vec<NodeAvgUsage>> {
        let query = format!("avg_over_time({CPU_USAGE_QUERY}[{window_minutes}m])");
        let data = self.query(&query).await?;
        Ok(labeled_values(data, "instance")?
            .into_iter()
            .map(|(node_name, avg)| NodeAvgUsage { node_name, avg })
            .collect())
    }

    async fn cpu_counts(&self) -> Result<HashMap<String, u32>> {
        let data = self.query(CPU_COUNT_QUERY).await?;
        let values = labeled_values(data, "instance")?;
        Ok(values
            .into_iter()
            .filter_map(|(node, count)| {
                if count < 1.0 {
                    warn!(node = %node, count, "implausible core count dropped");
                    return None;
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let cores = count.round() as u32;
                Some((node, cores))
            })
            .collect())
    }

    async fn current_energy_consumption(&self) -> Result<HashMap<String, f64>> {
        let data = self.query(ENERGY_QUERY).await?;
        labeled_values(data, "node_label")
    }

    async fn cpu_usage_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NodeCpuSeries>> {
        // Last second non-inclusive so adjacent windows do not overlap.
        let end = end - chrono::Duration::seconds(1);
        let data = self.query_range(CPU_USAGE_QUERY, start, end).await?;
        matrix_series(data, "instance")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ApiResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn parses_instant_vector() {
        let resp = parse(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"instance":"node-a"},"value":[1700000000.123,"4.5"]},
                {"metric":{"instance":"node-b"},"value":[1700000000.123,"-2.25"]}
            ]}}"#,
        );
        let series = instant_series(check(resp).unwrap(), "instance").unwrap();

        assert_eq!(series.len(), 2);
        let a = series.iter().find(|s| s.node_name == "node-a").unwrap();
        assert_eq!(a.last_usage(), Some(4.5));
        let b = series.iter().find(|s| s.node_name == "node-b").unwrap();
        assert_eq!(b.last_usage(), Some(-2.25));
    }

    #[test]
    fn parses_matrix() {
        let resp = parse(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"instance":"node-a"},"values":[[1700000000,"1.0"],[1700000001,"2.0"]]}
            ]}}"#,
        );
        let series = matrix_series(check(resp).unwrap(), "instance").unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].data.len(), 2);
        assert_eq!(series[0].last_usage(), Some(2.0));
    }

    #[test]
    fn parses_labeled_values() {
        let resp = parse(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"node_label":"L1"},"value":[1700000000,"163.47"]}
            ]}}"#,
        );
        let values = labeled_values(check(resp).unwrap(), "node_label").unwrap();
        assert!((values["L1"] - 163.47).abs() < 1e-9);
    }

    #[test]
    fn error_status_is_surfaced() {
        let resp = parse(r#"{"status":"error","error":"query too complex"}"#);
        let err = check(resp).unwrap_err();
        assert!(err.to_string().contains("query too complex"));
    }

    #[test]
    fn nan_sample_is_rejected_gracefully() {
        let resp = parse(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"instance":"node-a"},"value":[1700000000,"oops"]}
            ]}}"#,
        );
        let err = instant_series(check(resp).unwrap(), "instance").unwrap_err();
        assert!(matches!(err, MetricsError::BadSample { .. }));
    }
}
