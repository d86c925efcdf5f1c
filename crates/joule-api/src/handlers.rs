//! Request handlers.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use joule_cluster::CpuQuantity;
use joule_strategies::WorkloadRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::state::ApiState;

type ApiResult = Result<Json<Value>, ApiError>;

const ERR_NODE_NONEXISTENT: &str = "specified node(s) does not exist";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TargetsPayload {
    targets: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Workload {
    name: String,
    status: String,
    submission_date: String,
    node_name: String,
    cpu_target: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PatchWorkloadRequest {
    #[serde(default)]
    pod_name: Option<String>,
    cpu_target: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Enabled {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RangeParams {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobScenarioEntry {
    #[serde(default)]
    job_name: Option<String>,
    job_length: u64,
    job_target: f64,
    workers_count: u32,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    min_job_target: Option<f64>,
}

fn success() -> Json<Value> {
    Json(json!({ "message": "success" }))
}

fn parse_rfc3339(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::validation(format!("invalid {field}: {e}")))
}

pub(crate) async fn get_targets(State(state): State<ApiState>) -> Json<Value> {
    let targets: HashMap<String, f64> = state
        .orchestrator()
        .targets()
        .iter()
        .map(|(node, cell)| (node.to_string(), cell.get()))
        .collect();
    Json(json!({ "targets": targets }))
}

pub(crate) async fn post_targets(
    State(state): State<ApiState>,
    Json(payload): Json<TargetsPayload>,
) -> ApiResult {
    let table = state.orchestrator().targets();
    let missing: Vec<String> = payload
        .targets
        .keys()
        .filter(|node| !table.contains(node))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::Validation {
            message: ERR_NODE_NONEXISTENT.to_string(),
            nodes: Some(missing),
        });
    }
    for (node, target) in &payload.targets {
        if let Some(cell) = table.get(node) {
            cell.set(*target);
        }
    }
    info!(count = payload.targets.len(), "targets updated");
    Ok(success())
}

pub(crate) async fn get_workloads(State(state): State<ApiState>) -> ApiResult {
    let orchestrator = state.orchestrator();
    let pods = orchestrator.cluster().list_pods().await?;
    let counts = orchestrator.metrics().cpu_counts().await?;
    let representative = orchestrator.targets();
    let fallback_cores = representative
        .representative_node()
        .and_then(|node| counts.get(node).copied())
        .unwrap_or(1);

    let workloads: Vec<Workload> = pods
        .iter()
        .map(|pod| {
            let cores = pod
                .node_name
                .as_deref()
                .and_then(|node| counts.get(node).copied())
                .unwrap_or(fallback_cores);
            let target = pod
                .cpu_limit
                .map_or(0.0, |limit| limit.to_percentage(cores));
            #[allow(clippy::cast_possible_truncation)]
            let cpu_target = target.round() as i64;
            Workload {
                name: pod.name.clone(),
                status: pod.phase.to_string(),
                submission_date: pod
                    .created_at
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
                node_name: pod.node_name.clone().unwrap_or_default(),
                cpu_target,
            }
        })
        .collect();
    Ok(Json(json!({ "workloads": workloads })))
}

pub(crate) async fn post_workloads(
    State(state): State<ApiState>,
    Json(payload): Json<WorkloadRequest>,
) -> ApiResult {
    state.orchestrator().add_workload(payload).await?;
    Ok(success())
}

pub(crate) async fn patch_workload(
    State(state): State<ApiState>,
    Json(payload): Json<PatchWorkloadRequest>,
) -> ApiResult {
    let Some(pod_name) = payload.pod_name.filter(|n| !n.is_empty()) else {
        return Err(ApiError::validation("podName must be specified"));
    };

    let orchestrator = state.orchestrator();
    let node = orchestrator
        .cluster()
        .pod_node_name(&pod_name)
        .await?
        .ok_or_else(|| {
            ApiError::validation("cannot set CPU limit for a pod that is not in Running state")
        })?;

    let counts = orchestrator.metrics().cpu_counts().await?;
    let cores = counts
        .get(&node)
        .copied()
        .ok_or_else(|| ApiError::Backend(format!("no core count for node {node}")))?;
    let limit = CpuQuantity::from_percentage(payload.cpu_target, cores);

    orchestrator.cluster().patch_cpu_limit(&pod_name, limit).await?;
    info!(pod = %pod_name, limit = %limit, "workload patched");
    Ok(success())
}

pub(crate) async fn delete_workloads_completed(State(state): State<ApiState>) -> ApiResult {
    let done = state
        .orchestrator()
        .cluster()
        .clear_completed_workloads()
        .await?;
    if done {
        Ok(success())
    } else {
        Ok(Json(json!({})))
    }
}

pub(crate) async fn delete_workloads_pending_last(State(state): State<ApiState>) -> ApiResult {
    let done = state
        .orchestrator()
        .cluster()
        .delete_last_pending_workload()
        .await?;
    if done {
        Ok(success())
    } else {
        Ok(Json(json!({})))
    }
}

pub(crate) async fn get_cpu_usage_by_range(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> ApiResult {
    let start = parse_rfc3339(&params.start, "start")?;
    let end = parse_rfc3339(&params.end, "end")?;
    let series = state
        .orchestrator()
        .metrics()
        .cpu_usage_range(start, end)
        .await?;
    Ok(Json(serde_json::to_value(series).unwrap_or_default()))
}

pub(crate) async fn get_current_cpu_diff(State(state): State<ApiState>) -> ApiResult {
    let series = state.orchestrator().metrics().current_cpu_diff().await?;
    Ok(Json(serde_json::to_value(series).unwrap_or_default()))
}

pub(crate) async fn get_self_driving(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "enabled": state.orchestrator().is_self_driving_enabled() }))
}

pub(crate) async fn put_self_driving(
    State(state): State<ApiState>,
    Json(payload): Json<Enabled>,
) -> ApiResult {
    if payload.enabled {
        state.orchestrator().start_self_driving().await;
    } else {
        state.orchestrator().stop_self_driving().await;
    }
    Ok(success())
}

pub(crate) async fn get_schedulable(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "enabled": state.orchestrator().is_schedulable_enabled() }))
}

pub(crate) async fn put_schedulable(
    State(state): State<ApiState>,
    Json(payload): Json<Enabled>,
) -> ApiResult {
    if payload.enabled {
        state.orchestrator().start_schedulable().await;
    } else {
        state.orchestrator().stop_schedulable().await;
    }
    Ok(success())
}

pub(crate) async fn get_tawa(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "enabled": state.orchestrator().is_tawa_enabled() }))
}

pub(crate) async fn put_tawa(
    State(state): State<ApiState>,
    Json(payload): Json<Enabled>,
) -> ApiResult {
    if payload.enabled {
        state.orchestrator().start_tawa().await;
    } else {
        state.orchestrator().stop_tawa().await;
    }
    Ok(success())
}

pub(crate) async fn get_automatic_job_spawn(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "enabled": state.orchestrator().is_automatic_job_spawn_enabled() }))
}

pub(crate) async fn put_automatic_job_spawn(
    State(state): State<ApiState>,
    Json(payload): Json<Enabled>,
) -> ApiResult {
    if payload.enabled {
        state.orchestrator().start_automatic_job_spawn().await;
    } else {
        state.orchestrator().stop_automatic_job_spawn().await;
    }
    Ok(success())
}

pub(crate) async fn post_job_scenario(
    State(state): State<ApiState>,
    Json(entries): Json<Vec<JobScenarioEntry>>,
) -> ApiResult {
    let mut created = Vec::with_capacity(entries.len());
    for entry in entries {
        let start_after = entry
            .start_date
            .as_deref()
            .map(|raw| parse_rfc3339(raw, "startDate"))
            .transpose()?;

        let name = state
            .orchestrator()
            .add_workload(WorkloadRequest {
                name: entry.job_name,
                cpu_target: entry.job_target,
                job_length: entry.job_length,
                cpu_count: entry.workers_count,
                start_after,
                min_cpu: entry.min_job_target,
                ..WorkloadRequest::default()
            })
            .await?;
        created.push(name);
    }
    Ok(Json(json!({ "message": "success", "jobs": created })))
}
