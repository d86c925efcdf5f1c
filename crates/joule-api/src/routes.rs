//! Route configuration.

use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::routing::{delete, get, post};
use axum::Router;
use joule_metrics::MetricsHub;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    delete_workloads_completed, delete_workloads_pending_last, get_automatic_job_spawn,
    get_cpu_usage_by_range, get_current_cpu_diff, get_schedulable, get_self_driving, get_targets,
    get_tawa, get_workloads, patch_workload, post_job_scenario, post_targets, post_workloads,
    put_automatic_job_spawn, put_schedulable, put_self_driving, put_tawa,
};
use crate::state::ApiState;

/// Creates the `/api/v1` router.
///
/// `cors_permissive` opens the API to any origin, for dashboard
/// development against a locally running control plane.
pub fn create_router(state: ApiState, cors_permissive: bool) -> Router {
    let v1 = Router::new()
        .route("/targets", get(get_targets).post(post_targets))
        .route("/workloads", get(get_workloads).post(post_workloads))
        .route("/workload", axum::routing::patch(patch_workload))
        .route("/workloads/completed", delete(delete_workloads_completed))
        .route(
            "/workloads/pending/last",
            delete(delete_workloads_pending_last),
        )
        .route("/actualCpuUsageByRangeSeconds", get(get_cpu_usage_by_range))
        .route("/actualCpuDiff", get(get_current_cpu_diff))
        .route("/self-driving", get(get_self_driving).put(put_self_driving))
        .route("/tawa", get(get_tawa).put(put_tawa))
        .route("/schedulable", get(get_schedulable).put(put_schedulable))
        .route(
            "/automatic-job-spawn",
            get(get_automatic_job_spawn).put(put_automatic_job_spawn),
        )
        .route("/job-scenario", post(post_job_scenario));

    let mut router = Router::new()
        .nest("/api/v1", v1)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    router
}

/// Creates the metrics-exposition router served on the metrics port.
pub fn metrics_router(hub: Arc<MetricsHub>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let hub = Arc::clone(&hub);
            async move {
                (
                    [(CONTENT_TYPE, MetricsHub::content_type())],
                    hub.encode(),
                )
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use joule_cluster::{ClusterOps, FakeCluster, PodPhase, PodView};
    use joule_orchestrator::{Orchestrator, OrchestratorConfig};
    use joule_prom::{InMemoryMetrics, MetricsSource};
    use joule_pyzhm::{FixedPredictor, Predictor};
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct Rig {
        app: Router,
        cluster: Arc<FakeCluster>,
        hub: Arc<MetricsHub>,
    }

    fn make_rig() -> Rig {
        let cluster = Arc::new(FakeCluster::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        metrics.set_cpu_count("node-a", 8);

        let hub = Arc::new(MetricsHub::new(
            "cpu_target",
            &HashMap::from([("node-a".to_string(), 80.0)]),
        ));
        let orchestrator = Orchestrator::new(
            cluster.clone() as Arc<dyn ClusterOps>,
            metrics as Arc<dyn MetricsSource>,
            Arc::new(FixedPredictor::new(HashMap::new())) as Arc<dyn Predictor>,
            hub.targets(),
            hub.schedulable(),
            HashMap::new(),
            OrchestratorConfig::default(),
        );

        Rig {
            app: create_router(ApiState::new(orchestrator), false),
            cluster,
            hub,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn get_targets_returns_configured_nodes() {
        let rig = make_rig();
        let response = rig
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/targets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["targets"]["node-a"], 80.0);
    }

    #[tokio::test]
    async fn post_targets_updates_cells() {
        let rig = make_rig();
        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/targets",
                r#"{"targets":{"node-a":55.0}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!((rig.hub.targets().get("node-a").unwrap().get() - 55.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn post_targets_unknown_node_is_400_with_names() {
        let rig = make_rig();
        let response = rig
            .app
            .oneshot(json_request(
                "POST",
                "/api/v1/targets",
                r#"{"targets":{"node-z":55.0}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["nodes"][0], "node-z");
    }

    #[tokio::test]
    async fn post_workloads_admits_a_job() {
        let rig = make_rig();
        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/workloads",
                r#"{"cpuTarget":25,"jobLength":5,"cpuCount":4,"workloadType":"cpu"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rig.cluster.created_jobs().len(), 1);
    }

    #[tokio::test]
    async fn get_workloads_lists_pods_with_percent_targets() {
        let rig = make_rig();
        rig.cluster.push_pod(PodView {
            name: "stress-1".to_string(),
            node_name: Some("node-a".to_string()),
            phase: PodPhase::Running,
            created_at: Some(chrono::Utc::now()),
            started_at: Some(chrono::Utc::now()),
            cpu_limit: Some(joule_cluster::CpuQuantity::from_millis(2000)),
            min_cpu_percent: None,
        });

        let response = rig
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/workloads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["workloads"][0]["name"], "stress-1");
        // 2000m of 8 cores = 25%.
        assert_eq!(json["workloads"][0]["cpuTarget"], 25);
        assert_eq!(json["workloads"][0]["status"], "Running");
    }

    #[tokio::test]
    async fn patch_workload_requires_pod_name() {
        let rig = make_rig();
        let response = rig
            .app
            .oneshot(json_request("PATCH", "/api/v1/workload", r#"{"cpuTarget":30}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_workload_rejects_non_running_pod() {
        let rig = make_rig();
        rig.cluster.push_pod(PodView {
            name: "pending-1".to_string(),
            node_name: None,
            phase: PodPhase::Pending,
            created_at: None,
            started_at: None,
            cpu_limit: None,
            min_cpu_percent: None,
        });

        let response = rig
            .app
            .oneshot(json_request(
                "PATCH",
                "/api/v1/workload",
                r#"{"podName":"pending-1","cpuTarget":30}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_workload_converts_on_the_pods_node() {
        let rig = make_rig();
        rig.cluster.push_pod(PodView {
            name: "stress-1".to_string(),
            node_name: Some("node-a".to_string()),
            phase: PodPhase::Running,
            created_at: None,
            started_at: None,
            cpu_limit: Some(joule_cluster::CpuQuantity::from_millis(1000)),
            min_cpu_percent: None,
        });

        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/api/v1/workload",
                r#"{"podName":"stress-1","cpuTarget":50}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // 50% of 8 cores = 4000m.
        assert_eq!(
            rig.cluster.pod_cpu_limit("stress-1").unwrap().millis(),
            4000
        );
    }

    #[tokio::test]
    async fn toggle_round_trip() {
        let rig = make_rig();

        let response = rig
            .app
            .clone()
            .oneshot(json_request("PUT", "/api/v1/self-driving", r#"{"enabled":true}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = rig
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/self-driving")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["enabled"], true);
    }

    #[tokio::test]
    async fn usage_range_rejects_bad_dates() {
        let rig = make_rig();
        let response = rig
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/actualCpuUsageByRangeSeconds?start=yesterday&end=today")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn job_scenario_creates_deferred_jobs() {
        let rig = make_rig();
        let start = (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
        let body = format!(
            r#"[{{"jobName":"batch-1","jobLength":5,"jobTarget":20,"workersCount":2,"startDate":"{start}","minJobTarget":10}}]"#
        );

        let response = rig
            .app
            .clone()
            .oneshot(json_request("POST", "/api/v1/job-scenario", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let created = rig.cluster.created_jobs();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "batch-1");
        assert!(created[0].start_after.is_some());
        assert!((created[0].min_cpu_percent - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let rig = make_rig();
        let response = rig
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_router_serves_exposition() {
        let rig = make_rig();
        let response = metrics_router(rig.hub.clone())
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cpu_target"));
        assert!(text.contains("schedulable"));
    }
}
