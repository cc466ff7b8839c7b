//! HTTP control API and metrics endpoint.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bridge::Bridge;
use crate::connection::ws::ws_handler;
use crate::tasks::TaskDescriptor;

/// Control port: health, task submission and lookup, worker listing,
/// shutdown requests and the worker WebSocket.
pub fn control_routes(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/task", post(submit_task))
        .route("/task/{id}", get(get_task))
        .route("/containers", get(list_containers))
        .route("/containers/{id}/shutdown", post(shutdown_container))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(bridge)
}

/// Metrics port: Prometheus exposition only.
pub fn metrics_routes(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(bridge)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    Json(bridge.health().await)
}

// ── Tasks ───────────────────────────────────────────────────────────────

async fn submit_task(
    State(bridge): State<Arc<Bridge>>,
    Json(descriptor): Json<TaskDescriptor>,
) -> impl IntoResponse {
    if descriptor.task_type.trim().is_empty() || descriptor.language.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Task type and language are required"})),
        );
    }

    match bridge.submit_task(descriptor).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"taskId": task_id})),
        ),
        Err(e) => {
            error!(error = %e, "Failed to queue task");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to queue task"})),
            )
        }
    }
}

async fn get_task(State(bridge): State<Arc<Bridge>>, Path(id): Path<String>) -> impl IntoResponse {
    match bridge.task(&id).await {
        Some(task) => (StatusCode::OK, Json(serde_json::json!(task))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        ),
    }
}

// ── Containers ──────────────────────────────────────────────────────────

async fn list_containers(State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    Json(bridge.workers().await)
}

async fn shutdown_container(
    State(bridge): State<Arc<Bridge>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if bridge.shutdown_worker(&id).await {
        info!(container_id = %id, "Shutdown requested via API");
        (
            StatusCode::OK,
            Json(serde_json::json!({"status": "shutdown_requested", "containerId": id})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Container not found"})),
        )
    }
}

// ── Metrics ─────────────────────────────────────────────────────────────

async fn metrics(State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        bridge.render_metrics().await,
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::BridgeConfig;
    use crate::notify::CentralNotifier;
    use crate::store::LibSqlQueueStore;

    async fn test_bridge() -> Arc<Bridge> {
        let store = Arc::new(LibSqlQueueStore::new_memory().await.unwrap());
        Bridge::new(BridgeConfig::default(), store, CentralNotifier::disabled())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn submit_and_fetch_task() {
        let bridge = test_bridge().await;
        let app = control_routes(bridge);

        let response = app
            .clone()
            .oneshot(post_json(
                "/task",
                serde_json::json!({"type": "test", "language": "rust", "data": {"crate": "x"}, "priority": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let task_id = body_json(response).await["taskId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/task/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task = body_json(response).await;
        assert_eq!(task["id"], task_id.as_str());
        assert_eq!(task["status"], "pending");
        assert_eq!(task["priority"], 3);
        assert_eq!(task["data"]["crate"], "x");
    }

    #[tokio::test]
    async fn submit_without_language_is_rejected() {
        let app = control_routes(test_bridge().await);
        let response = app
            .oneshot(post_json(
                "/task",
                serde_json::json!({"type": "test", "language": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let app = control_routes(test_bridge().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/task/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let app = control_routes(test_bridge().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["containers"], 0);
        assert_eq!(body["activeTasks"], 0);
        assert_eq!(body["pendingTasks"], 0);
    }

    #[tokio::test]
    async fn shutdown_unknown_container_is_404() {
        let app = control_routes(test_bridge().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/containers/ghost/shutdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_gauges() {
        let bridge = test_bridge().await;
        bridge
            .submit_task(TaskDescriptor {
                task_type: "test".into(),
                data: serde_json::json!({}),
                language: "go".into(),
                priority: 0,
            })
            .await
            .unwrap();

        let response = metrics_routes(bridge)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("bridge_queue_depth"));
        assert!(text.contains("bridge_tasks{status=\"pending\"}"));
    }
}
