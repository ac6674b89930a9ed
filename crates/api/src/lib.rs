//! `api` crate — HTTP trigger and status surface.
//!
//! Exposes:
//!   POST   /api/v1/workflows/{id}/executions
//!   GET    /api/v1/workflows/{id}/executions?limit=
//!   GET    /api/v1/workflows/{id}/stats
//!   GET    /api/v1/executions/{id}
//!   GET    /health

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use engine::WorkflowRunner;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
}

impl AppState {
    pub fn new(runner: Arc<WorkflowRunner>) -> Self {
        Self { runner }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/v1/workflows/:id/executions",
            post(handlers::executions::start).get(handlers::workflows::history),
        )
        .route("/api/v1/workflows/:id/stats", get(handlers::workflows::stats))
        .route("/api/v1/executions/:id", get(handlers::executions::get))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use engine::{BroadcastEventBus, InMemoryStore, WorkflowDefinition, Worker, WorkerConfig};
    use nodes::{ExecutorRegistry, NodeConfig};
    use queue::InMemoryJobQueue;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Fixture {
        app: Router,
        worker: Worker,
        workflow_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let definition = WorkflowDefinition::new(
            "welcome",
            [
                NodeConfig::new("start", "noop").with_next("tag"),
                NodeConfig::new("tag", "set").with_parameters(json!({ "values": { "welcomed": true } })),
            ],
        );
        let workflow_id = definition.id;
        store.insert_workflow(definition);

        let runner = Arc::new(WorkflowRunner::new(
            store.clone(),
            store,
            Arc::new(InMemoryJobQueue::default()),
            Arc::new(ExecutorRegistry::builder().with_builtins().build()),
            Arc::new(BroadcastEventBus::default()),
        ));
        Fixture {
            app: router(AppState::new(runner.clone())),
            worker: Worker::new(runner, WorkerConfig::default()),
            workflow_id,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    fn get_req(uri: String) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: String, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let f = fixture();
        let (status, body) = send(&f.app, get_req("/health".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn triggered_execution_can_be_inspected() {
        let f = fixture();
        let (status, body) = send(
            &f.app,
            post_json(
                format!("/api/v1/workflows/{}/executions", f.workflow_id),
                json!({ "payload": { "lead_id": 7 }, "triggered_by": "crm" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let execution_id = body["execution_id"].as_str().unwrap().to_owned();

        f.worker.run_until_idle(10).await;

        let (status, body) = send(&f.app, get_req(format!("/api/v1/executions/{execution_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["payload"], json!({ "lead_id": 7, "welcomed": true }));
        assert_eq!(body["triggered_by"], "crm");
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);

        let (status, body) = send(&f.app, get_req(format!("/api/v1/workflows/{}/stats", f.workflow_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completed"], 1);

        let (status, body) = send(
            &f.app,
            get_req(format!("/api/v1/workflows/{}/executions?limit=5", f.workflow_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let f = fixture();

        let (status, body) = send(
            &f.app,
            post_json(format!("/api/v1/workflows/{}/executions", Uuid::new_v4()), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let (status, _) = send(&f.app, get_req(format!("/api/v1/executions/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
