use crate::realtime::ConnectionPhase;
use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    build_id: String,
    connection: ConnectionPhase,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        build_id: state.build_id().to_string(),
        connection: state.client().status().phase,
    })
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app, call};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_build_and_phase() {
        let (app, _state, _server) = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["build_id"], "test-build");
        assert_eq!(body["connection"], "disconnected");
    }
}
