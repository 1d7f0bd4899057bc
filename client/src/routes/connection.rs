use super::ApiError;
use crate::realtime::ConnectionStatus;
use crate::state::AppState;
use axum::http::StatusCode;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::info;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(state.client().status())
}

async fn connect(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ConnectionStatus>), ApiError> {
    info!("connect requested");
    state.client().connect().await?;
    Ok((StatusCode::ACCEPTED, Json(state.client().status())))
}

async fn disconnect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    info!("disconnect requested");
    state.client().disconnect().await?;
    Ok(Json(state.client().status()))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app, call};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn connect_then_disconnect() {
        let (app, _state, mut server) = app().await;

        let (status, _) = call(&app, "POST", "/connect", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let _session = server.accept().await.unwrap();

        let (status, body) = call(&app, "POST", "/disconnect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "disconnected");
        assert_eq!(body["attempt"], 0);

        let (_, body) = call(&app, "GET", "/status", None).await;
        assert_eq!(body["phase"], "disconnected");
        assert_eq!(body["authRequired"], false);
    }
}
