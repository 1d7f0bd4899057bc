pub mod connection;
pub mod conversations;
pub mod health;
pub mod notifications;
pub mod presence;

use crate::realtime::RealtimeError;
use crate::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(connection::routes())
        .merge(conversations::routes())
        .merge(presence::routes())
        .merge(notifications::routes())
        .with_state(state)
}

/// The connection runtime could not take the request.
#[derive(Debug)]
pub struct ApiError(RealtimeError);

impl From<RealtimeError> for ApiError {
    fn from(err: RealtimeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::client::{ClientConfig, SyncClient};
    use crate::collaborators::StaticCredential;
    use crate::config::AppConfig;
    use crate::realtime::memory::{memory_pair, MemoryServer};
    use crate::realtime::RealtimeConfig;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub(crate) async fn app() -> (Router, Arc<AppState>, MemoryServer) {
        let config = AppConfig::from_lookup(|name| match name {
            "CHATSYNC_PUSH_URL" => Some("ws://push.test/ws".into()),
            "CHATSYNC_USER_ID" => Some("me".into()),
            "CHATSYNC_BUILD_ID" => Some("test-build".into()),
            _ => None,
        })
        .unwrap();
        let (connector, server) = memory_pair();
        let client = SyncClient::start(
            ClientConfig::new("me")
                .with_realtime(RealtimeConfig::default().with_presence_interval(None)),
            Arc::new(connector),
            Arc::new(StaticCredential::new(Some("token".into()))),
        )
        .await
        .unwrap();
        let state = AppState::new(config, client);
        (super::router(Arc::clone(&state)), state, server)
    }

    pub(crate) async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
