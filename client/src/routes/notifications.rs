use crate::state::AppState;
use axum::http::StatusCode;
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chatsync_messaging::{NotificationId, NotificationRecord};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub items: Vec<NotificationRecord>,
    pub unread: u32,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub unread: u32,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/unread", get(unread))
        .route("/notifications/read-all", post(read_all))
        .route("/notifications/:id", delete(remove))
}

async fn list(State(state): State<Arc<AppState>>) -> Json<NotificationsResponse> {
    Json(NotificationsResponse {
        items: state.client().get_notifications(),
        unread: state.client().get_unread_notification_count(),
    })
}

async fn unread(State(state): State<Arc<AppState>>) -> Json<UnreadResponse> {
    Json(UnreadResponse {
        unread: state.client().get_unread_notification_count(),
    })
}

async fn read_all(State(state): State<Arc<AppState>>) -> Json<UnreadResponse> {
    state.client().mark_all_notifications_read();
    Json(UnreadResponse {
        unread: state.client().get_unread_notification_count(),
    })
}

async fn remove(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    state.client().remove_notification(&NotificationId::new(id));
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app, call};
    use axum::http::StatusCode;
    use chatsync_messaging::DomainEvent;
    use serde_json::json;

    #[tokio::test]
    async fn counts_follow_housekeeping() {
        let (app, state, _server) = app().await;
        for (id, ts) in [("n1", 1), ("n2", 2)] {
            state
                .client()
                .store()
                .apply_event(DomainEvent::NotificationCreated(
                    serde_json::from_value(json!({ "id": id, "type": "like", "timestamp": ts }))
                        .unwrap(),
                ));
        }

        let (_, body) = call(&app, "GET", "/notifications", None).await;
        assert_eq!(body["unread"], 2);
        assert_eq!(body["items"][0]["id"], "n2");

        let (status, _) = call(&app, "DELETE", "/notifications/n2", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = call(&app, "GET", "/notifications/unread", None).await;
        assert_eq!(body["unread"], 1);

        let (_, body) = call(&app, "POST", "/notifications/read-all", None).await;
        assert_eq!(body["unread"], 0);
    }
}
