use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chatsync_messaging::{PresenceRecord, UserId};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/presence/:user", get(presence))
}

/// Unknown users report offline.
async fn presence(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Json<PresenceRecord> {
    let user_id = UserId::new(user);
    let record = state
        .client()
        .store()
        .presence(&user_id)
        .unwrap_or(PresenceRecord {
            user_id,
            online: false,
            last_seen: None,
        });
    Json(record)
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app, call};
    use chatsync_messaging::{DomainEvent, PresenceChange, UserId};

    #[tokio::test]
    async fn reports_known_and_unknown_users() {
        let (app, state, _server) = app().await;
        state
            .client()
            .store()
            .apply_event(DomainEvent::PresenceChanged(PresenceChange {
                user_id: UserId::new("u2"),
                online: true,
                last_seen: Some(42),
            }));

        let (_, body) = call(&app, "GET", "/presence/u2", None).await;
        assert_eq!(body["online"], true);
        assert_eq!(body["userId"], "u2");

        let (_, body) = call(&app, "GET", "/presence/ghost", None).await;
        assert_eq!(body["online"], false);
    }
}
