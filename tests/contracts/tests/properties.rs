use chatsync_client::realtime::ConnectionPhase;
use chatsync_client::storage::SyncStore;
use chatsync_contracts::{harness, message, message_json, quiet_realtime, settle, wait_for};
use chatsync_messaging::{ChannelKey, ConversationId, DomainEvent};
use serde_json::json;
use std::time::Duration;

fn c(id: &str) -> ConversationId {
    ConversationId::new(id)
}

#[tokio::test(start_paused = true)]
async fn duplicate_pushes_apply_once() {
    let mut h = harness(quiet_realtime()).await;
    let session = h.go_live(2).await;

    session.send_event("MessageCreated", message_json("m1", "c1", 100));
    session.send_event("MessageCreated", message_json("m1", "c1", 100));
    settle().await;

    assert_eq!(h.client.get_messages(&c("c1")), vec![message("m1", "c1", 100)]);
    assert_eq!(h.client.get_conversations()[0].unread_count, 1);
}

#[test]
fn pulled_page_never_overwrites_an_equal_or_newer_push() {
    let store = SyncStore::default();
    store.apply_event(DomainEvent::MessageCreated(message("m1", "42", 100)));

    let mut stale = message("m1", "42", 100);
    stale.content = "stale copy".into();
    let mut older = message("m1", "42", 80);
    older.content = "older copy".into();
    store.apply_pulled_page(&c("42"), vec![stale, older, message("m0", "42", 90)], false);

    let cached = store.messages(&c("42"));
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].id.as_str(), "m0");
    assert_eq!(cached[1], message("m1", "42", 100));
    assert!(!store.has_more_messages(&c("42")));
}

#[test]
fn unread_resets_only_through_mark_read() {
    let store = SyncStore::default();
    for (id, ts) in [("m1", 10), ("m2", 20), ("m3", 30)] {
        store.apply_event(DomainEvent::MessageCreated(message(id, "c1", ts)));
    }

    let mut remote = store.conversation(&c("c1")).unwrap();
    remote.unread_count = 0;
    store.apply_event(DomainEvent::ConversationUpdated(remote));
    store.apply_event(DomainEvent::MessageDeleted(
        serde_json::from_value(json!({ "id": "m3", "conversationId": "c1" })).unwrap(),
    ));
    store.apply_pulled_page(&c("c1"), vec![message("m0", "c1", 5)], false);
    assert_eq!(store.conversation(&c("c1")).unwrap().unread_count, 3);

    store.mark_conversation_read(&c("c1"));
    store.mark_conversation_read(&c("c1"));
    assert_eq!(store.conversation(&c("c1")).unwrap().unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn focused_conversation_does_not_accumulate_unread() {
    let mut h = harness(quiet_realtime()).await;
    let session = h.go_live(2).await;
    h.client.focus(Some(c("c1"))).await.unwrap();
    settle().await;

    session.send_event("MessageCreated", message_json("m1", "c1", 100));
    session.send_event("MessageCreated", message_json("m2", "c2", 100));
    settle().await;

    let unread = |id: &str| {
        h.client
            .store()
            .conversation(&c(id))
            .map(|conversation| conversation.unread_count)
    };
    assert_eq!(unread("c1"), Some(0));
    assert_eq!(unread("c2"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn channels_are_rejoined_after_reconnect() {
    let mut h = harness(quiet_realtime()).await;
    h.client.open_conversation(&c("c1")).await.unwrap();
    let session = h.go_live(3).await;

    drop(session);
    wait_for(&h.client, |s| s.phase == ConnectionPhase::Reconnecting).await;

    let mut session = h.server.accept().await.unwrap();
    let mut joined = session.handshake(3).await.unwrap();
    joined.sort();
    assert_eq!(
        joined,
        vec![
            ChannelKey::user_inbox("me"),
            ChannelKey::conversation("c1"),
            ChannelKey::Presence,
        ]
    );
    wait_for(&h.client, |s| s.phase == ConnectionPhase::Live).await;

    let typing = json!({ "conversationId": "c1", "userId": "u2", "isTyping": true });
    session.send_event_on(&ChannelKey::conversation("c1"), "TypingChanged", typing);
    settle().await;

    assert_eq!(h.client.get_typing_indicators(&c("c1")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unfocused_conversations_are_not_rejoined() {
    let mut h = harness(quiet_realtime()).await;
    h.client.focus(Some(c("c1"))).await.unwrap();
    h.client.focus(Some(c("c2"))).await.unwrap();
    h.client.focus(None).await.unwrap();
    assert_eq!(h.client.store().focused(), None);

    h.client.connect().await.unwrap();
    let mut session = h.server.accept().await.unwrap();
    let mut joined = session.handshake(2).await.unwrap();
    joined.sort();
    assert_eq!(joined, vec![ChannelKey::user_inbox("me"), ChannelKey::Presence]);

    let status = wait_for(&h.client, |s| s.phase == ConnectionPhase::Live).await;
    assert!(status.pending_channels.is_empty());
    settle().await;
    assert!(session.drain_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_focus_leaves_the_previous_conversation() {
    let mut h = harness(quiet_realtime()).await;
    let mut session = h.go_live(2).await;

    h.client.focus(Some(c("c1"))).await.unwrap();
    let join = session.next_frame().await.unwrap();
    assert_eq!(join.destination_channel, "join");
    assert_eq!(join.body["channel"], "conversation:c1");
    session.ack_join(&ChannelKey::conversation("c1"));

    h.client.focus(Some(c("c2"))).await.unwrap();
    let join = session.next_frame().await.unwrap();
    assert_eq!(join.destination_channel, "join");
    assert_eq!(join.body["channel"], "conversation:c2");
    let leave = session.next_frame().await.unwrap();
    assert_eq!(leave.destination_channel, "leave");
    assert_eq!(leave.body["channel"], "conversation:c1");
    assert_eq!(h.client.store().focused(), Some(c("c2")));
}

#[tokio::test(start_paused = true)]
async fn typing_delayed_by_a_disconnect_is_not_sent() {
    let mut h = harness(quiet_realtime()).await;
    let session = h.go_live(2).await;
    h.client.disconnect().await.unwrap();
    drop(session);

    h.client.send_typing_start(&c("c1")).await;
    h.client.mark_read(&c("c2")).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let mut session = h.go_live(2).await;
    let first = session.next_frame().await.unwrap();
    assert_eq!(first.destination_channel, "conversation:c2/read");

    h.client.send_typing_stop(&c("c1")).await;
    let next = session.next_frame().await.unwrap();
    assert_eq!(next.destination_channel, "conversation:c1/typing");
    assert_eq!(next.body["isTyping"], false);
    assert!(h.client.intents().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires_without_a_stop_event() {
    let mut h = harness(quiet_realtime()).await;
    let mut session = h.go_live(2).await;

    let typing = json!({ "conversationId": "c1", "userId": "u2", "isTyping": true });
    session.send_event("TypingChanged", typing);
    settle().await;
    assert_eq!(h.client.get_typing_indicators(&c("c1")).len(), 1);

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(700)).await;
        session.heartbeat();
    }
    assert!(h.client.get_typing_indicators(&c("c1")).is_empty());
    assert!(session.drain_frames().is_empty());
}
