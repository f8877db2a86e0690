//! Reconciliation of fetched snapshots, realtime pushes and optimistic writes.

use chrono::{DateTime, Duration, TimeZone, Utc};

use coventure::store::{MESSAGE_CORRELATION_SECS, Store};
use coventure::types::{Application, ApplicationStatus, ChangeEvent, ChatMessage, Table};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

fn message(id: &str, content: &str, created_at: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        room_id: "room-1".to_string(),
        sender_id: "dave".to_string(),
        content: content.to_string(),
        created_at,
    }
}

fn pushed(msg: &ChatMessage) -> ChangeEvent {
    ChangeEvent::insert(Table::ChatMessages, serde_json::to_value(msg).unwrap())
}

fn ids(store: &Store) -> Vec<String> {
    store
        .messages_in("room-1")
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[test]
fn test_duplicate_push_is_idempotent() {
    let store = Store::new();
    let m1 = message("m1", "hello", at(0));

    assert!(store.ingest_push(&pushed(&m1)));
    assert!(!store.ingest_push(&pushed(&m1)));
    store.ingest_snapshot([m1.clone()]);

    assert_eq!(store.messages_in("room-1"), vec![m1]);
}

#[test]
fn test_order_converges_across_interleavings() {
    let m1 = message("m1", "first", at(1));
    let m2 = message("m2", "second", at(2));
    let m3 = message("m3", "third", at(3));

    // Each step is either a push or a one-row snapshot.
    let orders: [[(&ChatMessage, bool); 3]; 4] = [
        [(&m1, true), (&m2, true), (&m3, true)],
        [(&m3, true), (&m1, false), (&m2, true)],
        [(&m2, false), (&m3, true), (&m1, true)],
        [(&m3, false), (&m2, false), (&m1, false)],
    ];

    for order in orders {
        let store = Store::new();
        for (msg, as_push) in order {
            if as_push {
                store.ingest_push(&pushed(msg));
            } else {
                store.ingest_snapshot([msg.clone()]);
            }
        }
        assert_eq!(ids(&store), ["m1", "m2", "m3"]);
    }
}

#[test]
fn test_echo_before_confirm_shows_one_message() {
    let store = Store::new();
    let draft = message("temp-1", "hi there", at(0));
    store.apply_optimistic(draft, "temp-1");
    assert_eq!(ids(&store), ["temp-1"]);

    // The server stamps its own time; the echo lands before the insert returns.
    let server = message("m-real", "hi there", at(2));
    store.ingest_push(&pushed(&server));
    assert_eq!(ids(&store), ["m-real"]);

    store.confirm("temp-1", server.clone());
    assert_eq!(store.messages_in("room-1"), vec![server]);
}

#[test]
fn test_confirm_before_echo_shows_one_message() {
    let store = Store::new();
    store.apply_optimistic(message("temp-1", "hi there", at(0)), "temp-1");

    let server = message("m-real", "hi there", at(1));
    store.confirm("temp-1", server.clone());
    store.ingest_push(&pushed(&server));

    assert_eq!(store.messages_in("room-1"), vec![server]);
}

#[test]
fn test_identical_messages_each_reconcile_once() {
    let store = Store::new();
    store.apply_optimistic(message("temp-1", "ok", at(0)), "temp-1");
    store.apply_optimistic(message("temp-2", "ok", at(1)), "temp-2");

    let first = message("m1", "ok", at(1));
    store.ingest_push(&pushed(&first));
    // Seeing m1 again must not swallow the second placeholder.
    store.ingest_push(&pushed(&first));
    assert_eq!(ids(&store), ["m1", "temp-2"]);

    let second = message("m2", "ok", at(2));
    store.ingest_push(&pushed(&second));
    assert_eq!(ids(&store), ["m1", "m2"]);
}

#[test]
fn test_echo_outside_window_does_not_reconcile() {
    let store = Store::new();
    store.apply_optimistic(message("temp-1", "hi", at(0)), "temp-1");

    let late = message(
        "m-old",
        "hi",
        at(0) - Duration::seconds(MESSAGE_CORRELATION_SECS + 5),
    );
    store.ingest_push(&pushed(&late));

    assert_eq!(ids(&store), ["m-old", "temp-1"]);
}

#[test]
fn test_rollback_removes_placeholder() {
    let store = Store::new();
    let mut events = store.subscribe();
    store.apply_optimistic(message("temp-1", "lost", at(0)), "temp-1");
    assert!(store.rollback::<ChatMessage>("temp-1"));

    assert!(store.messages_in("room-1").is_empty());
    assert!(!store.rollback::<ChatMessage>("temp-1"));
    // One announcement for the placeholder, one for the rollback.
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_deleted_message_stays_deleted() {
    let store = Store::new();
    let m1 = message("m1", "oops", at(0));
    store.ingest_push(&pushed(&m1));
    store.ingest_push(&ChangeEvent::delete(
        Table::ChatMessages,
        serde_json::json!({ "id": "m1" }),
    ));

    // A stale snapshot taken before the delete must not resurrect it.
    store.ingest_snapshot([m1]);
    assert!(store.messages_in("room-1").is_empty());
}

fn application(id: &str, status: ApplicationStatus, created_at: DateTime<Utc>) -> Application {
    Application {
        id: id.to_string(),
        project_id: "p1".to_string(),
        applicant_id: "dave".to_string(),
        status,
        message: None,
        portfolio_url: None,
        linkedin_url: None,
        created_at,
        updated_at: created_at,
    }
}

#[test]
fn test_rejected_application_does_not_confirm_placeholder() {
    let store = Store::new();
    store.apply_optimistic(
        application("temp-1", ApplicationStatus::Pending, at(100)),
        "temp-1",
    );

    // An earlier, rejected application to the same project shows up in a snapshot.
    store.ingest_snapshot([application("a-old", ApplicationStatus::Rejected, at(0))]);

    let mut ids: Vec<String> = store
        .applications_by("dave")
        .into_iter()
        .map(|a| a.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["a-old", "temp-1"]);
    let active = store.active_application("p1", "dave").unwrap();
    assert_eq!(active.id, "temp-1");
    assert_eq!(active.status, ApplicationStatus::Pending);
}
