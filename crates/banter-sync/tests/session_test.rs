//! End-to-end session tests against the in-memory store: snapshot
//! hydration, optimistic sends, reaction toggles across clients, reply
//! tombstones, and the notify/fetch delete race.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use banter_store::RemoteStore;
use banter_store::mem::InMemoryStore;
use banter_sync::{Draft, ImageDraft, ProjectSession, SendError, SyncConfig};
use banter_types::emoji::ReactionEmoji;
use banter_types::events::{EntityKind, RawChange};
use banter_types::models::{NewMessage, NewProject, Profile};
use banter_types::view::{ReplyView, SessionPhase};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("banter_sync=debug,banter_store=debug")
        .with_test_writer()
        .try_init();
}

fn test_config() -> SyncConfig {
    SyncConfig {
        resubscribe_delay: Duration::from_millis(10),
        highlight_duration: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn fixture() -> (Arc<InMemoryStore>, Profile, uuid::Uuid) {
    let store = Arc::new(InMemoryStore::new());
    let ana = store.add_profile("ana");
    let project_id = store
        .create_project(NewProject {
            title: "memes".into(),
            created_by: ana.id,
        })
        .await
        .unwrap();
    (store, ana, project_id)
}

async fn open_live(
    store: Arc<InMemoryStore>,
    user: Profile,
    project_id: uuid::Uuid,
) -> ProjectSession {
    let session = ProjectSession::open(store, user, project_id, test_config());
    let mut view = session.watch_view();
    view.wait_for(|v| v.phase == SessionPhase::Live)
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn send_lands_in_everyones_view() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let bob = store.add_profile("bob");

    let ana_session = open_live(store.clone(), ana.clone(), project_id).await;
    let bob_session = open_live(store.clone(), bob, project_id).await;

    ana_session.send(Draft::text("first!")).await.unwrap();

    let mut bob_view = bob_session.watch_view();
    let view = bob_view
        .wait_for(|v| v.messages.len() == 1)
        .await
        .unwrap()
        .clone();
    assert_eq!(view.messages[0].content.as_deref(), Some("first!"));
    assert_eq!(view.messages[0].author.username, "ana");
    assert!(!view.messages[0].pending);

    // The sender's own copy is confirmed too, not a lingering placeholder.
    let mut ana_view = ana_session.watch_view();
    let view = ana_view
        .wait_for(|v| v.messages.len() == 1 && !v.messages[0].pending)
        .await
        .unwrap()
        .clone();
    assert_eq!(view.messages[0].author.username, "ana");

    ana_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn snapshot_hydrates_existing_history() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;

    for text in ["one", "two", "three"] {
        store
            .insert_message(NewMessage {
                project_id,
                user_id: ana.id,
                content: Some(text.into()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();
    }

    let session = open_live(store, ana, project_id).await;
    let view = session.view();
    let contents: Vec<_> = view
        .messages
        .iter()
        .map(|m| m.content.as_deref().unwrap())
        .collect();
    assert_eq!(contents, ["one", "two", "three"]);
    session.close().await;
}

#[tokio::test]
async fn reaction_toggle_converges_across_clients() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let bob = store.add_profile("bob");

    let ana_session = open_live(store.clone(), ana.clone(), project_id).await;
    let bob_session = open_live(store.clone(), bob, project_id).await;

    ana_session.send(Draft::text("rate this")).await.unwrap();
    let mut bob_view = bob_session.watch_view();
    let message_id = bob_view
        .wait_for(|v| v.messages.len() == 1)
        .await
        .unwrap()
        .messages[0]
        .id;

    bob_session
        .react(message_id, ReactionEmoji::Fire)
        .await
        .unwrap();

    // Bob sees his own reaction flagged as his.
    let view = bob_view
        .wait_for(|v| {
            v.message(message_id)
                .is_some_and(|m| !m.reactions.is_empty())
        })
        .await
        .unwrap()
        .clone();
    let agg = &view.message(message_id).unwrap().reactions[0];
    assert_eq!(agg.emoji, ReactionEmoji::Fire);
    assert_eq!(agg.count, 1);
    assert!(agg.reacted_by_me);

    // Ana sees the same rollup, but not as hers.
    let mut ana_view = ana_session.watch_view();
    let view = ana_view
        .wait_for(|v| {
            v.message(message_id)
                .is_some_and(|m| !m.reactions.is_empty())
        })
        .await
        .unwrap()
        .clone();
    assert!(!view.message(message_id).unwrap().reactions[0].reacted_by_me);

    // Second toggle removes it everywhere.
    bob_session
        .react(message_id, ReactionEmoji::Fire)
        .await
        .unwrap();
    bob_view
        .wait_for(|v| v.message(message_id).is_some_and(|m| m.reactions.is_empty()))
        .await
        .unwrap();
    ana_view
        .wait_for(|v| v.message(message_id).is_some_and(|m| m.reactions.is_empty()))
        .await
        .unwrap();

    ana_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn deleting_a_quoted_message_leaves_a_tombstone() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let bob = store.add_profile("bob");

    let ana_session = open_live(store.clone(), ana.clone(), project_id).await;
    let bob_session = open_live(store.clone(), bob, project_id).await;

    ana_session.send(Draft::text("hot take")).await.unwrap();
    let mut bob_view = bob_session.watch_view();
    let target_id = bob_view
        .wait_for(|v| v.messages.len() == 1)
        .await
        .unwrap()
        .messages[0]
        .id;

    bob_session.set_reply_target(Some(target_id)).await;
    bob_session.send(Draft::text("disagree")).await.unwrap();

    let view = bob_view
        .wait_for(|v| v.messages.len() == 2 && !v.messages[1].pending)
        .await
        .unwrap()
        .clone();
    let reply_id = view.messages[1].id;
    assert!(matches!(
        view.messages[1].reply,
        Some(ReplyView::Quoted(ref snap)) if snap.message_id == target_id
    ));

    ana_session.delete(target_id).await.unwrap();

    let view = bob_view
        .wait_for(|v| v.messages.len() == 1)
        .await
        .unwrap()
        .clone();
    assert_eq!(view.messages[0].id, reply_id);
    assert!(matches!(view.messages[0].reply, Some(ReplyView::Tombstone)));

    ana_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn reply_target_on_the_draft_itself_is_honored() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let session = open_live(store.clone(), ana, project_id).await;

    session.send(Draft::text("quote me")).await.unwrap();
    let mut view = session.watch_view();
    let target_id = view
        .wait_for(|v| v.messages.iter().any(|m| !m.pending))
        .await
        .unwrap()
        .messages[0]
        .id;

    // No set_reply_target call; the draft carries the target directly.
    let draft = Draft {
        content: Some("quoting".into()),
        image: None,
        reply_to: Some(target_id),
    };
    session.send(draft).await.unwrap();

    let view = view
        .wait_for(|v| v.messages.len() == 2 && v.messages.iter().all(|m| !m.pending))
        .await
        .unwrap()
        .clone();
    assert!(matches!(
        view.messages[1].reply,
        Some(ReplyView::Quoted(ref snap)) if snap.message_id == target_id
    ));

    session.close().await;
}

#[tokio::test]
async fn insert_notification_for_a_vanished_row_is_a_no_op() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let session = open_live(store.clone(), ana.clone(), project_id).await;

    // Stage the race: the row is gone by the time the notification's
    // hydration fetch runs.
    let ghost = uuid::Uuid::new_v4();
    store.inject_raw(
        EntityKind::Message,
        RawChange {
            event: "INSERT".into(),
            table: "messages".into(),
            record: serde_json::json!({
                "id": ghost.to_string(),
                "project_id": project_id.to_string(),
            }),
        },
    );

    // A real send afterwards proves the pipeline is still healthy.
    session.send(Draft::text("still here")).await.unwrap();
    let mut view = session.watch_view();
    let view = view
        .wait_for(|v| v.messages.iter().any(|m| !m.pending))
        .await
        .unwrap()
        .clone();
    assert_eq!(view.messages.len(), 1);
    assert!(view.message(ghost).is_none());

    session.close().await;
}

#[tokio::test]
async fn failed_image_upload_returns_the_draft() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let session = open_live(store.clone(), ana, project_id).await;

    store.set_fail_uploads(true);
    let draft = Draft {
        content: Some("look at this".into()),
        image: Some(ImageDraft {
            file_name: "cat.png".into(),
            bytes: Bytes::from_static(b"png"),
        }),
        reply_to: None,
    };

    let failure = session.send(draft).await.unwrap_err();
    assert!(matches!(failure.error, SendError::UploadFailed(_)));
    assert_eq!(failure.draft.content.as_deref(), Some("look at this"));
    assert!(failure.draft.image.is_some());

    // The optimistic placeholder was rolled back.
    let mut view = session.watch_view();
    let view = view
        .wait_for(|v| v.messages.is_empty())
        .await
        .unwrap()
        .clone();
    assert!(view.messages.is_empty());

    session.close().await;
}

#[tokio::test]
async fn lost_feed_surfaces_reconnecting_then_recovers() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    // Generous resubscribe delay so the transient Reconnecting phase is
    // reliably observable through the watch channel.
    let config = SyncConfig {
        resubscribe_delay: Duration::from_millis(200),
        ..test_config()
    };
    let session = ProjectSession::open(store.clone(), ana, project_id, config);
    let mut view = session.watch_view();
    view.wait_for(|v| v.phase == SessionPhase::Live)
        .await
        .unwrap();

    store.sever_feeds();
    view.wait_for(|v| v.phase == SessionPhase::Reconnecting)
        .await
        .unwrap();
    view.wait_for(|v| v.phase == SessionPhase::Live)
        .await
        .unwrap();

    // The fresh subscription carries traffic again.
    session.send(Draft::text("still alive")).await.unwrap();
    view.wait_for(|v| v.messages.iter().any(|m| !m.pending))
        .await
        .unwrap();

    session.close().await;
}

#[tokio::test]
async fn closing_a_session_isolates_it_from_the_next_one() {
    init_tracing();
    let (store, ana, project_id) = fixture().await;
    let other_project = store
        .create_project(NewProject {
            title: "general".into(),
            created_by: ana.id,
        })
        .await
        .unwrap();

    let first = open_live(store.clone(), ana.clone(), project_id).await;
    let view_rx = first.watch_view();

    // The notification lands just as the session is torn down, so its
    // hydration fetch is still in flight when the loop exits.
    let late_id = store
        .insert_message(NewMessage {
            project_id,
            user_id: ana.id,
            content: Some("wrong room".into()),
            image_url: None,
            reply_to: None,
        })
        .await
        .unwrap();
    first.close().await;
    assert_eq!(view_rx.borrow().phase, SessionPhase::Closed);

    // Switching projects means a fresh session; the late hydration can
    // only re-enter through the closed session's own dead queue.
    let second = open_live(store.clone(), ana.clone(), other_project).await;
    second.send(Draft::text("right room")).await.unwrap();

    let mut view = second.watch_view();
    let view = view
        .wait_for(|v| v.messages.iter().any(|m| !m.pending))
        .await
        .unwrap()
        .clone();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].content.as_deref(), Some("right room"));
    assert!(view.message(late_id).is_none());

    // The old watch stays terminal.
    assert_eq!(view_rx.borrow().phase, SessionPhase::Closed);

    second.close().await;
}
