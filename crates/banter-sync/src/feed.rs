//! Change feed adapter: turns the store's raw per-table broadcast feeds
//! into one normalized [`ChangeEvent`] stream for a project.
//!
//! Guarantees it inherits from the store and passes through unchanged:
//! at-least-once delivery, no ordering, and no promise that a notified row
//! is still fetchable. What it adds: scope filtering, parse-or-drop
//! normalization, and paired resubscription — the message and reaction
//! subscriptions live and die together, never one without the other.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use banter_store::RemoteStore;
use banter_types::events::{ChangeEvent, ChangeOp, EntityKind, RawChange};

/// One item from the project feed. `Interrupted`/`Resubscribed` bracket a
/// gap during which notifications were silently lost; the session surfaces
/// that as a reconnecting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedItem {
    Event(ChangeEvent),
    Interrupted,
    Resubscribed,
}

/// The combined message+reaction change feed for one project. Runs until
/// the stream is dropped; a closed upstream triggers resubscription of both
/// feeds after `resubscribe_delay`.
pub fn project_feed<S: RemoteStore>(
    store: Arc<S>,
    project_id: Uuid,
    resubscribe_delay: Duration,
) -> impl Stream<Item = FeedItem> + Send {
    // Subscribe eagerly, before the stream is first polled, so callers can
    // rely on the subscription existing the moment this function returns.
    let initial = (
        store.subscribe_raw(EntityKind::Message),
        store.subscribe_raw(EntityKind::Reaction),
    );

    async_stream::stream! {
        let mut pending = Some(initial);
        loop {
            let (mut message_rx, mut reaction_rx) = match pending.take() {
                Some(pair) => pair,
                None => {
                    let pair = (
                        store.subscribe_raw(EntityKind::Message),
                        store.subscribe_raw(EntityKind::Reaction),
                    );
                    yield FeedItem::Resubscribed;
                    pair
                }
            };

            loop {
                let (kind, result) = tokio::select! {
                    r = message_rx.recv() => (EntityKind::Message, r),
                    r = reaction_rx.recv() => (EntityKind::Reaction, r),
                };

                match result {
                    Ok(raw) => {
                        if let Some(event) = normalize(kind, &raw, project_id) {
                            yield FeedItem::Event(event);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Place in the stream lost; the channel is still
                        // up. Missed notifications are an accepted loss.
                        warn!(%project_id, ?kind, missed = n, "change feed lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!(%project_id, ?kind, "change feed closed, resubscribing both feeds");
                        break;
                    }
                }
            }

            yield FeedItem::Interrupted;
            tokio::time::sleep(resubscribe_delay).await;
        }
    }
}

/// Parse and scope-filter one raw notification. Returns `None` for
/// anything that should not reach the reconciler; malformed payloads are
/// logged and dropped, never propagated.
fn normalize(kind: EntityKind, raw: &RawChange, project_id: Uuid) -> Option<ChangeEvent> {
    let event = match ChangeEvent::try_from(raw) {
        Ok(event) => event,
        Err(err) => {
            warn!(%project_id, %err, "dropping malformed feed payload");
            return None;
        }
    };

    if event.entity != kind {
        warn!(%project_id, ?kind, got = ?event.entity, "dropping cross-table feed payload");
        return None;
    }

    match event.op {
        ChangeOp::Insert => {
            // Inserts must carry the scope; deletes can't (the feed only
            // echoes the primary key) and are applied by id downstream.
            if event.project_id != Some(project_id) {
                debug!(entity = %event.entity_id, "dropping insert outside subscribed scope");
                return None;
            }
            Some(event)
        }
        ChangeOp::Delete => Some(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_store::mem::InMemoryStore;
    use banter_types::models::{NewMessage, NewProject};
    use futures_util::{StreamExt, pin_mut};
    use serde_json::json;

    async fn fixture() -> (Arc<InMemoryStore>, Uuid, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let user = store.add_profile("ana");
        let project_id = store
            .create_project(NewProject {
                title: "memes".into(),
                created_by: user.id,
            })
            .await
            .unwrap();
        (store, user.id, project_id)
    }

    #[tokio::test]
    async fn normalizes_store_writes_into_events() {
        let (store, user_id, project_id) = fixture().await;
        let feed = project_feed(store.clone(), project_id, Duration::from_millis(10));
        pin_mut!(feed);

        let id = store
            .insert_message(NewMessage {
                project_id,
                user_id,
                content: Some("hi".into()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();

        match feed.next().await.unwrap() {
            FeedItem::Event(event) => {
                assert_eq!(event.entity, EntityKind::Message);
                assert_eq!(event.op, ChangeOp::Insert);
                assert_eq!(event.entity_id, id);
            }
            other => panic!("unexpected feed item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn drops_malformed_and_out_of_scope_payloads() {
        let (store, user_id, project_id) = fixture().await;
        let feed = project_feed(store.clone(), project_id, Duration::from_millis(10));
        pin_mut!(feed);

        // Garbage payload.
        store.inject_raw(
            EntityKind::Message,
            RawChange {
                event: "TRUNCATE".into(),
                table: "messages".into(),
                record: json!({}),
            },
        );
        // Insert scoped to some other project.
        store.inject_raw(
            EntityKind::Message,
            RawChange {
                event: "INSERT".into(),
                table: "messages".into(),
                record: json!({
                    "id": Uuid::new_v4().to_string(),
                    "project_id": Uuid::new_v4().to_string(),
                }),
            },
        );
        // A real write follows; it must be the first thing we see.
        let id = store
            .insert_message(NewMessage {
                project_id,
                user_id,
                content: Some("real".into()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();

        match feed.next().await.unwrap() {
            FeedItem::Event(event) => assert_eq!(event.entity_id, id),
            other => panic!("unexpected feed item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unscoped_deletes_pass_through() {
        let (store, _, project_id) = fixture().await;
        let feed = project_feed(store.clone(), project_id, Duration::from_millis(10));
        pin_mut!(feed);

        let id = Uuid::new_v4();
        store.inject_raw(
            EntityKind::Reaction,
            RawChange {
                event: "DELETE".into(),
                table: "reactions".into(),
                record: json!({ "id": id.to_string() }),
            },
        );

        match feed.next().await.unwrap() {
            FeedItem::Event(event) => {
                assert_eq!(event.op, ChangeOp::Delete);
                assert_eq!(event.entity_id, id);
                assert_eq!(event.project_id, None);
            }
            other => panic!("unexpected feed item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resubscribes_both_feeds_after_closure() {
        let (store, user_id, project_id) = fixture().await;
        let feed = project_feed(store.clone(), project_id, Duration::from_millis(5));
        pin_mut!(feed);

        store.sever_feeds();
        assert_eq!(feed.next().await.unwrap(), FeedItem::Interrupted);
        assert_eq!(feed.next().await.unwrap(), FeedItem::Resubscribed);

        // Both halves of the fresh subscription deliver again.
        let message_id = store
            .insert_message(NewMessage {
                project_id,
                user_id,
                content: Some("back".into()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();
        store
            .insert_reaction(banter_types::models::NewReaction {
                message_id,
                user_id,
                emoji: banter_types::emoji::ReactionEmoji::ThumbsUp,
            })
            .await
            .unwrap();

        // Arrival order across the two receivers is not guaranteed.
        let mut kinds: Vec<EntityKind> = [feed.next().await.unwrap(), feed.next().await.unwrap()]
            .into_iter()
            .map(|item| match item {
                FeedItem::Event(event) => event.entity,
                other => panic!("unexpected feed item: {other:?}"),
            })
            .collect();
        kinds.sort_by_key(|k| *k as u8);
        assert_eq!(kinds, [EntityKind::Message, EntityKind::Reaction]);
    }

    #[tokio::test]
    async fn duplicate_notifications_are_delivered_twice() {
        // Deduplication is the reconciler's job (upsert-by-id); the adapter
        // must pass duplicates through rather than guess.
        let (store, _, project_id) = fixture().await;
        let feed = project_feed(store.clone(), project_id, Duration::from_millis(10));
        pin_mut!(feed);

        let raw = RawChange {
            event: "INSERT".into(),
            table: "messages".into(),
            record: json!({
                "id": Uuid::new_v4().to_string(),
                "project_id": project_id.to_string(),
            }),
        };
        store.inject_raw(EntityKind::Message, raw.clone());
        store.inject_raw(EntityKind::Message, raw);

        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!(first, second);
    }
}
