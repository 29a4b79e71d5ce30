//! In-memory reference implementation of [`RemoteStore`].
//!
//! Backs the integration tests and the smoke binary. Feed behavior mirrors
//! the real thing: writes commit first, then a `RawChange` naming only the
//! row identity goes out on a broadcast channel, and subscribers fetch the
//! full row afterwards. Test helpers can inject arbitrary raw events and
//! make rows vanish without a notification to stage the notify/fetch race.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use banter_types::events::{EntityKind, RawChange};
use banter_types::models::{
    FullMessage, FullReaction, Message, NewMessage, NewProject, NewReaction, Profile, Project,
    ProjectSnapshot, Reaction, ReplySnapshot,
};

use crate::error::{MAX_IMAGE_BYTES, StoreError, UploadError};
use crate::RemoteStore;

const FEED_CAPACITY: usize = 1024;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Default)]
struct Inner {
    profiles: HashMap<Uuid, Profile>,
    projects: HashMap<Uuid, Project>,
    messages: HashMap<Uuid, Message>,
    reactions: HashMap<Uuid, Reaction>,
    blobs: HashMap<String, Bytes>,
}

impl Inner {
    fn username(&self, user_id: Uuid) -> String {
        self.profiles
            .get(&user_id)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn profile(&self, user_id: Uuid) -> Profile {
        self.profiles.get(&user_id).cloned().unwrap_or(Profile {
            id: user_id,
            username: "unknown".to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        })
    }

    fn reply_snapshot(&self, target_id: Uuid) -> Option<ReplySnapshot> {
        let target = self.messages.get(&target_id)?;
        Some(ReplySnapshot {
            message_id: target.id,
            author_username: self.username(target.user_id),
            content: target.content.clone(),
            image_url: target.image_url.clone(),
        })
    }

    fn full_message(&self, row: &Message) -> FullMessage {
        FullMessage {
            message: row.clone(),
            author: self.profile(row.user_id),
            reply_to: row.reply_to.and_then(|t| self.reply_snapshot(t)),
        }
    }

    fn full_reaction(&self, row: &Reaction) -> FullReaction {
        FullReaction {
            reaction: row.clone(),
            username: self.username(row.user_id),
        }
    }
}

struct Feeds {
    message_tx: broadcast::Sender<RawChange>,
    reaction_tx: broadcast::Sender<RawChange>,
    project_tx: broadcast::Sender<RawChange>,
}

impl Feeds {
    fn fresh() -> Self {
        let (message_tx, _) = broadcast::channel(FEED_CAPACITY);
        let (reaction_tx, _) = broadcast::channel(FEED_CAPACITY);
        let (project_tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            message_tx,
            reaction_tx,
            project_tx,
        }
    }
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
    feeds: Mutex<Feeds>,
    fail_uploads: AtomicBool,
    fail_message_inserts: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            feeds: Mutex::new(Feeds::fresh()),
            fail_uploads: AtomicBool::new(false),
            fail_message_inserts: AtomicBool::new(false),
        }
    }

    fn emit(&self, pick: impl FnOnce(&Feeds) -> &broadcast::Sender<RawChange>, raw: RawChange) {
        if let Ok(feeds) = self.feeds.lock() {
            let _ = pick(&feeds).send(raw);
        }
    }

    fn with_inner<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Inner) -> Result<T, StoreError>,
    {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        f(&mut inner)
    }

    // -- Seeding / test helpers --

    pub fn add_profile(&self, username: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        };
        if let Ok(mut inner) = self.inner.lock() {
            inner.profiles.insert(profile.id, profile.clone());
        }
        profile
    }

    /// Push a raw event onto a feed without touching any rows. Used to
    /// exercise duplicate and malformed notification handling.
    pub fn inject_raw(&self, entity: EntityKind, raw: RawChange) {
        self.emit(
            |feeds| match entity {
                EntityKind::Message => &feeds.message_tx,
                EntityKind::Reaction => &feeds.reaction_tx,
            },
            raw,
        );
    }

    /// Drop every live feed subscription, as a lost realtime connection
    /// would. Existing receivers see `Closed`; fresh subscriptions attach
    /// to new channels.
    pub fn sever_feeds(&self) {
        if let Ok(mut feeds) = self.feeds.lock() {
            *feeds = Feeds::fresh();
        }
    }

    /// Remove a message row (and its reactions) without emitting anything.
    /// A previously sent INSERT notification for it will now hydrate to
    /// `None` — the delete race.
    pub fn vanish_message(&self, id: Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.messages.remove(&id);
            inner.reactions.retain(|_, r| r.message_id != id);
        }
    }

    pub fn vanish_reaction(&self, id: Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.reactions.remove(&id);
        }
    }

    /// Make the next uploads fail, to exercise the abort-before-insert path.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_message_inserts(&self, fail: bool) {
        self.fail_message_inserts.store(fail, Ordering::Relaxed);
    }
}

impl RemoteStore for InMemoryStore {
    async fn snapshot(&self, project_id: Uuid) -> Result<ProjectSnapshot, StoreError> {
        self.with_inner(|inner| {
            let mut rows: Vec<&Message> = inner
                .messages
                .values()
                .filter(|m| m.project_id == project_id)
                .collect();
            rows.sort_by_key(|m| (m.created_at, m.id));

            let messages: Vec<FullMessage> =
                rows.iter().map(|row| inner.full_message(row)).collect();

            let reactions: Vec<FullReaction> = inner
                .reactions
                .values()
                .filter(|r| {
                    inner
                        .messages
                        .get(&r.message_id)
                        .is_some_and(|m| m.project_id == project_id)
                })
                .map(|r| inner.full_reaction(r))
                .collect();

            Ok(ProjectSnapshot {
                messages,
                reactions,
            })
        })
    }

    fn subscribe_raw(&self, entity: EntityKind) -> broadcast::Receiver<RawChange> {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        match entity {
            EntityKind::Message => feeds.message_tx.subscribe(),
            EntityKind::Reaction => feeds.reaction_tx.subscribe(),
        }
    }

    fn subscribe_projects(&self) -> broadcast::Receiver<RawChange> {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds.project_tx.subscribe()
    }

    async fn fetch_message(&self, id: Uuid) -> Result<Option<FullMessage>, StoreError> {
        self.with_inner(|inner| {
            let row = inner.messages.get(&id).cloned();
            Ok(row.map(|row| inner.full_message(&row)))
        })
    }

    async fn fetch_reaction(&self, id: Uuid) -> Result<Option<FullReaction>, StoreError> {
        self.with_inner(|inner| {
            let row = inner.reactions.get(&id).cloned();
            Ok(row.map(|row| inner.full_reaction(&row)))
        })
    }

    async fn fetch_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        self.with_inner(|inner| Ok(inner.projects.get(&id).cloned()))
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.with_inner(|inner| {
            let mut rows: Vec<Project> = inner.projects.values().cloned().collect();
            rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            Ok(rows)
        })
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Uuid, StoreError> {
        if self.fail_message_inserts.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("write refused".into()));
        }

        let id = Uuid::new_v4();
        let raw = self.with_inner(|inner| {
            if new.content.is_none() && new.image_url.is_none() {
                return Err(StoreError::Constraint(
                    "message needs content or an image".into(),
                ));
            }
            if !inner.projects.contains_key(&new.project_id) {
                return Err(StoreError::Constraint(format!(
                    "no such project: {}",
                    new.project_id
                )));
            }

            let row = Message {
                id,
                project_id: new.project_id,
                user_id: new.user_id,
                content: new.content,
                image_url: new.image_url,
                reply_to: new.reply_to,
                created_at: Utc::now(),
            };
            inner.messages.insert(id, row);

            Ok(RawChange {
                event: "INSERT".into(),
                table: "messages".into(),
                record: json!({
                    "id": id.to_string(),
                    "project_id": new.project_id.to_string(),
                }),
            })
        })?;

        debug!(%id, "message committed");
        self.emit(|feeds| &feeds.message_tx, raw);
        Ok(id)
    }

    async fn delete_message(&self, id: Uuid) -> Result<(), StoreError> {
        let deleted = self.with_inner(|inner| {
            let deleted = inner.messages.remove(&id).is_some();
            if deleted {
                // Row-level cascade. No reaction DELETE notifications go
                // out for these: the client cascades locally off the
                // message delete alone.
                inner.reactions.retain(|_, r| r.message_id != id);
            }
            Ok(deleted)
        })?;

        if deleted {
            debug!(%id, "message deleted");
            self.emit(
                |feeds| &feeds.message_tx,
                RawChange {
                    event: "DELETE".into(),
                    table: "messages".into(),
                    record: json!({ "id": id.to_string() }),
                },
            );
        }
        Ok(())
    }

    async fn insert_reaction(&self, new: NewReaction) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let raw = self.with_inner(|inner| {
            let Some(message) = inner.messages.get(&new.message_id) else {
                return Err(StoreError::Constraint(format!(
                    "no such message: {}",
                    new.message_id
                )));
            };
            let project_id = message.project_id;

            let row = Reaction {
                id,
                message_id: new.message_id,
                user_id: new.user_id,
                emoji: new.emoji,
                created_at: Utc::now(),
            };
            inner.reactions.insert(id, row);

            Ok(RawChange {
                event: "INSERT".into(),
                table: "reactions".into(),
                record: json!({
                    "id": id.to_string(),
                    "message_id": new.message_id.to_string(),
                    "project_id": project_id.to_string(),
                }),
            })
        })?;

        self.emit(|feeds| &feeds.reaction_tx, raw);
        Ok(id)
    }

    async fn delete_reaction(&self, id: Uuid) -> Result<(), StoreError> {
        let deleted = self.with_inner(|inner| Ok(inner.reactions.remove(&id).is_some()))?;

        if deleted {
            self.emit(
                |feeds| &feeds.reaction_tx,
                RawChange {
                    event: "DELETE".into(),
                    table: "reactions".into(),
                    record: json!({ "id": id.to_string() }),
                },
            );
        }
        Ok(())
    }

    async fn create_project(&self, new: NewProject) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.with_inner(|inner| {
            inner.projects.insert(
                id,
                Project {
                    id,
                    title: new.title,
                    created_by: new.created_by,
                    created_at: Utc::now(),
                },
            );
            Ok(())
        })?;

        self.emit(
            |feeds| &feeds.project_tx,
            RawChange {
                event: "INSERT".into(),
                table: "projects".into(),
                record: json!({ "id": id.to_string() }),
            },
        );
        Ok(id)
    }

    async fn delete_project(&self, id: Uuid) -> Result<(), StoreError> {
        let deleted = self.with_inner(|inner| {
            let deleted = inner.projects.remove(&id).is_some();
            if deleted {
                let message_ids: Vec<Uuid> = inner
                    .messages
                    .values()
                    .filter(|m| m.project_id == id)
                    .map(|m| m.id)
                    .collect();
                for mid in &message_ids {
                    inner.messages.remove(mid);
                }
                inner
                    .reactions
                    .retain(|_, r| !message_ids.contains(&r.message_id));
            }
            Ok(deleted)
        })?;

        if deleted {
            self.emit(
                |feeds| &feeds.project_tx,
                RawChange {
                    event: "DELETE".into(),
                    table: "projects".into(),
                    record: json!({ "id": id.to_string() }),
                },
            );
        }
        Ok(())
    }

    async fn upload_blob(&self, path: String, bytes: Bytes) -> Result<String, UploadError> {
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(UploadError::Unavailable("upload refused".into()));
        }

        let extension = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(UploadError::NotAnImage(extension));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(UploadError::TooLarge);
        }

        let mut inner = self
            .inner
            .lock()
            .map_err(|e| UploadError::Unavailable(format!("lock poisoned: {e}")))?;
        inner.blobs.insert(path.clone(), bytes);

        Ok(format!("mem://blobs/{path}"))
    }
}
