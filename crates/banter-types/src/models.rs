use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emoji::ReactionEmoji;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A message row as the store holds it. `content` and `image_url` are both
/// optional, but the store rejects inserts where both are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: ReactionEmoji,
    pub created_at: DateTime<Utc>,
}

/// One-level snapshot of a reply target, captured at hydration time.
/// Deliberately shallow: a quoted message's own reply chain is never
/// followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySnapshot {
    pub message_id: Uuid,
    pub author_username: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
}

/// A message denormalized for display: the row plus its author profile and,
/// when the row declares a reply target that still exists, a snapshot of it.
/// A declared target with `reply_to = None` here means the target was
/// already gone when we fetched — the reconciler renders that as a
/// tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullMessage {
    pub message: Message,
    pub author: Profile,
    pub reply_to: Option<ReplySnapshot>,
}

impl FullMessage {
    pub fn id(&self) -> Uuid {
        self.message.id
    }
}

/// A reaction row plus the reactor's username (for the "who reacted"
/// tooltip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullReaction {
    pub reaction: Reaction,
    pub username: String,
}

impl FullReaction {
    pub fn id(&self) -> Uuid {
        self.reaction.id
    }
}

/// Full current state of a project, fetched once at session start.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub messages: Vec<FullMessage>,
    pub reactions: Vec<FullReaction>,
}

// -- Insert shapes --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: ReactionEmoji,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub created_by: Uuid,
}
