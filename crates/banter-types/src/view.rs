use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emoji::ReactionEmoji;
use crate::models::{Profile, ReplySnapshot};

/// Where a session is in its lifecycle. `Reconnecting` is `Live` with a
/// feed currently being re-established — events may be silently missed
/// until the resubscribe lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Loading,
    Live,
    Reconnecting,
    Closed,
}

/// A message's resolved reply reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplyView {
    /// The quoted message still existed when we last looked.
    Quoted(ReplySnapshot),
    /// The quoted message has been deleted. Distinct from "no reply":
    /// presentation renders this as "message deleted".
    Tombstone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reactor {
    pub user_id: Uuid,
    pub username: String,
}

/// Per-emoji reaction rollup for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionAggregate {
    pub emoji: ReactionEmoji,
    pub count: usize,
    pub reactors: Vec<Reactor>,
    pub reacted_by_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub author: Profile,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub reply: Option<ReplyView>,
    pub reactions: Vec<ReactionAggregate>,
    pub created_at: DateTime<Utc>,
    /// An optimistic local entry not yet confirmed by the store. Pending
    /// entries always sort after confirmed ones and carry no reactions.
    pub pending: bool,
}

/// The externally observable state of a project session: phase plus the
/// ordered message list. Rebuilt incrementally on each accepted event and
/// published through a watch channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledView {
    pub project_id: Uuid,
    pub phase: SessionPhase,
    pub messages: Vec<MessageView>,
}

impl ReconciledView {
    pub fn empty(project_id: Uuid) -> Self {
        Self {
            project_id,
            phase: SessionPhase::Loading,
            messages: Vec::new(),
        }
    }

    pub fn message(&self, id: Uuid) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.id == id)
    }
}
