use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A raw push notification as the store's change feed delivers it: the
/// operation name, the table it touched, and whatever row fields the feed
/// chose to include. For deletes that is typically just the primary key.
///
/// Nothing in this shape is trusted — it is normalized into a [`ChangeEvent`]
/// at the adapter boundary and rejected if it doesn't parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChange {
    pub event: String,
    pub table: String,
    pub record: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Message,
    Reaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Delete,
}

/// A normalized change notification. Carries identity only — the entity
/// itself is fetched out of band (hydration) because the feed's copy may be
/// partial or already stale.
///
/// `project_id` is `None` on deletes: the feed only echoes the primary key
/// of a deleted row, so deletes cannot be scope-filtered and are instead
/// applied by id (a remove of an id we never held is a no-op).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub entity_id: Uuid,
    pub project_id: Option<Uuid>,
}

impl ChangeEvent {
    /// Identity used to deduplicate redelivered notifications.
    pub fn dedup_key(&self) -> (EntityKind, ChangeOp, Uuid) {
        (self.entity, self.op, self.entity_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("unknown feed op {0:?}")]
    UnknownOp(String),
    #[error("unknown feed table {0:?}")]
    UnknownTable(String),
    #[error("feed record has no usable id: {0}")]
    BadRecord(String),
}

impl TryFrom<&RawChange> for ChangeEvent {
    type Error = EventParseError;

    fn try_from(raw: &RawChange) -> Result<Self, Self::Error> {
        let op = match raw.event.as_str() {
            "INSERT" => ChangeOp::Insert,
            "DELETE" => ChangeOp::Delete,
            other => return Err(EventParseError::UnknownOp(other.to_string())),
        };

        let entity = match raw.table.as_str() {
            "messages" => EntityKind::Message,
            "reactions" => EntityKind::Reaction,
            other => return Err(EventParseError::UnknownTable(other.to_string())),
        };

        let entity_id = raw
            .record
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Uuid>().ok())
            .ok_or_else(|| EventParseError::BadRecord(raw.record.to_string()))?;

        let project_id = raw
            .record
            .get("project_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Uuid>().ok());

        Ok(ChangeEvent {
            entity,
            op,
            entity_id,
            project_id,
        })
    }
}
