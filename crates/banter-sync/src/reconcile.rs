//! The reconciler: canonical in-memory message/reaction state for one
//! project, mutated only by a single apply loop. Every transition here is
//! synchronous and total — fetching, retries, and failures all happen
//! before an [`Apply`] is constructed, so canonical state is never left
//! half-mutated.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use banter_types::emoji::ReactionEmoji;
use banter_types::events::{ChangeEvent, ChangeOp, EntityKind};
use banter_types::models::{FullMessage, FullReaction, Profile, ProjectSnapshot, ReplySnapshot};
use banter_types::view::{MessageView, ReconciledView, ReplyView, SessionPhase};

use crate::aggregate::aggregate;
use crate::send::Draft;

/// A fully hydrated state change, ready to apply. Deletes need no
/// hydration — the notification's identity is enough.
#[derive(Debug, Clone)]
pub enum Apply {
    MessageUpsert(FullMessage),
    MessageDelete(Uuid),
    ReactionUpsert(FullReaction),
    ReactionDelete(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    Live,
    Closed,
}

#[derive(Debug, Clone)]
enum ReplyRef {
    Quoted(ReplySnapshot),
    Tombstone,
}

#[derive(Debug)]
struct Entry {
    msg: FullMessage,
    reply: Option<ReplyRef>,
}

impl Entry {
    fn new(msg: FullMessage) -> Self {
        // A declared reply target whose snapshot is missing was already
        // deleted when the row was hydrated.
        let reply = match (msg.message.reply_to, &msg.reply_to) {
            (None, _) => None,
            (Some(_), Some(snap)) => Some(ReplyRef::Quoted(snap.clone())),
            (Some(_), None) => Some(ReplyRef::Tombstone),
        };
        Self { msg, reply }
    }
}

/// An optimistic local entry, kept strictly outside the canonical
/// collections and merged in at view-build time only.
#[derive(Debug)]
struct PendingEntry {
    seq: u64,
    placeholder_id: Uuid,
    content: Option<String>,
    reply: Option<ReplyRef>,
    created_at: DateTime<Utc>,
}

pub struct Reconciler {
    project_id: Uuid,
    current_user: Profile,
    phase: Phase,
    feed_down: bool,

    /// Canonical messages in arrival order; `index` maps id to position.
    entries: Vec<Entry>,
    index: HashMap<Uuid, usize>,

    /// Canonical reactions grouped by message, plus a reaction-id index so
    /// bare DELETE notifications can be applied without hydration.
    reactions: HashMap<Uuid, Vec<FullReaction>>,
    reaction_owner: HashMap<Uuid, Uuid>,

    /// Events that arrived during `Loading`, replayed after the snapshot.
    buffered: Vec<ChangeEvent>,
    buffered_keys: HashSet<(EntityKind, ChangeOp, Uuid)>,

    pending: Vec<PendingEntry>,
    next_seq: u64,
    /// Confirmed server ids whose feed event hasn't landed yet, mapped to
    /// the pending entry they will replace.
    expected: HashMap<Uuid, u64>,
}

impl Reconciler {
    pub fn new(project_id: Uuid, current_user: Profile) -> Self {
        Self {
            project_id,
            current_user,
            phase: Phase::Loading,
            feed_down: false,
            entries: Vec::new(),
            index: HashMap::new(),
            reactions: HashMap::new(),
            reaction_owner: HashMap::new(),
            buffered: Vec::new(),
            buffered_keys: HashSet::new(),
            pending: Vec::new(),
            next_seq: 0,
            expected: HashMap::new(),
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn current_user(&self) -> &Profile {
        &self.current_user
    }

    pub fn phase(&self) -> SessionPhase {
        match self.phase {
            Phase::Loading => SessionPhase::Loading,
            Phase::Closed => SessionPhase::Closed,
            Phase::Live if self.feed_down => SessionPhase::Reconnecting,
            Phase::Live => SessionPhase::Live,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn set_feed_down(&mut self, down: bool) {
        self.feed_down = down;
    }

    /// Terminal. Further events and applies are ignored.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Hold an event back while the snapshot is in flight. Redelivered
    /// duplicates are dropped here so the replay applies each change once.
    pub fn buffer(&mut self, event: ChangeEvent) {
        if self.phase != Phase::Loading {
            return;
        }
        if self.buffered_keys.insert(event.dedup_key()) {
            self.buffered.push(event);
        }
    }

    /// Seed canonical state from the snapshot and go live. Returns the
    /// buffered events for replay; replaying an insert the snapshot already
    /// absorbed is harmless (upsert-by-id).
    pub fn apply_snapshot(&mut self, snapshot: ProjectSnapshot) -> Vec<ChangeEvent> {
        if self.phase != Phase::Loading {
            return Vec::new();
        }

        for msg in snapshot.messages {
            self.upsert_message(msg);
        }
        for reaction in snapshot.reactions {
            self.upsert_reaction(reaction);
        }

        self.phase = Phase::Live;
        self.buffered_keys.clear();
        std::mem::take(&mut self.buffered)
    }

    /// Apply one hydrated change. Returns true if canonical state changed.
    /// All-or-nothing: any apply either fully lands or is a no-op.
    pub fn apply(&mut self, apply: Apply) -> bool {
        if self.phase != Phase::Live {
            trace!(?apply, phase = ?self.phase, "apply ignored outside Live");
            return false;
        }

        match apply {
            Apply::MessageUpsert(msg) => {
                if msg.message.project_id != self.project_id {
                    trace!(message = %msg.id(), "dropping message from another project");
                    return false;
                }
                self.upsert_message(msg)
            }
            Apply::MessageDelete(id) => self.delete_message(id),
            Apply::ReactionUpsert(reaction) => self.upsert_reaction(reaction),
            Apply::ReactionDelete(id) => self.delete_reaction(id),
        }
    }

    fn upsert_message(&mut self, msg: FullMessage) -> bool {
        let id = msg.id();

        // A confirmed optimistic send: the real row replaces the pending
        // placeholder in the same motion.
        if let Some(seq) = self.expected.remove(&id) {
            self.pending.retain(|p| p.seq != seq);
        }

        match self.index.get(&id) {
            Some(&pos) => {
                // Replace in place, preserving position. A locally observed
                // delete of the reply target outranks whatever snapshot a
                // (possibly stale) hydration carried.
                let fresh = Entry::new(msg);
                let old = &mut self.entries[pos];
                let keep_tombstone = matches!(old.reply, Some(ReplyRef::Tombstone));
                old.msg = fresh.msg;
                old.reply = if keep_tombstone {
                    Some(ReplyRef::Tombstone)
                } else {
                    fresh.reply
                };
            }
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push(Entry::new(msg));
            }
        }
        true
    }

    fn delete_message(&mut self, id: Uuid) -> bool {
        // A delete can outrun the insert hydration of a just-confirmed
        // send; the placeholder goes with the row either way.
        let withdrew = match self.expected.remove(&id) {
            Some(seq) => {
                self.pending.retain(|p| p.seq != seq);
                true
            }
            None => false,
        };

        let Some(pos) = self.index.remove(&id) else {
            return withdrew;
        };
        self.entries.remove(pos);
        for (i, entry) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(entry.msg.id(), i);
        }

        // Cascade: the message's reactions go with it.
        if let Some(removed) = self.reactions.remove(&id) {
            for reaction in removed {
                self.reaction_owner.remove(&reaction.id());
            }
        }

        // Anything quoting the deleted message keeps a tombstone, not a
        // dangling reference.
        for entry in &mut self.entries {
            if let Some(ReplyRef::Quoted(snap)) = &entry.reply {
                if snap.message_id == id {
                    entry.reply = Some(ReplyRef::Tombstone);
                }
            }
        }
        true
    }

    fn upsert_reaction(&mut self, reaction: FullReaction) -> bool {
        let id = reaction.id();
        let message_id = reaction.reaction.message_id;

        match self.reaction_owner.get(&id) {
            Some(&owner) => {
                let group = self.reactions.entry(owner).or_default();
                if let Some(existing) = group.iter_mut().find(|r| r.id() == id) {
                    *existing = reaction;
                }
            }
            None => {
                self.reaction_owner.insert(id, message_id);
                self.reactions.entry(message_id).or_default().push(reaction);
            }
        }
        true
    }

    fn delete_reaction(&mut self, id: Uuid) -> bool {
        let Some(owner) = self.reaction_owner.remove(&id) else {
            return false;
        };
        if let Some(group) = self.reactions.get_mut(&owner) {
            group.retain(|r| r.id() != id);
            if group.is_empty() {
                self.reactions.remove(&owner);
            }
        }
        true
    }

    // -- Optimistic overlay --

    /// Stage a pending entry for a draft being sent. Returns the sequence
    /// number the pipeline uses to confirm or withdraw it.
    pub fn push_pending(&mut self, draft: &Draft, reply_to: Option<Uuid>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let reply = reply_to.and_then(|target| {
            self.index.get(&target).map(|&pos| {
                let entry = &self.entries[pos];
                ReplyRef::Quoted(ReplySnapshot {
                    message_id: target,
                    author_username: entry.msg.author.username.clone(),
                    content: entry.msg.message.content.clone(),
                    image_url: entry.msg.message.image_url.clone(),
                })
            })
        });

        self.pending.push(PendingEntry {
            seq,
            placeholder_id: Uuid::new_v4(),
            content: draft.trimmed_content(),
            reply,
            created_at: Utc::now(),
        });
        seq
    }

    /// The write succeeded; the row's id is known. If its feed event
    /// already landed, the placeholder goes now — otherwise it goes the
    /// moment the upsert arrives.
    pub fn confirm_pending(&mut self, seq: u64, server_id: Uuid) {
        if self.index.contains_key(&server_id) {
            self.pending.retain(|p| p.seq != seq);
        } else {
            self.expected.insert(server_id, seq);
        }
    }

    /// The write failed; withdraw the placeholder.
    pub fn fail_pending(&mut self, seq: u64) {
        self.pending.retain(|p| p.seq != seq);
    }

    // -- Queries --

    pub fn has_message(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// The current user's own reaction with this emoji on this message, if
    /// any — the toggle pipeline's check-then-act source.
    pub fn own_reaction_id(&self, message_id: Uuid, emoji: ReactionEmoji) -> Option<Uuid> {
        self.reactions.get(&message_id)?.iter().find_map(|r| {
            (r.reaction.user_id == self.current_user.id && r.reaction.emoji == emoji)
                .then(|| r.id())
        })
    }

    /// Build the externally observable view: confirmed entries in arrival
    /// order, pending overlay after them.
    pub fn view(&self) -> ReconciledView {
        let mut messages: Vec<MessageView> = self
            .entries
            .iter()
            .map(|entry| {
                let id = entry.msg.id();
                MessageView {
                    id,
                    author: entry.msg.author.clone(),
                    content: entry.msg.message.content.clone(),
                    image_url: entry.msg.message.image_url.clone(),
                    reply: entry.reply.as_ref().map(reply_view),
                    reactions: self
                        .reactions
                        .get(&id)
                        .map(|group| aggregate(group, self.current_user.id))
                        .unwrap_or_default(),
                    created_at: entry.msg.message.created_at,
                    pending: false,
                }
            })
            .collect();

        for pending in &self.pending {
            messages.push(MessageView {
                id: pending.placeholder_id,
                author: self.current_user.clone(),
                content: pending.content.clone(),
                image_url: None,
                reply: pending.reply.as_ref().map(reply_view),
                reactions: Vec::new(),
                created_at: pending.created_at,
                pending: true,
            });
        }

        ReconciledView {
            project_id: self.project_id,
            phase: self.phase(),
            messages,
        }
    }
}

fn reply_view(reply: &ReplyRef) -> ReplyView {
    match reply {
        ReplyRef::Quoted(snap) => ReplyView::Quoted(snap.clone()),
        ReplyRef::Tombstone => ReplyView::Tombstone,
    }
}
