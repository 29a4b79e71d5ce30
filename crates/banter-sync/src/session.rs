//! One live session per active project. A single spawned task owns the
//! reconciler; feed events, hydration completions, send-pipeline results,
//! and user commands are all funneled into that task's queues, so canonical
//! state only ever has one writer.
//!
//! Instance isolation falls out of the channel topology: every hydration or
//! pipeline task holds a sender into *this* session's apply queue. When the
//! session closes, the queue's receiver is gone and late results go
//! nowhere — they cannot leak into a newer session for another project.

use std::sync::Arc;

use futures_util::{Stream, StreamExt, pin_mut};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use banter_store::RemoteStore;
use banter_types::emoji::ReactionEmoji;
use banter_types::events::{ChangeEvent, ChangeOp, EntityKind};
use banter_types::models::{NewReaction, Profile, ProjectSnapshot};
use banter_types::view::ReconciledView;

use crate::anchor::{AnchorController, ScrollAnchor};
use crate::config::SyncConfig;
use crate::error::{SendError, SendFailure};
use crate::feed::{FeedItem, project_feed};
use crate::reconcile::{Apply, Reconciler};
use crate::send::{Draft, perform_send};

/// Internal results funneled back into the apply loop.
enum Input {
    Snapshot(ProjectSnapshot),
    Hydrated(Apply),
    SendResult { seq: u64, server_id: Option<Uuid> },
    ClearHighlight(u64),
}

enum Command {
    Send {
        draft: Draft,
        reply: oneshot::Sender<Result<(), SendFailure>>,
    },
    React {
        message_id: Uuid,
        emoji: ReactionEmoji,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Delete {
        message_id: Uuid,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    SetReplyTarget(Option<Uuid>),
    ScrollTo(Uuid),
    Close,
}

/// Handle to a live project session. Dropping it (or calling [`close`])
/// tears the session down; a new project means a new session.
///
/// [`close`]: ProjectSession::close
pub struct ProjectSession {
    project_id: Uuid,
    cmd_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<ReconciledView>,
    anchor_rx: watch::Receiver<ScrollAnchor>,
    task: JoinHandle<()>,
}

impl ProjectSession {
    pub fn open<S: RemoteStore>(
        store: Arc<S>,
        current_user: Profile,
        project_id: Uuid,
        config: SyncConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity);
        let (apply_tx, apply_rx) = mpsc::channel(config.queue_capacity);
        let (view_tx, view_rx) = watch::channel(ReconciledView::empty(project_id));
        let (anchor_tx, anchor_rx) = watch::channel(ScrollAnchor::Bottom { animated: false });

        // Subscribe before fetching the snapshot so nothing slips between
        // the two; events racing the snapshot are buffered and replayed.
        let feed = project_feed(store.clone(), project_id, config.resubscribe_delay);

        spawn_snapshot_fetch(store.clone(), project_id, config.clone(), apply_tx.clone());

        let session_loop = SessionLoop {
            store,
            config,
            reconciler: Reconciler::new(project_id, current_user),
            anchor: AnchorController::new(),
            view_tx,
            anchor_tx,
            apply_tx,
            reply_target: None,
            jump_generation: 0,
        };

        let task = tokio::spawn(run(session_loop, feed, apply_rx, cmd_rx));

        info!(%project_id, "project session opened");
        Self {
            project_id,
            cmd_tx,
            view_rx,
            anchor_rx,
            task,
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// Current reconciled view.
    pub fn view(&self) -> ReconciledView {
        self.view_rx.borrow().clone()
    }

    /// Watch the view as it changes.
    pub fn watch_view(&self) -> watch::Receiver<ReconciledView> {
        self.view_rx.clone()
    }

    pub fn anchor(&self) -> ScrollAnchor {
        *self.anchor_rx.borrow()
    }

    pub fn watch_anchor(&self) -> watch::Receiver<ScrollAnchor> {
        self.anchor_rx.clone()
    }

    /// Send a message. On failure the draft comes back with the error so
    /// the caller can retry without losing the user's input.
    pub async fn send(&self, draft: Draft) -> Result<(), SendFailure> {
        let (tx, rx) = oneshot::channel();
        let fallback = draft.clone();

        if let Err(mpsc::error::SendError(cmd)) =
            self.cmd_tx.send(Command::Send { draft, reply: tx }).await
        {
            let draft = match cmd {
                Command::Send { draft, .. } => draft,
                _ => unreachable!(),
            };
            return Err(SendFailure {
                draft,
                error: SendError::Closed,
            });
        }

        rx.await.unwrap_or(Err(SendFailure {
            draft: fallback,
            error: SendError::Closed,
        }))
    }

    /// Toggle the current user's reaction: removes their existing reaction
    /// with this emoji, otherwise adds one.
    pub async fn react(&self, message_id: Uuid, emoji: ReactionEmoji) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::React {
                message_id,
                emoji,
                reply: tx,
            })
            .await
            .map_err(|_| SendError::Closed)?;
        rx.await.unwrap_or(Err(SendError::Closed))
    }

    /// Delete a message. Local state updates when the store's DELETE
    /// notification comes back around.
    pub async fn delete(&self, message_id: Uuid) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Delete {
                message_id,
                reply: tx,
            })
            .await
            .map_err(|_| SendError::Closed)?;
        rx.await.unwrap_or(Err(SendError::Closed))
    }

    /// Set (or clear) the quoted message the next send replies to.
    pub async fn set_reply_target(&self, target: Option<Uuid>) {
        let _ = self.cmd_tx.send(Command::SetReplyTarget(target)).await;
    }

    /// Jump the viewport to a quoted message with a transient highlight.
    pub async fn scroll_to_message(&self, message_id: Uuid) {
        let _ = self.cmd_tx.send(Command::ScrollTo(message_id)).await;
    }

    /// Tear the session down and wait for the apply loop to finish.
    pub async fn close(mut self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        let _ = (&mut self.task).await;
    }
}

fn spawn_snapshot_fetch<S: RemoteStore>(
    store: Arc<S>,
    project_id: Uuid,
    config: SyncConfig,
    apply_tx: mpsc::Sender<Input>,
) {
    tokio::spawn(async move {
        loop {
            match store.snapshot(project_id).await {
                Ok(snapshot) => {
                    let _ = apply_tx.send(Input::Snapshot(snapshot)).await;
                    return;
                }
                Err(err) => {
                    warn!(%project_id, %err, "snapshot fetch failed, retrying");
                    tokio::time::sleep(config.resubscribe_delay).await;
                }
            }
            if apply_tx.is_closed() {
                return;
            }
        }
    });
}

struct SessionLoop<S: RemoteStore> {
    store: Arc<S>,
    config: SyncConfig,
    reconciler: Reconciler,
    anchor: AnchorController,
    view_tx: watch::Sender<ReconciledView>,
    anchor_tx: watch::Sender<ScrollAnchor>,
    apply_tx: mpsc::Sender<Input>,
    reply_target: Option<Uuid>,
    jump_generation: u64,
}

async fn run<S: RemoteStore>(
    mut lp: SessionLoop<S>,
    feed: impl Stream<Item = FeedItem> + Send,
    mut apply_rx: mpsc::Receiver<Input>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    pin_mut!(feed);

    loop {
        tokio::select! {
            Some(item) = feed.next() => lp.handle_feed_item(item),
            Some(input) = apply_rx.recv() => lp.handle_input(input),
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => lp.handle_command(cmd),
                // All handles dropped: same as an explicit close.
                None => lp.reconciler.close(),
            },
        }

        if lp.reconciler.is_closed() {
            lp.publish_view();
            break;
        }
    }

    info!(project_id = %lp.reconciler.project_id(), "project session closed");
}

impl<S: RemoteStore> SessionLoop<S> {
    fn publish_view(&self) {
        let _ = self.view_tx.send(self.reconciler.view());
    }

    fn publish_anchor(&self) {
        let _ = self.anchor_tx.send(self.anchor.current());
    }

    fn handle_feed_item(&mut self, item: FeedItem) {
        match item {
            FeedItem::Event(event) => {
                if self.reconciler.is_live() {
                    self.process_event(event);
                } else {
                    self.reconciler.buffer(event);
                }
            }
            FeedItem::Interrupted => {
                self.reconciler.set_feed_down(true);
                self.publish_view();
            }
            FeedItem::Resubscribed => {
                self.reconciler.set_feed_down(false);
                self.publish_view();
            }
        }
    }

    /// Route one normalized event: deletes apply directly, inserts fan out
    /// to a hydration task whose result re-enters through the apply queue.
    fn process_event(&mut self, event: ChangeEvent) {
        match event.op {
            ChangeOp::Insert => self.spawn_hydration(event),
            ChangeOp::Delete => {
                let apply = match event.entity {
                    EntityKind::Message => Apply::MessageDelete(event.entity_id),
                    EntityKind::Reaction => Apply::ReactionDelete(event.entity_id),
                };
                if self.reconciler.apply(apply) {
                    self.publish_view();
                }
            }
        }
    }

    /// Hydration fan-out: fetches run concurrently and complete in any
    /// order; upsert-by-id makes the application order irrelevant.
    fn spawn_hydration(&self, event: ChangeEvent) {
        let store = self.store.clone();
        let apply_tx = self.apply_tx.clone();
        tokio::spawn(async move {
            let apply = match event.entity {
                EntityKind::Message => match store.fetch_message(event.entity_id).await {
                    Ok(Some(full)) => Some(Apply::MessageUpsert(full)),
                    Ok(None) => {
                        // Vanished between notify and fetch: the expected
                        // delete-race outcome, not an error.
                        trace!(id = %event.entity_id, "message hydration miss");
                        None
                    }
                    Err(err) => {
                        warn!(id = %event.entity_id, %err, "message hydration failed");
                        None
                    }
                },
                EntityKind::Reaction => match store.fetch_reaction(event.entity_id).await {
                    Ok(Some(full)) => Some(Apply::ReactionUpsert(full)),
                    Ok(None) => {
                        trace!(id = %event.entity_id, "reaction hydration miss");
                        None
                    }
                    Err(err) => {
                        warn!(id = %event.entity_id, %err, "reaction hydration failed");
                        None
                    }
                },
            };

            if let Some(apply) = apply {
                let _ = apply_tx.send(Input::Hydrated(apply)).await;
            }
        });
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Snapshot(snapshot) => {
                let replay = self.reconciler.apply_snapshot(snapshot);
                debug!(
                    project_id = %self.reconciler.project_id(),
                    buffered = replay.len(),
                    "snapshot applied, session live"
                );
                self.anchor.on_initial_load();
                self.publish_anchor();
                self.publish_view();
                for event in replay {
                    self.process_event(event);
                }
            }
            Input::Hydrated(apply) => {
                let appended = match &apply {
                    Apply::MessageUpsert(m) => !self.reconciler.has_message(m.id()),
                    _ => false,
                };
                if self.reconciler.apply(apply) {
                    self.publish_view();
                    if appended {
                        self.anchor.on_live_append();
                        self.publish_anchor();
                    }
                }
            }
            Input::SendResult { seq, server_id } => {
                match server_id {
                    Some(id) => self.reconciler.confirm_pending(seq, id),
                    None => self.reconciler.fail_pending(seq),
                }
                self.publish_view();
            }
            Input::ClearHighlight(generation) => {
                // A newer jump owns the highlight now; let it be.
                if generation == self.jump_generation {
                    self.anchor.clear_highlight();
                    self.publish_anchor();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { draft, reply } => self.start_send(draft, reply),
            Command::React {
                message_id,
                emoji,
                reply,
            } => self.start_react(message_id, emoji, reply),
            Command::Delete { message_id, reply } => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    let result = store
                        .delete_message(message_id)
                        .await
                        .map_err(SendError::WriteFailed);
                    let _ = reply.send(result);
                });
            }
            Command::SetReplyTarget(target) => self.reply_target = target,
            Command::ScrollTo(message_id) => self.start_jump(message_id),
            Command::Close => self.reconciler.close(),
        }
    }

    fn start_send(&mut self, draft: Draft, reply: oneshot::Sender<Result<(), SendFailure>>) {
        if draft.is_empty() {
            let _ = reply.send(Err(SendFailure {
                draft,
                error: SendError::EmptyDraft,
            }));
            return;
        }

        // A target on the draft itself wins; otherwise the session-level
        // target is consumed by the send, like clearing the reply preview
        // the moment the message goes out.
        let reply_to = match draft.reply_to {
            Some(target) => Some(target),
            None => self.reply_target.take(),
        };
        let seq = self.reconciler.push_pending(&draft, reply_to);
        self.publish_view();
        self.anchor.on_local_send();
        self.publish_anchor();

        let store = self.store.clone();
        let apply_tx = self.apply_tx.clone();
        let project_id = self.reconciler.project_id();
        let user_id = self.reconciler.current_user().id;

        tokio::spawn(async move {
            match perform_send(&*store, project_id, user_id, reply_to, &draft).await {
                Ok(id) => {
                    let _ = apply_tx
                        .send(Input::SendResult {
                            seq,
                            server_id: Some(id),
                        })
                        .await;
                    let _ = reply.send(Ok(()));
                }
                Err(error) => {
                    let _ = apply_tx
                        .send(Input::SendResult {
                            seq,
                            server_id: None,
                        })
                        .await;
                    let _ = reply.send(Err(SendFailure { draft, error }));
                }
            }
        });
    }

    /// Toggle semantics, check-then-act against local state. Two devices
    /// racing the same toggle can double-add or double-remove; the next
    /// notifications converge everyone — accepted eventual consistency.
    fn start_react(
        &mut self,
        message_id: Uuid,
        emoji: ReactionEmoji,
        reply: oneshot::Sender<Result<(), SendError>>,
    ) {
        let store = self.store.clone();
        let user_id = self.reconciler.current_user().id;
        let existing = self.reconciler.own_reaction_id(message_id, emoji);

        tokio::spawn(async move {
            let result = match existing {
                Some(reaction_id) => store.delete_reaction(reaction_id).await,
                None => store
                    .insert_reaction(NewReaction {
                        message_id,
                        user_id,
                        emoji,
                    })
                    .await
                    .map(|_| ()),
            };
            let _ = reply.send(result.map_err(SendError::WriteFailed));
        });
    }

    fn start_jump(&mut self, message_id: Uuid) {
        if !self.reconciler.has_message(message_id) {
            debug!(%message_id, "jump target not in view, ignoring");
            return;
        }

        self.jump_generation += 1;
        let generation = self.jump_generation;
        self.anchor.on_jump(message_id);
        self.publish_anchor();

        let apply_tx = self.apply_tx.clone();
        let delay = self.config.highlight_duration;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = apply_tx.send(Input::ClearHighlight(generation)).await;
        });
    }
}
