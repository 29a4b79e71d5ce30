//! Live project directory: the list every client shows before entering a
//! project. Unlike the per-project session this feed is unscoped — every
//! client sees every project come and go, newest first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use banter_store::{RemoteStore, StoreError};
use banter_types::models::{NewProject, Project};

enum Command {
    Create {
        new: NewProject,
        reply: oneshot::Sender<Result<Uuid, StoreError>>,
    },
    Delete {
        project_id: Uuid,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Close,
}

/// Handle to the directory task. The list is watch-published; dropping the
/// handle tears the task down.
pub struct ProjectDirectory {
    cmd_tx: mpsc::Sender<Command>,
    list_rx: watch::Receiver<Vec<Project>>,
    task: JoinHandle<()>,
}

impl ProjectDirectory {
    pub fn open<S: RemoteStore>(store: Arc<S>, resubscribe_delay: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (list_tx, list_rx) = watch::channel(Vec::new());

        let task = tokio::spawn(run(store, resubscribe_delay, list_tx, cmd_rx));

        Self {
            cmd_tx,
            list_rx,
            task,
        }
    }

    pub fn projects(&self) -> Vec<Project> {
        self.list_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Project>> {
        self.list_rx.clone()
    }

    pub async fn create(&self, new: NewProject) -> Result<Uuid, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Create { new, reply: tx })
            .await
            .map_err(|_| StoreError::Unavailable("directory closed".into()))?;
        rx.await
            .unwrap_or(Err(StoreError::Unavailable("directory closed".into())))
    }

    pub async fn delete(&self, project_id: Uuid) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Delete {
                project_id,
                reply: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("directory closed".into()))?;
        rx.await
            .unwrap_or(Err(StoreError::Unavailable("directory closed".into())))
    }

    pub async fn close(mut self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        let _ = (&mut self.task).await;
    }
}

async fn run<S: RemoteStore>(
    store: Arc<S>,
    resubscribe_delay: Duration,
    list_tx: watch::Sender<Vec<Project>>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    // Subscribe first so creations racing the initial list are not missed;
    // upsert-by-id absorbs the overlap.
    let mut feed = store.subscribe_projects();

    let mut projects = match store.list_projects().await {
        Ok(list) => list,
        Err(err) => {
            warn!(%err, "initial project list failed, starting empty");
            Vec::new()
        }
    };
    let _ = list_tx.send(projects.clone());

    loop {
        tokio::select! {
            result = feed.recv() => match result {
                Ok(raw) => {
                    if raw.table != "projects" {
                        warn!(table = %raw.table, "dropping cross-table directory payload");
                        continue;
                    }
                    let Some(id) = raw
                        .record
                        .get("id")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                    else {
                        warn!("dropping directory payload without a row id");
                        continue;
                    };
                    match raw.event.as_str() {
                        "INSERT" => match store.fetch_project(id).await {
                            Ok(Some(project)) => {
                                upsert(&mut projects, project);
                                let _ = list_tx.send(projects.clone());
                            }
                            Ok(None) => debug!(%id, "project vanished before hydration"),
                            Err(err) => warn!(%id, %err, "project hydration failed"),
                        },
                        "DELETE" => {
                            let before = projects.len();
                            projects.retain(|p| p.id != id);
                            if projects.len() != before {
                                let _ = list_tx.send(projects.clone());
                            }
                        }
                        other => debug!(event = other, "ignoring directory event"),
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    // Cheap to recover: refetch the whole list.
                    warn!(missed = n, "project feed lagged, refreshing list");
                    if let Ok(list) = store.list_projects().await {
                        projects = list;
                        let _ = list_tx.send(projects.clone());
                    }
                }
                Err(RecvError::Closed) => {
                    warn!("project feed closed, resubscribing");
                    tokio::time::sleep(resubscribe_delay).await;
                    feed = store.subscribe_projects();
                    if let Ok(list) = store.list_projects().await {
                        projects = list;
                        let _ = list_tx.send(projects.clone());
                    }
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Create { new, reply }) => {
                    let _ = reply.send(store.create_project(new).await);
                }
                Some(Command::Delete { project_id, reply }) => {
                    let _ = reply.send(store.delete_project(project_id).await);
                }
                Some(Command::Close) | None => break,
            },
        }
    }

    info!("project directory closed");
}

/// New projects go to the front; a redelivered insert replaces in place.
fn upsert(projects: &mut Vec<Project>, project: Project) {
    match projects.iter_mut().find(|p| p.id == project.id) {
        Some(slot) => *slot = project,
        None => projects.insert(0, project),
    }
}
