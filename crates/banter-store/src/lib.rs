pub mod error;
pub mod mem;

use std::future::Future;

use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use banter_types::events::{EntityKind, RawChange};
use banter_types::models::{
    FullMessage, FullReaction, NewMessage, NewProject, NewReaction, Project, ProjectSnapshot,
};

pub use error::{MAX_IMAGE_BYTES, StoreError, UploadError};

/// The remote storage/feed collaborator the sync engine is written against.
///
/// Change feeds are at-least-once and unordered: a notification may be
/// redelivered, may arrive before an earlier write's notification, and the
/// row it names may already be gone by the time it is fetched. Fetches
/// return `Ok(None)` for vanished rows — that is an expected outcome, not
/// an error.
///
/// Feed subscriptions are per entity kind; scope filtering happens on the
/// consumer side. A receiver that returns `Closed` or `Lagged` has lost its
/// place in the stream and should be replaced via a fresh subscription.
pub trait RemoteStore: Send + Sync + 'static {
    /// Full current state of a project: messages (already denormalized with
    /// author and reply snapshot) plus their reactions.
    fn snapshot(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<ProjectSnapshot, StoreError>> + Send;

    fn subscribe_raw(&self, entity: EntityKind) -> broadcast::Receiver<RawChange>;

    /// The unscoped project-table feed (drives the project directory).
    fn subscribe_projects(&self) -> broadcast::Receiver<RawChange>;

    fn fetch_message(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<FullMessage>, StoreError>> + Send;

    fn fetch_reaction(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<FullReaction>, StoreError>> + Send;

    fn fetch_project(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Project>, StoreError>> + Send;

    /// All projects, newest first.
    fn list_projects(&self) -> impl Future<Output = Result<Vec<Project>, StoreError>> + Send;

    fn insert_message(
        &self,
        new: NewMessage,
    ) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    fn delete_message(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_reaction(
        &self,
        new: NewReaction,
    ) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    fn delete_reaction(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn create_project(
        &self,
        new: NewProject,
    ) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    fn delete_project(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Upload an image blob and return its public URL.
    fn upload_blob(
        &self,
        path: String,
        bytes: Bytes,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}
