//! Client-side state reconciliation for banter chat.
//!
//! The engine sits between a [`RemoteStore`](banter_store::RemoteStore) and
//! a presentation layer. It hydrates a project snapshot, subscribes to the
//! store's unordered at-least-once change feeds, and folds both into a
//! [`ReconciledView`](banter_types::view::ReconciledView) that is correct
//! regardless of notification order, duplication, or notify/fetch races.
//!
//! [`ProjectSession`] is the main entry point: one session per open
//! project, commands in, watch-published views out.

mod aggregate;
mod anchor;
mod config;
mod directory;
mod error;
mod feed;
mod reconcile;
mod send;
mod session;

pub use aggregate::aggregate;
pub use anchor::{AnchorController, ScrollAnchor};
pub use config::SyncConfig;
pub use directory::ProjectDirectory;
pub use error::{SendError, SendFailure};
pub use feed::{FeedItem, project_feed};
pub use reconcile::{Apply, Reconciler};
pub use send::{Draft, ImageDraft};
pub use session::ProjectSession;
