//! The optimistic send pipeline's remote half: validate, upload the image
//! first, then write the message row. Stages are strictly ordered so a
//! failed upload never leaves a partial message behind — the write is not
//! attempted at all.

use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use banter_store::RemoteStore;
use banter_types::models::NewMessage;

use crate::error::SendError;

/// What the user composed. Kept intact on failure so it can be retried.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub content: Option<String>,
    pub image: Option<ImageDraft>,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ImageDraft {
    pub file_name: String,
    pub bytes: Bytes,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Trimmed content, with whitespace-only text treated as absent.
    pub fn trimmed_content(&self) -> Option<String> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.trimmed_content().is_none() && self.image.is_none()
    }
}

/// Storage path for an uploaded image: owner-scoped, collision-avoided by
/// timestamp, keeping the original extension.
fn blob_path(user_id: Uuid, file_name: &str) -> String {
    let extension = file_name.rsplit('.').next().unwrap_or("bin");
    format!("{}/{}.{}", user_id, Utc::now().timestamp_millis(), extension)
}

/// Run the remote half of a send. Returns the new message's id; the row
/// itself comes back through the change feed and lands via upsert-by-id.
pub(crate) async fn perform_send<S: RemoteStore>(
    store: &S,
    project_id: Uuid,
    user_id: Uuid,
    reply_to: Option<Uuid>,
    draft: &Draft,
) -> Result<Uuid, SendError> {
    if draft.is_empty() {
        return Err(SendError::EmptyDraft);
    }

    let image_url = match &draft.image {
        Some(image) => {
            let path = blob_path(user_id, &image.file_name);
            let url = store
                .upload_blob(path, image.bytes.clone())
                .await
                .map_err(SendError::UploadFailed)?;
            Some(url)
        }
        None => None,
    };

    store
        .insert_message(NewMessage {
            project_id,
            user_id,
            content: draft.trimmed_content(),
            image_url,
            reply_to,
        })
        .await
        .map_err(SendError::WriteFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_store::mem::InMemoryStore;
    use banter_types::models::NewProject;

    async fn fixture() -> (InMemoryStore, Uuid, Uuid) {
        let store = InMemoryStore::new();
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
    async fn text_only_send_inserts_a_row() {
        let (store, user_id, project_id) = fixture().await;

        let id = perform_send(&store, project_id, user_id, None, &Draft::text("  hi  "))
            .await
            .unwrap();

        let full = store.fetch_message(id).await.unwrap().unwrap();
        assert_eq!(full.message.content.as_deref(), Some("hi"));
        assert_eq!(full.message.image_url, None);
    }

    #[tokio::test]
    async fn image_send_uploads_before_inserting() {
        let (store, user_id, project_id) = fixture().await;

        let draft = Draft {
            content: None,
            image: Some(ImageDraft {
                file_name: "meme.png".into(),
                bytes: Bytes::from_static(b"png"),
            }),
            reply_to: None,
        };
        let id = perform_send(&store, project_id, user_id, None, &draft)
            .await
            .unwrap();

        let full = store.fetch_message(id).await.unwrap().unwrap();
        let url = full.message.image_url.unwrap();
        assert!(url.starts_with("mem://blobs/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn failed_upload_aborts_without_a_message() {
        let (store, user_id, project_id) = fixture().await;
        store.set_fail_uploads(true);

        let draft = Draft {
            content: Some("with pic".into()),
            image: Some(ImageDraft {
                file_name: "meme.png".into(),
                bytes: Bytes::from_static(b"png"),
            }),
            reply_to: None,
        };
        let err = perform_send(&store, project_id, user_id, None, &draft)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::UploadFailed(_)));

        // No partial message was created.
        let snapshot = store.snapshot(project_id).await.unwrap();
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test]
    async fn blank_drafts_are_rejected_locally() {
        let (store, user_id, project_id) = fixture().await;
        let err = perform_send(&store, project_id, user_id, None, &Draft::text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::EmptyDraft));
    }
}
