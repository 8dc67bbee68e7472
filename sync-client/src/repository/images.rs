//! Images repository.

use sync_core::{ImageChange, ImagesState, IssueError};
use sync_types::{content_digest, Image, ImageId, Payload};
use thiserror::Error;
use tokio::sync::broadcast;

use super::{author_operation, Replica};
use crate::engine::{SyncEngine, SyncError};
use crate::store::OperationStore;
use crate::transport::Transport;

/// Images repository errors.
#[derive(Debug, Error)]
pub enum ImagesError {
    /// Uploads must carry at least one byte.
    #[error("image is empty")]
    EmptyImage,

    /// Could not mint a fresh id.
    #[error(transparent)]
    Issue(#[from] IssueError),

    /// The engine could not record the operation.
    #[error("internal error: {0}")]
    Internal(#[from] SyncError),
}

/// Query and upload images.
pub struct ImagesRepository<T, S> {
    engine: SyncEngine<T, S>,
    replica: Replica<ImagesState>,
}

impl<T, S> ImagesRepository<T, S>
where
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    /// Fold the engine's log and follow its updates.
    pub async fn open(engine: &SyncEngine<T, S>) -> Self {
        Self {
            engine: engine.clone(),
            replica: Replica::open(engine, "images").await,
        }
    }

    /// Look up an image.
    pub fn image(&self, id: &ImageId) -> Option<Image> {
        self.replica.read(|state| state.image(id))
    }

    /// All images, most recent upload first.
    pub fn images(&self) -> Vec<Image> {
        self.replica.read(ImagesState::images)
    }

    /// Subscribe to change events.
    pub fn changes(&self) -> broadcast::Receiver<ImageChange> {
        self.replica.changes()
    }

    /// Upload an image.
    ///
    /// Identical bytes are stored once: uploading them again returns the id
    /// of the image already present without writing anything.
    pub async fn upload(&self, media_type: &str, data: Vec<u8>) -> Result<ImageId, ImagesError> {
        if data.is_empty() {
            return Err(ImagesError::EmptyImage);
        }
        let mut issuer = self.replica.writer().await;

        let digest = content_digest(&data);
        if let Some(existing) = self.replica.read(|state| state.find_by_digest(&digest)) {
            tracing::debug!(image = %existing, "Image already uploaded");
            return Ok(existing);
        }

        let image_id: ImageId = issuer.next_id(|id| self.replica.read(|state| state.knows(id)))?;
        let operation = author_operation(
            &self.engine,
            &mut issuer,
            Payload::UploadImage {
                image_id,
                media_type: media_type.to_string(),
                data,
            },
        )
        .await?;
        self.engine.push(operation.clone()).await?;
        self.replica.fold_local(&operation);

        Ok(image_id)
    }
}
