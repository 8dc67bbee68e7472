//! Materialized domain values.
//!
//! These are what repositories hand out after folding the log. They carry
//! no replication metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{GroupId, ImageId, SpendingId, UserId};

/// SHA-256 digest of an uploaded image's bytes.
pub type ContentDigest = [u8; 32];

/// Compute the content digest of image bytes.
pub fn content_digest(data: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Name shown to other group members
    pub display_name: String,
    /// Avatar image, if one was set
    pub avatar: Option<ImageId>,
    /// Account login this user was bound to, if any
    pub login: Option<String>,
}

/// Metadata of a spending group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingGroup {
    /// Group identifier
    pub id: GroupId,
    /// Human-readable group name
    pub name: String,
}

/// One participant's part of a spending, in minor currency units.
///
/// Positive amounts were paid by the participant, negative amounts are owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Share {
    /// Participant this share belongs to
    pub user_id: UserId,
    /// Signed amount in minor units
    pub amount: i64,
}

impl Share {
    /// Create a share.
    pub fn new(user_id: UserId, amount: i64) -> Self {
        Self { user_id, amount }
    }
}

/// A spending recorded in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spending {
    /// Spending identifier
    pub id: SpendingId,
    /// Group the spending belongs to
    pub group_id: GroupId,
    /// Free-form description
    pub title: String,
    /// How the amount is split between participants
    pub shares: Vec<Share>,
}

/// An uploaded image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier
    pub id: ImageId,
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    /// Raw image bytes
    pub data: Vec<u8>,
    /// SHA-256 of `data`
    pub digest: ContentDigest,
}

impl Image {
    /// Create an image, computing its digest.
    pub fn new(id: ImageId, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        let digest = content_digest(&data);
        Self {
            id,
            media_type: media_type.into(),
            data,
            digest,
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("data", &format!("[{} bytes]", self.data.len()))
            .finish()
    }
}
