//! Operations - the unit of replication.
//!
//! An [`Operation`] is an immutable description of one mutation. Replicas
//! exchange operations, never state; every replica folds the same set of
//! operations into the same materialized state.

use serde::{Deserialize, Serialize};

use crate::{CodecError, GroupId, ImageId, OperationId, Share, SpendingId, UserId};

/// All mutation kinds.
///
/// Each variant carries exactly what is needed to replay the mutation.
/// The `after` fields are ordered-sequence anchors chosen by the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Create a user
    CreateUser {
        /// New user
        user_id: UserId,
        /// Initial display name
        display_name: String,
    },
    /// Change a user's display name
    UpdateDisplayName {
        /// Target user
        user_id: UserId,
        /// New display name
        display_name: String,
    },
    /// Set or clear a user's avatar
    UpdateAvatar {
        /// Target user
        user_id: UserId,
        /// New avatar image
        avatar: Option<ImageId>,
    },
    /// Bind a local user to an account login
    BindUser {
        /// Target user
        user_id: UserId,
        /// Account login
        login: String,
    },
    /// Create a spending group with its initial participants
    CreateSpendingGroup {
        /// New group
        group_id: GroupId,
        /// Group name
        name: String,
        /// Initial participants, in display order
        participants: Vec<UserId>,
        /// Anchor in the group list
        after: Option<GroupId>,
    },
    /// Rename a spending group
    RenameSpendingGroup {
        /// Target group
        group_id: GroupId,
        /// New name
        name: String,
    },
    /// Add a participant to an existing group
    AddGroupParticipant {
        /// Target group
        group_id: GroupId,
        /// Participant to add
        user_id: UserId,
        /// Anchor in the participant list
        after: Option<UserId>,
    },
    /// Delete a spending group
    DeleteSpendingGroup {
        /// Target group
        group_id: GroupId,
    },
    /// Record a spending in a group
    CreateSpending {
        /// Owning group
        group_id: GroupId,
        /// New spending
        spending_id: SpendingId,
        /// Description
        title: String,
        /// Split between participants
        shares: Vec<Share>,
        /// Anchor in the group's spending list
        after: Option<SpendingId>,
    },
    /// Delete a spending
    DeleteSpending {
        /// Owning group
        group_id: GroupId,
        /// Target spending
        spending_id: SpendingId,
    },
    /// Upload an image
    UploadImage {
        /// New image
        image_id: ImageId,
        /// MIME type
        media_type: String,
        /// Image bytes
        data: Vec<u8>,
    },
    /// A mutation kind this build does not know. Folds as a no-op.
    #[serde(other)]
    Unknown,
}

/// An entity minted by a create payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    /// A user
    User(UserId),
    /// A spending group
    SpendingGroup(GroupId),
    /// A spending
    Spending(SpendingId),
    /// An image
    Image(ImageId),
}

impl Payload {
    /// The entity this payload creates, if it is a create payload.
    pub fn created_entity(&self) -> Option<EntityRef> {
        match self {
            Payload::CreateUser { user_id, .. } => Some(EntityRef::User(*user_id)),
            Payload::CreateSpendingGroup { group_id, .. } => {
                Some(EntityRef::SpendingGroup(*group_id))
            }
            Payload::CreateSpending { spending_id, .. } => Some(EntityRef::Spending(*spending_id)),
            Payload::UploadImage { image_id, .. } => Some(EntityRef::Image(*image_id)),
            Payload::UpdateDisplayName { .. }
            | Payload::UpdateAvatar { .. }
            | Payload::BindUser { .. }
            | Payload::RenameSpendingGroup { .. }
            | Payload::AddGroupParticipant { .. }
            | Payload::DeleteSpendingGroup { .. }
            | Payload::DeleteSpending { .. }
            | Payload::Unknown => None,
        }
    }

    /// Short name of the mutation kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::CreateUser { .. } => "create_user",
            Payload::UpdateDisplayName { .. } => "update_display_name",
            Payload::UpdateAvatar { .. } => "update_avatar",
            Payload::BindUser { .. } => "bind_user",
            Payload::CreateSpendingGroup { .. } => "create_spending_group",
            Payload::RenameSpendingGroup { .. } => "rename_spending_group",
            Payload::AddGroupParticipant { .. } => "add_group_participant",
            Payload::DeleteSpendingGroup { .. } => "delete_spending_group",
            Payload::CreateSpending { .. } => "create_spending",
            Payload::DeleteSpending { .. } => "delete_spending",
            Payload::UploadImage { .. } => "upload_image",
            Payload::Unknown => "unknown",
        }
    }
}

/// Last-writer-wins ordering key of an operation.
///
/// Compares by author timestamp, then author, then operation id, so that
/// every replica picks the same winner independent of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Author-local timestamp in milliseconds
    pub created_at: u64,
    /// Authoring user
    pub author: UserId,
    /// Operation that carried the write
    pub operation: OperationId,
}

/// An immutable, author-issued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    created_at: u64,
    author: UserId,
    payload: Payload,
}

impl Operation {
    /// Create an operation.
    pub fn new(id: OperationId, created_at: u64, author: UserId, payload: Payload) -> Self {
        Self {
            id,
            created_at,
            author,
            payload,
        }
    }

    /// Globally unique operation id.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Author-local timestamp (ms since epoch). Only used as a tie-break.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Issuing user.
    pub fn author(&self) -> UserId {
        self.author
    }

    /// The mutation.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// LWW ordering key for writes carried by this operation.
    pub fn stamp(&self) -> Stamp {
        Stamp {
            created_at: self.created_at,
            author: self.author,
            operation: self.id,
        }
    }

    /// Serialize to MessagePack bytes.
    ///
    /// Field names are kept so that replicas on newer builds can add fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(self).map_err(CodecError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(bytes).map_err(CodecError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ID_LEN;

    fn user(n: u8) -> UserId {
        UserId::from_array([n; ID_LEN])
    }

    fn op(n: u8, created_at: u64, payload: Payload) -> Operation {
        Operation::new(OperationId::from_array([n; ID_LEN]), created_at, user(1), payload)
    }

    #[test]
    fn operation_msgpack_roundtrip() {
        let original = op(
            9,
            1_705_000_000_000,
            Payload::CreateSpending {
                group_id: GroupId::from_array([2; ID_LEN]),
                spending_id: SpendingId::from_array([3; ID_LEN]),
                title: "dinner".into(),
                shares: vec![Share::new(user(1), 500), Share::new(user(2), -500)],
                after: None,
            },
        );

        let bytes = original.to_bytes().unwrap();
        let restored = Operation::from_bytes(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn unknown_kind_decodes_as_unknown() {
        let json = r#"{"kind":"split_evenly","group_id":[1,2,3],"ratio":0.5}"#;
        let payload: Payload = serde_json::from_str(json).unwrap();
        assert_eq!(payload, Payload::Unknown);
    }

    #[test]
    fn payload_uses_snake_case_tag() {
        let payload = Payload::DeleteSpendingGroup {
            group_id: GroupId::from_array([4; ID_LEN]),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "delete_spending_group");
        assert_eq!(payload.kind(), "delete_spending_group");
    }

    #[test]
    fn created_entity_only_for_creates() {
        let group_id = GroupId::from_array([5; ID_LEN]);
        let create = Payload::CreateSpendingGroup {
            group_id,
            name: "trip".into(),
            participants: vec![user(1)],
            after: None,
        };
        assert_eq!(create.created_entity(), Some(EntityRef::SpendingGroup(group_id)));
        assert_eq!(
            Payload::DeleteSpendingGroup { group_id }.created_entity(),
            None
        );
        assert_eq!(Payload::Unknown.created_entity(), None);
    }

    #[test]
    fn stamp_orders_by_time_then_author() {
        let early = Stamp {
            created_at: 10,
            author: user(9),
            operation: OperationId::from_array([9; ID_LEN]),
        };
        let late = Stamp {
            created_at: 11,
            author: user(1),
            operation: OperationId::from_array([1; ID_LEN]),
        };
        let tie = Stamp {
            created_at: 10,
            author: user(10),
            operation: OperationId::from_array([0; ID_LEN]),
        };
        assert!(early < late);
        assert!(early < tie);
    }

    #[test]
    fn corrupt_bytes_fail_to_decode() {
        assert!(matches!(
            Operation::from_bytes(&[0xC1, 0x00]),
            Err(CodecError::Deserialization(_))
        ));
    }
}
