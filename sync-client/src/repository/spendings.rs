//! Spending groups and spendings repository.
//!
//! Every mutation requires the engine author to be a participant of the
//! target group. Group creation always adds the author as the first
//! participant.

use std::collections::BTreeMap;

use sync_core::{IdIssuer, IssueError, SpendingsChange, SpendingsState};
use sync_types::{GroupId, Payload, Share, Spending, SpendingGroup, SpendingId, UserId};
use thiserror::Error;
use tokio::sync::broadcast;

use super::{author_operation, Replica};
use crate::engine::{SyncEngine, SyncError};
use crate::store::OperationStore;
use crate::transport::Transport;

/// Spendings repository errors.
#[derive(Debug, Error)]
pub enum SpendingsError {
    /// No live group with this id.
    #[error("spending group {0} not found")]
    GroupNotFound(GroupId),

    /// The current user does not participate in the group.
    #[error("not a member of spending group {0}")]
    NotAMember(GroupId),

    /// A share names a user outside the group.
    #[error("user {user_id} is not a participant of spending group {group_id}")]
    ParticipantNotFound {
        /// Target group
        group_id: GroupId,
        /// Offending user
        user_id: UserId,
    },

    /// No live spending with this id in the group.
    #[error("spending {0} not found")]
    SpendingNotFound(SpendingId),

    /// The user already participates in the group.
    #[error("user {0} is already a participant")]
    AlreadyParticipant(UserId),

    /// A spending needs at least one share.
    #[error("spending has no shares")]
    EmptySplit,

    /// Shares of a spending must sum to zero.
    #[error("shares do not balance (total {total})")]
    Unbalanced {
        /// Sum of all share amounts
        total: i64,
    },

    /// Group names must not be blank.
    #[error("group name is empty")]
    EmptyName,

    /// Could not mint a fresh id.
    #[error(transparent)]
    Issue(#[from] IssueError),

    /// The engine could not record the operation.
    #[error("internal error: {0}")]
    Internal(#[from] SyncError),
}

/// Query and mutate spending groups and their spendings.
pub struct SpendingsRepository<T, S> {
    engine: SyncEngine<T, S>,
    replica: Replica<SpendingsState>,
}

impl<T, S> SpendingsRepository<T, S>
where
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    /// Fold the engine's log and follow its updates.
    pub async fn open(engine: &SyncEngine<T, S>) -> Self {
        Self {
            engine: engine.clone(),
            replica: Replica::open(engine, "spendings").await,
        }
    }

    /// Look up a group.
    pub fn group(&self, id: &GroupId) -> Option<SpendingGroup> {
        self.replica.read(|state| state.group(id))
    }

    /// Groups the current user participates in, in list order.
    pub fn groups(&self) -> Vec<SpendingGroup> {
        let author = self.engine.author();
        self.replica.read(|state| state.groups_of(&author))
    }

    /// Participants of a group, in list order.
    pub fn participants(&self, group: &GroupId) -> Vec<UserId> {
        self.replica.read(|state| state.participants(group))
    }

    /// Spendings of a group, in list order.
    pub fn spendings(&self, group: &GroupId) -> Vec<Spending> {
        self.replica.read(|state| state.spendings(group))
    }

    /// Look up a spending.
    pub fn spending(&self, group: &GroupId, id: &SpendingId) -> Option<Spending> {
        self.replica.read(|state| state.spending(group, id))
    }

    /// Net amount per participant of a group.
    pub fn balances(&self, group: &GroupId) -> BTreeMap<UserId, i64> {
        self.replica.read(|state| state.balances(group))
    }

    /// Subscribe to change events.
    pub fn changes(&self) -> broadcast::Receiver<SpendingsChange> {
        self.replica.changes()
    }

    /// Create a group. The current user is added as the first participant.
    pub async fn create_spending_group(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> Result<SpendingGroup, SpendingsError> {
        let name = non_empty(name).ok_or(SpendingsError::EmptyName)?;
        let mut issuer = self.replica.writer().await;

        let author = self.engine.author();
        let mut members = vec![author];
        for user in participants {
            if !members.contains(user) {
                members.push(*user);
            }
        }

        let group_id: GroupId =
            issuer.next_id(|id| self.replica.read(|state| state.knows_group(id)))?;
        let after = self.replica.read(SpendingsState::last_group);
        let operation = author_operation(
            &self.engine,
            &mut issuer,
            Payload::CreateSpendingGroup {
                group_id,
                name,
                participants: members,
                after,
            },
        )
        .await?;
        self.engine.push(operation.clone()).await?;
        self.replica.fold_local(&operation);

        tracing::debug!(group = %group_id, "Created spending group");
        self.group(&group_id)
            .ok_or(SpendingsError::GroupNotFound(group_id))
    }

    /// Rename a group.
    pub async fn rename_spending_group(
        &self,
        group_id: &GroupId,
        name: &str,
    ) -> Result<SpendingGroup, SpendingsError> {
        let name = non_empty(name).ok_or(SpendingsError::EmptyName)?;
        let mut issuer = self.replica.writer().await;
        self.check_member(group_id)?;

        self.submit(
            &mut issuer,
            Payload::RenameSpendingGroup {
                group_id: *group_id,
                name,
            },
        )
        .await?;

        self.group(group_id)
            .ok_or(SpendingsError::GroupNotFound(*group_id))
    }

    /// Append a participant to a group. Returns the new participant list.
    pub async fn add_participant(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<Vec<UserId>, SpendingsError> {
        let mut issuer = self.replica.writer().await;
        self.check_member(group_id)?;

        if self.replica.read(|state| state.is_participant(group_id, user_id)) {
            return Err(SpendingsError::AlreadyParticipant(*user_id));
        }

        let after = self.replica.read(|state| state.last_participant(group_id));
        self.submit(
            &mut issuer,
            Payload::AddGroupParticipant {
                group_id: *group_id,
                user_id: *user_id,
                after,
            },
        )
        .await?;

        Ok(self.participants(group_id))
    }

    /// Delete a group and, with it, all of its spendings.
    pub async fn delete_spending_group(&self, group_id: &GroupId) -> Result<(), SpendingsError> {
        let mut issuer = self.replica.writer().await;
        self.check_member(group_id)?;

        self.submit(
            &mut issuer,
            Payload::DeleteSpendingGroup {
                group_id: *group_id,
            },
        )
        .await
    }

    /// Record a spending.
    ///
    /// Shares must be non-empty, name only participants of the group and
    /// sum to zero.
    pub async fn create_spending(
        &self,
        group_id: &GroupId,
        title: &str,
        shares: Vec<Share>,
    ) -> Result<Spending, SpendingsError> {
        if shares.is_empty() {
            return Err(SpendingsError::EmptySplit);
        }
        let total = shares
            .iter()
            .fold(0i64, |sum, share| sum.saturating_add(share.amount));
        if total != 0 {
            return Err(SpendingsError::Unbalanced { total });
        }

        let mut issuer = self.replica.writer().await;
        self.check_member(group_id)?;

        let stranger = self.replica.read(|state| {
            shares
                .iter()
                .map(|share| share.user_id)
                .find(|user| !state.is_participant(group_id, user))
        });
        if let Some(user_id) = stranger {
            return Err(SpendingsError::ParticipantNotFound {
                group_id: *group_id,
                user_id,
            });
        }

        let spending_id: SpendingId =
            issuer.next_id(|id| self.replica.read(|state| state.knows_spending(id)))?;
        let after = self.replica.read(|state| state.last_spending(group_id));
        self.submit(
            &mut issuer,
            Payload::CreateSpending {
                group_id: *group_id,
                spending_id,
                title: title.trim().to_string(),
                shares,
                after,
            },
        )
        .await?;

        tracing::debug!(group = %group_id, spending = %spending_id, "Created spending");
        self.spending(group_id, &spending_id)
            .ok_or(SpendingsError::SpendingNotFound(spending_id))
    }

    /// Delete a spending.
    pub async fn delete_spending(
        &self,
        group_id: &GroupId,
        spending_id: &SpendingId,
    ) -> Result<(), SpendingsError> {
        let mut issuer = self.replica.writer().await;
        self.check_member(group_id)?;

        if self.spending(group_id, spending_id).is_none() {
            return Err(SpendingsError::SpendingNotFound(*spending_id));
        }

        self.submit(
            &mut issuer,
            Payload::DeleteSpending {
                group_id: *group_id,
                spending_id: *spending_id,
            },
        )
        .await
    }

    fn check_member(&self, group_id: &GroupId) -> Result<(), SpendingsError> {
        let author = self.engine.author();
        self.replica.read(|state| {
            if state.group(group_id).is_none() {
                Err(SpendingsError::GroupNotFound(*group_id))
            } else if !state.is_participant(group_id, &author) {
                Err(SpendingsError::NotAMember(*group_id))
            } else {
                Ok(())
            }
        })
    }

    async fn submit(
        &self,
        issuer: &mut IdIssuer,
        payload: Payload,
    ) -> Result<(), SpendingsError> {
        let operation = author_operation(&self.engine, issuer, payload).await?;
        self.engine.push(operation.clone()).await?;
        self.replica.fold_local(&operation);
        Ok(())
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use std::sync::Arc;
    use std::time::Duration;
    use sync_core::Reducer;
    use sync_types::{Operation, OperationId, ID_LEN};

    struct Fixture {
        transport: MockTransport,
        engine: SyncEngine<MockTransport, MemoryStore>,
        spendings: SpendingsRepository<MockTransport, MemoryStore>,
    }

    fn me() -> UserId {
        UserId::from_array([1; ID_LEN])
    }

    fn bob() -> UserId {
        UserId::from_array([2; ID_LEN])
    }

    fn carol() -> UserId {
        UserId::from_array([3; ID_LEN])
    }

    async fn setup() -> Fixture {
        let transport = MockTransport::new();
        let config = SyncConfig::default()
            .with_push_on_write(false)
            .with_retry(RetryConfig::disabled())
            .with_poll_interval(Duration::from_secs(3600));
        let engine = SyncEngine::open(
            me(),
            transport.clone(),
            MemoryStore::new(),
            Arc::new(ManualClock::new(1_000)),
            config,
        )
        .await
        .unwrap();
        let spendings = SpendingsRepository::open(&engine).await;
        Fixture {
            transport,
            engine,
            spendings,
        }
    }

    // ===========================================
    // Groups
    // ===========================================

    #[tokio::test]
    async fn create_group_adds_author_first() {
        let f = setup().await;

        let group = f
            .spendings
            .create_spending_group(" Trip ", &[bob(), me(), bob()])
            .await
            .unwrap();

        assert_eq!(group.name, "Trip");
        assert_eq!(f.spendings.participants(&group.id), vec![me(), bob()]);
        assert_eq!(f.spendings.groups(), vec![group]);
    }

    #[tokio::test]
    async fn groups_keep_creation_order() {
        let f = setup().await;

        let first = f.spendings.create_spending_group("One", &[]).await.unwrap();
        let second = f.spendings.create_spending_group("Two", &[]).await.unwrap();

        let ids: Vec<GroupId> = f.spendings.groups().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn groups_only_lists_own_groups() {
        let f = setup().await;
        let foreign = GroupId::from_array([7; ID_LEN]);
        f.transport.queue_pull(vec![Operation::new(
            OperationId::from_array([70; ID_LEN]),
            10,
            bob(),
            Payload::CreateSpendingGroup {
                group_id: foreign,
                name: "Bob's".into(),
                participants: vec![bob()],
                after: None,
            },
        )]);
        let mut changes = f.spendings.changes();
        f.engine.poll().await.unwrap();
        // Someone else's group is not part of my list
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::GroupChanged(foreign)
        );

        assert!(f.spendings.group(&foreign).is_some());
        assert!(f.spendings.groups().is_empty());
        assert!(matches!(
            f.spendings.rename_spending_group(&foreign, "Mine").await,
            Err(SpendingsError::NotAMember(id)) if id == foreign
        ));
    }

    #[tokio::test]
    async fn being_added_to_a_foreign_group_changes_the_list() {
        let f = setup().await;
        let foreign = GroupId::from_array([7; ID_LEN]);
        f.transport.queue_pull(vec![Operation::new(
            OperationId::from_array([70; ID_LEN]),
            10,
            bob(),
            Payload::CreateSpendingGroup {
                group_id: foreign,
                name: "Bob's".into(),
                participants: vec![bob()],
                after: None,
            },
        )]);
        let mut changes = f.spendings.changes();
        f.engine.poll().await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::GroupChanged(foreign)
        );
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::SpendingListChanged(foreign)
        );
        assert!(f.spendings.groups().is_empty());

        f.transport.queue_pull(vec![Operation::new(
            OperationId::from_array([71; ID_LEN]),
            11,
            bob(),
            Payload::AddGroupParticipant {
                group_id: foreign,
                user_id: me(),
                after: Some(bob()),
            },
        )]);
        f.engine.poll().await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), SpendingsChange::GroupListChanged);
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::GroupChanged(foreign)
        );
        let ids: Vec<GroupId> = f.spendings.groups().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![foreign]);
        assert_eq!(f.spendings.participants(&foreign), vec![bob(), me()]);
    }

    #[tokio::test]
    async fn rename_and_add_participant() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();

        let renamed = f
            .spendings
            .rename_spending_group(&group.id, "Road trip")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Road trip");

        let participants = f.spendings.add_participant(&group.id, &carol()).await.unwrap();
        assert_eq!(participants, vec![me(), bob(), carol()]);

        assert!(matches!(
            f.spendings.add_participant(&group.id, &bob()).await,
            Err(SpendingsError::AlreadyParticipant(id)) if id == bob()
        ));
    }

    #[tokio::test]
    async fn delete_group_hides_it() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();
        let mut changes = f.spendings.changes();

        f.spendings.delete_spending_group(&group.id).await.unwrap();

        assert!(f.spendings.group(&group.id).is_none());
        assert!(f.spendings.groups().is_empty());
        assert_eq!(changes.recv().await.unwrap(), SpendingsChange::GroupListChanged);
        assert!(matches!(
            f.spendings.delete_spending_group(&group.id).await,
            Err(SpendingsError::GroupNotFound(_))
        ));
    }

    // ===========================================
    // Spendings
    // ===========================================

    #[tokio::test]
    async fn create_spending_is_visible_immediately() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();

        let spending = f
            .spendings
            .create_spending(&group.id, "Dinner", vec![Share::new(me(), 30), Share::new(bob(), -30)])
            .await
            .unwrap();

        assert_eq!(spending.title, "Dinner");
        assert_eq!(spending.group_id, group.id);
        assert_eq!(f.spendings.spendings(&group.id), vec![spending.clone()]);
        assert_eq!(
            f.spendings.spending(&group.id, &spending.id),
            Some(spending)
        );
        let balances = f.spendings.balances(&group.id);
        assert_eq!(balances.get(&me()), Some(&30));
        assert_eq!(balances.get(&bob()), Some(&-30));
    }

    #[tokio::test]
    async fn optimistic_state_matches_a_fresh_fold() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();
        let first = f
            .spendings
            .create_spending(&group.id, "Taxi", vec![Share::new(me(), 10), Share::new(bob(), -10)])
            .await
            .unwrap();
        f.spendings
            .create_spending(&group.id, "Lunch", vec![Share::new(bob(), 8), Share::new(me(), -8)])
            .await
            .unwrap();
        f.spendings.delete_spending(&group.id, &first.id).await.unwrap();

        let folded = SpendingsState::fold(&f.engine.operations().await);
        assert_eq!(f.spendings.spendings(&group.id), folded.spendings(&group.id));
        assert_eq!(f.spendings.participants(&group.id), folded.participants(&group.id));
        assert_eq!(f.spendings.balances(&group.id), folded.balances(&group.id));
    }

    #[tokio::test]
    async fn spending_validation_writes_nothing() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();
        let before = f.engine.operations().await.len();
        let missing = GroupId::from_array([9; ID_LEN]);

        assert!(matches!(
            f.spendings.create_spending(&group.id, "Nothing", vec![]).await,
            Err(SpendingsError::EmptySplit)
        ));
        assert!(matches!(
            f.spendings
                .create_spending(&group.id, "Gift", vec![Share::new(me(), 5)])
                .await,
            Err(SpendingsError::Unbalanced { total: 5 })
        ));
        assert!(matches!(
            f.spendings
                .create_spending(&group.id, "Taxi", vec![Share::new(me(), 5), Share::new(carol(), -5)])
                .await,
            Err(SpendingsError::ParticipantNotFound { user_id, .. }) if user_id == carol()
        ));
        assert!(matches!(
            f.spendings
                .create_spending(&missing, "Taxi", vec![Share::new(me(), 5), Share::new(bob(), -5)])
                .await,
            Err(SpendingsError::GroupNotFound(id)) if id == missing
        ));
        assert!(matches!(
            f.spendings
                .delete_spending(&group.id, &SpendingId::from_array([9; ID_LEN]))
                .await,
            Err(SpendingsError::SpendingNotFound(_))
        ));
        assert!(matches!(
            f.spendings.create_spending_group("  ", &[]).await,
            Err(SpendingsError::EmptyName)
        ));

        assert_eq!(f.engine.operations().await.len(), before);
    }

    #[tokio::test]
    async fn group_spending_scenario_emits_fine_grained_changes() {
        let f = setup().await;
        let group = f.spendings.create_spending_group("Trip", &[bob()]).await.unwrap();
        let mut changes = f.spendings.changes();

        let spending = f
            .spendings
            .create_spending(&group.id, "Dinner", vec![Share::new(me(), 20), Share::new(bob(), -20)])
            .await
            .unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::SpendingListChanged(group.id)
        );
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::SpendingChanged {
                group_id: group.id,
                spending_id: spending.id,
            }
        );

        f.spendings.delete_spending(&group.id, &spending.id).await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::SpendingListChanged(group.id)
        );
        assert_eq!(
            changes.recv().await.unwrap(),
            SpendingsChange::SpendingChanged {
                group_id: group.id,
                spending_id: spending.id,
            }
        );

        assert!(f.spendings.spendings(&group.id).is_empty());
        assert_eq!(f.spendings.balances(&group.id).get(&me()), Some(&0));
    }
}
