//! Spending groups and spendings: state, reducer and change events.
//!
//! State layout:
//! - `groups_order` / `groups`: the group list and each group's lifecycle + name
//! - `participants_order` / `participants`: per-group member list, keyed by `(group, user)`
//! - `spendings_order` / `spendings`: per-group spending list, keyed by `(group, spending)`
//!
//! Range queries walk the order and resolve each id against its register,
//! silently dropping ids whose register is absent or deleted.

use std::collections::BTreeMap;

use sync_types::{
    GroupId, Operation, Payload, Spending, SpendingGroup, SpendingId, Stamp, UserId,
};

use crate::reducer::{changed_keys, Reducer};
use crate::register::Register;
use crate::sequence::Sequence;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GroupRecord {
    lifecycle: Register<()>,
    name: Register<String>,
}

/// Materialized spending-groups state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendingsState {
    groups_order: Sequence<GroupId>,
    groups: BTreeMap<GroupId, GroupRecord>,
    participants_order: BTreeMap<GroupId, Sequence<UserId>>,
    participants: BTreeMap<(GroupId, UserId), Register<()>>,
    spendings_order: BTreeMap<GroupId, Sequence<SpendingId>>,
    spendings: BTreeMap<(GroupId, SpendingId), Register<Spending>>,
}

/// Change events for the spendings domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendingsChange {
    /// Groups were added to or removed from the viewer's group list.
    GroupListChanged,
    /// A group's metadata or participant list changed.
    GroupChanged(GroupId),
    /// A group's spending list changed.
    SpendingListChanged(GroupId),
    /// A spending's value changed (created or deleted).
    SpendingChanged {
        /// Owning group
        group_id: GroupId,
        /// Changed spending
        spending_id: SpendingId,
    },
}

/// Comparable snapshot of [`SpendingsState`].
///
/// `groups` is the viewer's own group list; details cover every live group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendingsView {
    groups: Vec<GroupId>,
    details: BTreeMap<GroupId, (SpendingGroup, Vec<UserId>)>,
    spending_lists: BTreeMap<GroupId, Vec<SpendingId>>,
    spendings: BTreeMap<(GroupId, SpendingId), Spending>,
}

impl SpendingsState {
    /// Look up a live group.
    pub fn group(&self, id: &GroupId) -> Option<SpendingGroup> {
        let record = self.groups.get(id)?;
        record.lifecycle.get()?;
        Some(SpendingGroup {
            id: *id,
            name: record.name.get().cloned().unwrap_or_default(),
        })
    }

    /// All live groups in list order.
    pub fn groups(&self) -> Vec<SpendingGroup> {
        self.groups_order
            .elements()
            .into_iter()
            .filter_map(|id| self.group(&id))
            .collect()
    }

    /// Live groups `user` participates in, in list order.
    pub fn groups_of(&self, user: &UserId) -> Vec<SpendingGroup> {
        self.groups()
            .into_iter()
            .filter(|group| self.is_participant(&group.id, user))
            .collect()
    }

    /// Participants of a live group in list order. Empty for unknown groups.
    pub fn participants(&self, group: &GroupId) -> Vec<UserId> {
        if self.group(group).is_none() {
            return Vec::new();
        }
        self.participants_order
            .get(group)
            .map(|order| {
                order
                    .elements()
                    .into_iter()
                    .filter(|user| self.is_participant(group, user))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if `user` is a participant of `group`.
    pub fn is_participant(&self, group: &GroupId, user: &UserId) -> bool {
        self.participants
            .get(&(*group, *user))
            .is_some_and(|reg| reg.get().is_some())
    }

    /// Live spendings of a live group in list order.
    pub fn spendings(&self, group: &GroupId) -> Vec<Spending> {
        if self.group(group).is_none() {
            return Vec::new();
        }
        self.spendings_order
            .get(group)
            .map(|order| {
                order
                    .elements()
                    .into_iter()
                    .filter_map(|id| self.live_spending(group, &id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a live spending of a live group.
    pub fn spending(&self, group: &GroupId, id: &SpendingId) -> Option<Spending> {
        self.group(group)?;
        self.live_spending(group, id)
    }

    fn live_spending(&self, group: &GroupId, id: &SpendingId) -> Option<Spending> {
        self.spendings.get(&(*group, *id))?.get().cloned()
    }

    /// Net amount per participant over all live spendings of a group.
    ///
    /// Every participant is listed, with zero if they have no shares.
    pub fn balances(&self, group: &GroupId) -> BTreeMap<UserId, i64> {
        let mut balances: BTreeMap<UserId, i64> = self
            .participants(group)
            .into_iter()
            .map(|user| (user, 0))
            .collect();
        for spending in self.spendings(group) {
            for share in spending.shares {
                let entry = balances.entry(share.user_id).or_insert(0);
                *entry = entry.saturating_add(share.amount);
            }
        }
        balances
    }

    /// Last participant in list order, used as the append anchor.
    pub fn last_participant(&self, group: &GroupId) -> Option<UserId> {
        self.participants_order.get(group)?.last()
    }

    /// Last spending in list order, used as the append anchor.
    pub fn last_spending(&self, group: &GroupId) -> Option<SpendingId> {
        self.spendings_order.get(group)?.last()
    }

    /// Last group in list order, used as the append anchor.
    pub fn last_group(&self) -> Option<GroupId> {
        self.groups_order.last()
    }

    /// True if any operation mentioned this group id.
    pub fn knows_group(&self, id: &GroupId) -> bool {
        self.groups.contains_key(id) || self.groups_order.knows(id)
    }

    /// True if any operation mentioned this spending id, in any group.
    pub fn knows_spending(&self, id: &SpendingId) -> bool {
        self.spendings.keys().any(|(_, spending)| spending == id)
    }

    fn add_participant(&mut self, group: GroupId, user: UserId, after: Option<UserId>, stamp: Stamp) {
        self.participants
            .entry((group, user))
            .or_default()
            .write(stamp, ());
        self.participants_order
            .entry(group)
            .or_default()
            .insert(user, after, stamp);
    }
}

impl Reducer for SpendingsState {
    type View = SpendingsView;
    type Change = SpendingsChange;

    fn apply(&mut self, operation: &Operation) {
        let stamp = operation.stamp();
        match operation.payload() {
            Payload::CreateSpendingGroup {
                group_id,
                name,
                participants,
                after,
            } => {
                let record = self.groups.entry(*group_id).or_default();
                record.lifecycle.write(stamp, ());
                record.name.write(stamp, name.clone());
                self.groups_order.insert(*group_id, *after, stamp);

                let mut anchor = None;
                for user in participants {
                    self.add_participant(*group_id, *user, anchor, stamp);
                    anchor = Some(*user);
                }
            }
            Payload::RenameSpendingGroup { group_id, name } => {
                self.groups
                    .entry(*group_id)
                    .or_default()
                    .name
                    .write(stamp, name.clone());
            }
            Payload::AddGroupParticipant {
                group_id,
                user_id,
                after,
            } => {
                self.add_participant(*group_id, *user_id, *after, stamp);
            }
            Payload::DeleteSpendingGroup { group_id } => {
                self.groups
                    .entry(*group_id)
                    .or_default()
                    .lifecycle
                    .delete(stamp);
                self.groups_order.remove(*group_id, stamp);
            }
            Payload::CreateSpending {
                group_id,
                spending_id,
                title,
                shares,
                after,
            } => {
                let spending = Spending {
                    id: *spending_id,
                    group_id: *group_id,
                    title: title.clone(),
                    shares: shares.clone(),
                };
                self.spendings
                    .entry((*group_id, *spending_id))
                    .or_default()
                    .write(stamp, spending);
                self.spendings_order
                    .entry(*group_id)
                    .or_default()
                    .insert(*spending_id, *after, stamp);
            }
            Payload::DeleteSpending {
                group_id,
                spending_id,
            } => {
                self.spendings
                    .entry((*group_id, *spending_id))
                    .or_default()
                    .delete(stamp);
                self.spendings_order
                    .entry(*group_id)
                    .or_default()
                    .remove(*spending_id, stamp);
            }
            Payload::CreateUser { .. }
            | Payload::UpdateDisplayName { .. }
            | Payload::UpdateAvatar { .. }
            | Payload::BindUser { .. }
            | Payload::UploadImage { .. }
            | Payload::Unknown => {}
        }
    }

    fn view(&self, viewer: &UserId) -> SpendingsView {
        let mut view = SpendingsView {
            groups: self.groups_of(viewer).into_iter().map(|g| g.id).collect(),
            ..SpendingsView::default()
        };
        for group in self.groups() {
            let id = group.id;
            view.details.insert(id, (group, self.participants(&id)));
            let spendings = self.spendings(&id);
            view.spending_lists
                .insert(id, spendings.iter().map(|s| s.id).collect());
            for spending in spendings {
                view.spendings.insert((id, spending.id), spending);
            }
        }
        view
    }

    fn diff(old: &SpendingsView, new: &SpendingsView) -> Vec<SpendingsChange> {
        let mut changes = Vec::new();
        if old.groups != new.groups {
            changes.push(SpendingsChange::GroupListChanged);
        }
        changes.extend(
            changed_keys(&old.details, &new.details)
                .into_iter()
                .map(SpendingsChange::GroupChanged),
        );
        changes.extend(
            changed_keys(&old.spending_lists, &new.spending_lists)
                .into_iter()
                .map(SpendingsChange::SpendingListChanged),
        );
        changes.extend(
            changed_keys(&old.spendings, &new.spendings)
                .into_iter()
                .map(|(group_id, spending_id)| SpendingsChange::SpendingChanged {
                    group_id,
                    spending_id,
                }),
        );
        changes
    }
}
