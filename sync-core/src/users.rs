//! Users domain: state, reducer and change events.
//!
//! Each user is a set of independently replicated fields (display name,
//! avatar, login) plus a lifecycle register. Field updates that arrive
//! before the create are kept and surface once the create is folded.

use std::collections::BTreeMap;

use sync_types::{ImageId, Operation, Payload, User, UserId};

use crate::reducer::{changed_keys, Reducer};
use crate::register::Register;
use crate::sequence::Sequence;

/// Replicated fields of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    lifecycle: Register<()>,
    display_name: Register<String>,
    avatar: Register<Option<ImageId>>,
    login: Register<String>,
}

impl UserRecord {
    fn resolve(&self, id: UserId) -> Option<User> {
        self.lifecycle.get()?;
        Some(User {
            id,
            display_name: self.display_name.get().cloned().unwrap_or_default(),
            avatar: self.avatar.get().copied().flatten(),
            login: self.login.get().cloned(),
        })
    }
}

/// Materialized users state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsersState {
    users_order: Sequence<UserId>,
    users: BTreeMap<UserId, UserRecord>,
}

/// Change events for the users domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserChange {
    /// Users were added to or removed from the list.
    ListChanged,
    /// A user's fields changed.
    UserChanged(UserId),
}

/// Comparable snapshot of [`UsersState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsersView {
    order: Vec<UserId>,
    users: BTreeMap<UserId, User>,
}

impl UsersState {
    /// Look up a live user.
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.get(id)?.resolve(*id)
    }

    /// All live users, most recently created first.
    pub fn users(&self) -> Vec<User> {
        self.users_order
            .elements()
            .into_iter()
            .filter_map(|id| self.user(&id))
            .collect()
    }

    /// The live user bound to `login`, if any.
    pub fn find_by_login(&self, login: &str) -> Option<User> {
        self.users()
            .into_iter()
            .find(|user| user.login.as_deref() == Some(login))
    }

    /// True if any operation mentioned this id.
    pub fn knows(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    fn record(&mut self, id: UserId) -> &mut UserRecord {
        self.users.entry(id).or_default()
    }
}

impl Reducer for UsersState {
    type View = UsersView;
    type Change = UserChange;

    fn apply(&mut self, operation: &Operation) {
        let stamp = operation.stamp();
        match operation.payload() {
            Payload::CreateUser {
                user_id,
                display_name,
            } => {
                let record = self.record(*user_id);
                record.lifecycle.write(stamp, ());
                record.display_name.write(stamp, display_name.clone());
                self.users_order.insert(*user_id, None, stamp);
            }
            Payload::UpdateDisplayName {
                user_id,
                display_name,
            } => {
                self.record(*user_id)
                    .display_name
                    .write(stamp, display_name.clone());
            }
            Payload::UpdateAvatar { user_id, avatar } => {
                self.record(*user_id).avatar.write(stamp, *avatar);
            }
            Payload::BindUser { user_id, login } => {
                self.record(*user_id).login.write(stamp, login.clone());
            }
            Payload::CreateSpendingGroup { .. }
            | Payload::RenameSpendingGroup { .. }
            | Payload::AddGroupParticipant { .. }
            | Payload::DeleteSpendingGroup { .. }
            | Payload::CreateSpending { .. }
            | Payload::DeleteSpending { .. }
            | Payload::UploadImage { .. }
            | Payload::Unknown => {}
        }
    }

    fn view(&self, _viewer: &UserId) -> UsersView {
        let order = self.users_order.elements();
        let users = order
            .iter()
            .filter_map(|id| self.user(id).map(|user| (*id, user)))
            .collect();
        UsersView { order, users }
    }

    fn diff(old: &UsersView, new: &UsersView) -> Vec<UserChange> {
        let mut changes = Vec::new();
        if old.order != new.order {
            changes.push(UserChange::ListChanged);
        }
        changes.extend(
            changed_keys(&old.users, &new.users)
                .into_iter()
                .map(UserChange::UserChanged),
        );
        changes
    }
}
