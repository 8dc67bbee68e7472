//! Reducer abstraction shared by the three domains.
//!
//! A domain state is folded from the operation log one operation at a time.
//! `apply` is total: operations for unknown ids, duplicates and unknown
//! mutation kinds degrade to no-ops, never errors. Every implementation
//! matches all [`Payload`](sync_types::Payload) variants explicitly, so a new
//! mutation kind fails to compile until each domain decides what it means.
//!
//! Observers are not told "something changed". Each domain renders a
//! comparable [`Reducer::View`] for one viewer and [`Reducer::diff`] turns two views into one
//! change per changed aggregate.

use std::collections::{BTreeMap, BTreeSet};

use sync_types::{Operation, UserId};

/// Pure fold of operations into a domain state.
pub trait Reducer: Default + Clone + Send + Sync + 'static {
    /// Comparable snapshot of everything observers can query.
    type View: Clone + PartialEq + Send + Sync;

    /// Fine-grained change event.
    type Change: Clone + std::fmt::Debug + PartialEq + Send + Sync;

    /// Fold one operation into the state.
    fn apply(&mut self, operation: &Operation);

    /// Render the queryable snapshot as `viewer` sees it.
    ///
    /// Queries scoped to the current user (such as "my groups") must be
    /// rendered for that user, or their list events fire for the wrong reader.
    fn view(&self, viewer: &UserId) -> Self::View;

    /// Changes between two snapshots, one per changed aggregate.
    fn diff(old: &Self::View, new: &Self::View) -> Vec<Self::Change>;

    /// `(Operation, State) -> State` form of [`Reducer::apply`].
    fn reduce(mut self, operation: &Operation) -> Self {
        self.apply(operation);
        self
    }

    /// Fold a whole log starting from the empty state.
    fn fold<'a>(operations: impl IntoIterator<Item = &'a Operation>) -> Self {
        operations.into_iter().fold(Self::default(), Self::reduce)
    }
}

/// Keys whose values differ between two maps (added, removed or changed).
pub(crate) fn changed_keys<K: Ord + Copy, V: PartialEq>(
    old: &BTreeMap<K, V>,
    new: &BTreeMap<K, V>,
) -> Vec<K> {
    let keys: BTreeSet<K> = old.keys().chain(new.keys()).copied().collect();
    keys.into_iter()
        .filter(|key| old.get(key) != new.get(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_keys_covers_added_removed_and_changed() {
        let old: BTreeMap<u8, &str> = [(1, "a"), (2, "b"), (3, "c")].into_iter().collect();
        let new: BTreeMap<u8, &str> = [(2, "b"), (3, "C"), (4, "d")].into_iter().collect();
        assert_eq!(changed_keys(&old, &new), vec![1, 3, 4]);
    }

    #[test]
    fn changed_keys_empty_when_equal() {
        let map: BTreeMap<u8, u8> = [(1, 1)].into_iter().collect();
        assert!(changed_keys(&map, &map.clone()).is_empty());
    }
}
