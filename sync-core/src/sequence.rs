//! Ordered-sequence CRDT.
//!
//! A replicated ordered set of ids (group lists, participant lists, spending
//! lists). Each insert names the element it goes after; the sequence is the
//! pre-order walk of the resulting tree with siblings ordered newest first,
//! as in an RGA. Removed elements stay in the tree so that elements anchored
//! to them keep their place.
//!
//! Two replicas that have applied the same inserts and removes, in any order,
//! produce the same [`Sequence::elements`].

use std::collections::{BTreeMap, BTreeSet};

use sync_types::Stamp;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node<T> {
    after: Option<T>,
    inserted: Stamp,
}

/// Map from anchor to the elements inserted right after it, newest first.
type Children<T> = BTreeMap<Option<T>, Vec<(Stamp, T)>>;

/// Replicated ordered collection of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence<T: Ord + Copy> {
    nodes: BTreeMap<T, Node<T>>,
    /// Latest remove seen per id. Kept even for ids not inserted yet.
    removed: BTreeMap<T, Stamp>,
}

impl<T: Ord + Copy> Default for Sequence<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }
}

impl<T: Ord + Copy> Sequence<T> {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` right after `after` (`None` = at the head).
    ///
    /// Inserting an id again with a later stamp moves it. Returns true if
    /// the sequence changed.
    pub fn insert(&mut self, id: T, after: Option<T>, stamp: Stamp) -> bool {
        let after = after.filter(|anchor| *anchor != id);
        match self.nodes.get(&id) {
            Some(node) if node.inserted >= stamp => false,
            _ => {
                self.nodes.insert(
                    id,
                    Node {
                        after,
                        inserted: stamp,
                    },
                );
                true
            }
        }
    }

    /// Remove `id`. Returns true if the remove is newer than any seen before.
    pub fn remove(&mut self, id: T, stamp: Stamp) -> bool {
        match self.removed.get(&id) {
            Some(existing) if *existing >= stamp => false,
            _ => {
                self.removed.insert(id, stamp);
                true
            }
        }
    }

    /// True if `id` is currently part of the sequence.
    pub fn contains(&self, id: &T) -> bool {
        self.nodes.get(id).is_some_and(|node| {
            self.removed
                .get(id)
                .map_or(true, |removed| *removed < node.inserted)
        })
    }

    /// True if `id` was ever inserted or removed.
    pub fn knows(&self, id: &T) -> bool {
        self.nodes.contains_key(id) || self.removed.contains_key(id)
    }

    /// Visible elements in converged order.
    pub fn elements(&self) -> Vec<T> {
        let mut children: Children<T> = BTreeMap::new();
        for (id, node) in &self.nodes {
            // Anchors we have not seen yet hang at the head until they arrive.
            let parent = node.after.filter(|anchor| self.nodes.contains_key(anchor));
            children
                .entry(parent)
                .or_default()
                .push((node.inserted, *id));
        }
        for siblings in children.values_mut() {
            siblings.sort_unstable_by(|a, b| b.cmp(a));
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = BTreeSet::new();
        walk(None, &children, &mut visited, &mut order);

        // Anchor cycles (possible after concurrent moves) are unreachable from
        // the head; append them newest first so every replica agrees.
        if visited.len() < self.nodes.len() {
            let mut stranded: Vec<(Stamp, T)> = self
                .nodes
                .iter()
                .filter(|(id, _)| !visited.contains(*id))
                .map(|(id, node)| (node.inserted, *id))
                .collect();
            stranded.sort_unstable_by(|a, b| b.cmp(a));
            for (_, id) in stranded {
                if visited.insert(id) {
                    order.push(id);
                    walk(Some(id), &children, &mut visited, &mut order);
                }
            }
        }

        order.retain(|id| self.contains(id));
        order
    }

    /// Last visible element, used as the anchor for appends.
    pub fn last(&self) -> Option<T> {
        self.elements().last().copied()
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.nodes.keys().filter(|id| self.contains(id)).count()
    }

    /// True if no element is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pre-order walk of the subtree below `start`, newest sibling first.
fn walk<T: Ord + Copy>(
    start: Option<T>,
    children: &Children<T>,
    visited: &mut BTreeSet<T>,
    order: &mut Vec<T>,
) {
    let mut stack: Vec<T> = children
        .get(&start)
        .map(|kids| kids.iter().rev().map(|(_, id)| *id).collect())
        .unwrap_or_default();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        order.push(id);
        if let Some(kids) = children.get(&Some(id)) {
            stack.extend(kids.iter().rev().map(|(_, kid)| *kid));
        }
    }
}
