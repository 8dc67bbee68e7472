//! Shared helpers for unit tests.

use sync_types::{
    GroupId, ImageId, Operation, OperationId, Payload, SpendingId, Stamp, UserId, ID_LEN,
};

pub fn user(n: u8) -> UserId {
    UserId::from_array([n; ID_LEN])
}

pub fn group(n: u8) -> GroupId {
    GroupId::from_array([n; ID_LEN])
}

pub fn spending(n: u8) -> SpendingId {
    SpendingId::from_array([n; ID_LEN])
}

pub fn image(n: u8) -> ImageId {
    ImageId::from_array([n; ID_LEN])
}

pub fn op_id(n: u8) -> OperationId {
    OperationId::from_array([n; ID_LEN])
}

/// Stamp authored by user 1.
pub fn stamp(created_at: u64, op: u8) -> Stamp {
    Stamp {
        created_at,
        author: user(1),
        operation: op_id(op),
    }
}

/// Operation `n` authored by `author` at `created_at`.
pub fn op(n: u8, created_at: u64, author: u8, payload: Payload) -> Operation {
    Operation::new(op_id(n), created_at, user(author), payload)
}

/// Every ordering of `items`.
pub fn permutations<X>(items: &[X]) -> Vec<Vec<&X>> {
    fn go(remaining: Vec<usize>, prefix: Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if remaining.is_empty() {
            out.push(prefix);
            return;
        }
        for i in 0..remaining.len() {
            let mut rest = remaining.clone();
            let next = rest.remove(i);
            let mut extended = prefix.clone();
            extended.push(next);
            go(rest, extended, out);
        }
    }

    let mut out = Vec::new();
    go((0..items.len()).collect(), Vec::new(), &mut out);
    out.into_iter()
        .map(|perm| perm.into_iter().map(|i| &items[i]).collect())
        .collect()
}
