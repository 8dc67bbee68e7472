//! Identifier issuance.
//!
//! Ids are minted client-side, offline, by sampling 128 random bits and
//! resampling while the caller reports the candidate as reserved (already
//! used by an entity or an operation in the log). Resampling is capped so a
//! broken `is_reserved` predicate fails loudly instead of spinning forever.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sync_types::RandomId;
use thiserror::Error;

/// Default number of candidates sampled before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Errors from [`IdIssuer::next_id`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    /// Every sampled candidate was reserved.
    #[error("no free identifier after {attempts} attempts")]
    Exhausted {
        /// Number of candidates sampled.
        attempts: u32,
    },
}

/// Mints identifiers that do not collide with anything reserved.
#[derive(Debug)]
pub struct IdIssuer<R = StdRng> {
    rng: R,
    max_attempts: u32,
}

impl IdIssuer<StdRng> {
    /// Create an issuer seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for IdIssuer<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> IdIssuer<R> {
    /// Create an issuer drawing from the given random source.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the resampling cap (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Current resampling cap.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Mint an id for which `is_reserved` returns false.
    pub fn next_id<I: RandomId>(
        &mut self,
        mut is_reserved: impl FnMut(&I) -> bool,
    ) -> Result<I, IssueError> {
        for _ in 0..self.max_attempts {
            let candidate = I::generate(&mut self.rng);
            if !is_reserved(&candidate) {
                return Ok(candidate);
            }
        }
        Err(IssueError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use sync_types::{GroupId, SpendingId, UserId};

    fn seeded(seed: u64) -> IdIssuer<StdRng> {
        IdIssuer::with_rng(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn never_returns_reserved_id() {
        let mut reserved: HashSet<SpendingId> = HashSet::new();
        let mut filler = seeded(1);
        for _ in 0..1_000 {
            reserved.insert(filler.next_id(|_| false).unwrap());
        }

        let mut issuer = seeded(2);
        for _ in 0..10_000 {
            let id: SpendingId = issuer.next_id(|id| reserved.contains(id)).unwrap();
            assert!(!reserved.contains(&id));
            reserved.insert(id);
        }
    }

    #[test]
    fn resamples_on_collision() {
        // The first candidate a seed-5 issuer draws is reserved up front.
        let first: GroupId = seeded(5).next_id(|_| false).unwrap();

        let mut issuer = seeded(5);
        let mut checked = 0;
        let id: GroupId = issuer
            .next_id(|candidate| {
                checked += 1;
                *candidate == first
            })
            .unwrap();

        assert_ne!(id, first);
        assert_eq!(checked, 2);
    }

    #[test]
    fn gives_up_after_cap() {
        let mut issuer = seeded(9).with_max_attempts(16);
        let mut calls = 0;
        let result: Result<UserId, _> = issuer.next_id(|_| {
            calls += 1;
            true
        });

        assert_eq!(result, Err(IssueError::Exhausted { attempts: 16 }));
        assert_eq!(calls, 16);
    }

    #[test]
    fn zero_cap_still_tries_once() {
        let issuer = seeded(0).with_max_attempts(0);
        assert_eq!(issuer.max_attempts(), 1);
    }

    #[test]
    fn os_seeded_issuers_diverge() {
        let a: UserId = IdIssuer::new().next_id(|_| false).unwrap();
        let b: UserId = IdIssuer::new().next_id(|_| false).unwrap();
        assert_ne!(a, b);
    }
}
