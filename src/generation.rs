use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tantivy::Opstamp;

/// The "as-of" point of a mutation.
///
/// Generations are derived from the engine's operation stamps, so they are
/// never reused, even across restarts. The engine stamps an operation with
/// the counter value *before* incrementing it, and a commit made at stamp
/// `c` covers every operation stamped below `c`. A mutation stamped `s` is
/// therefore generation `s + 1`, and a commit at `c` covers generation `c`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Generation of a mutation the engine stamped with `stamp`.
    pub const fn of_mutation(stamp: Opstamp) -> Self {
        Self(stamp + 1)
    }

    /// Highest generation covered by a commit made at `stamp`.
    pub const fn of_commit(stamp: Opstamp) -> Self {
        Self(stamp)
    }
}


impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks how far the writer has stamped and how far it has committed.
#[derive(Debug)]
pub struct GenerationClock {
    stamped: AtomicU64,
    committed: AtomicU64,
}

impl GenerationClock {
    /// Start a clock where everything up to `start` is already committed.
    pub fn new(start: Generation) -> Self {
        Self {
            stamped: AtomicU64::new(start.get()),
            committed: AtomicU64::new(start.get()),
        }
    }

    /// Record a mutation stamp handed out by the engine and return its
    /// generation.
    pub fn observe(&self, stamp: Opstamp) -> Generation {
        let generation = Generation::of_mutation(stamp);
        self.stamped.fetch_max(generation.get(), Ordering::AcqRel);
        generation
    }

    pub fn last_stamped(&self) -> Generation {
        Generation(self.stamped.load(Ordering::Acquire))
    }

    pub fn committed(&self) -> Generation {
        Generation(self.committed.load(Ordering::Acquire))
    }

    pub fn has_pending(&self) -> bool {
        self.last_stamped() > self.committed()
    }

    pub fn mark_committed(&self, generation: Generation) {
        self.committed.fetch_max(generation.get(), Ordering::AcqRel);
    }
}
