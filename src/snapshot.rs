//! Leased, reference-counted views of the index.
//!
//! The manager owns exactly one *current* snapshot. Refreshing builds a new
//! snapshot and swaps the pointer; snapshots retired by a swap stay fully
//! usable until their last [`Lease`] is dropped, at which point they are
//! torn down.

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Instant,
};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tantivy::{IndexReader, Searcher};
use tracing::debug;

use crate::{
    error::{Error, Result},
    generation::Generation,
    schema::IndexSchema,
    writer::DocumentWriter,
};

/// An immutable point-in-time view of the index at a fixed generation.
pub struct Snapshot {
    serial: u64,
    generation: Generation,
    searcher: Searcher,
    schema: IndexSchema,
    leases: AtomicUsize,
    teardowns: Arc<AtomicU64>,
}

impl Snapshot {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Every mutation at or below this generation is visible here.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Number of leases currently held on this snapshot.
    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.teardowns.fetch_add(1, Ordering::AcqRel);
        debug!(
            serial = self.serial,
            generation = %self.generation,
            "snapshot torn down"
        );
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("serial", &self.serial)
            .field("generation", &self.generation)
            .field("leases", &self.leases())
            .finish_non_exhaustive()
    }
}

/// A borrowed handle to a snapshot, held for the duration of one search.
///
/// Dropping the lease releases it.
#[derive(Debug)]
pub struct Lease {
    snapshot: Arc<Snapshot>,
}

impl Lease {
    fn new(snapshot: Arc<Snapshot>) -> Self {
        snapshot.leases.fetch_add(1, Ordering::AcqRel);
        Self { snapshot }
    }

    pub fn release(self) {}
}

impl Deref for Lease {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let previous = self.snapshot.leases.fetch_sub(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "lease count underflow on snapshot {}",
            self.snapshot.serial
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Refreshing,
    Closed,
}

#[derive(Debug)]
struct RefreshState {
    phase: Phase,
    /// Number of finished refresh attempts.
    completed: u64,
    /// Outcome of the latest attempt, shared with piggybacking callers.
    last_outcome: std::result::Result<bool, String>,
    last_refresh_at: Option<Instant>,
}

/// Counters describing the snapshot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub current_serial: u64,
    pub current_generation: Generation,
    pub current_leases: usize,
    pub refreshes: u64,
    pub torn_down: u64,
}

pub struct SnapshotManager {
    writer: Arc<DocumentWriter>,
    reader: IndexReader,
    schema: IndexSchema,
    current: ArcSwap<Snapshot>,
    state: Mutex<RefreshState>,
    /// Signalled after every refresh attempt and on close.
    refreshed: Condvar,
    closed: AtomicBool,
    serials: AtomicU64,
    teardowns: Arc<AtomicU64>,
}

impl SnapshotManager {
    pub fn new(
        writer: Arc<DocumentWriter>,
        reader: IndexReader,
        schema: IndexSchema,
    ) -> Result<Self> {
        reader.reload()?;
        let teardowns = Arc::new(AtomicU64::new(0));
        let initial = Arc::new(Snapshot {
            serial: 0,
            generation: writer.committed_generation(),
            searcher: reader.searcher(),
            schema: schema.clone(),
            leases: AtomicUsize::new(0),
            teardowns: Arc::clone(&teardowns),
        });

        Ok(Self {
            writer,
            reader,
            schema,
            current: ArcSwap::new(initial),
            state: Mutex::new(RefreshState {
                phase: Phase::Idle,
                completed: 0,
                last_outcome: Ok(false),
                last_refresh_at: None,
            }),
            refreshed: Condvar::new(),
            closed: AtomicBool::new(false),
            serials: AtomicU64::new(1),
            teardowns,
        })
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock()
    }

    fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn current_generation(&self) -> Generation {
        self.current().generation
    }

    /// Lease the current snapshot.
    pub fn acquire_current(&self) -> Result<Lease> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(Lease::new(self.current.load_full()))
    }

    /// Bring the current snapshot up to date with the writer.
    ///
    /// Returns whether a new snapshot was installed. A caller arriving while
    /// another refresh runs waits for that refresh and shares its outcome
    /// instead of starting a second one.
    pub fn maybe_refresh(&self) -> Result<bool> {
        let mut state = self.state();
        match state.phase {
            Phase::Closed => return Err(Error::Closed),
            Phase::Refreshing => {
                let seen = state.completed;
                while state.phase == Phase::Refreshing
                    && state.completed == seen
                {
                    self.refreshed.wait(&mut state);
                }
                if state.completed == seen {
                    return Err(Error::Closed);
                }
                return state.last_outcome.clone().map_err(Error::RefreshFailed);
            }
            Phase::Idle => state.phase = Phase::Refreshing,
        }
        drop(state);

        let started = Instant::now();
        let outcome = self.refresh_now();

        let mut state = self.state();
        if state.phase == Phase::Refreshing {
            state.phase = Phase::Idle;
        }
        state.completed += 1;
        state.last_refresh_at = Some(started);
        state.last_outcome = match &outcome {
            Ok(installed) => Ok(*installed),
            Err(e) => Err(e.to_string()),
        };
        drop(state);
        self.refreshed.notify_all();

        outcome
    }

    fn refresh_now(&self) -> Result<bool> {
        let target = self.writer.commit()?;
        let current = self.current();
        if target <= current.generation {
            return Ok(false);
        }

        self.reader.reload()?;
        let snapshot = Arc::new(Snapshot {
            serial: self.serials.fetch_add(1, Ordering::AcqRel),
            generation: target,
            searcher: self.reader.searcher(),
            schema: self.schema.clone(),
            leases: AtomicUsize::new(0),
            teardowns: Arc::clone(&self.teardowns),
        });
        debug!(
            serial = snapshot.serial,
            generation = %target,
            "snapshot installed"
        );

        let retired = self.current.swap(snapshot);
        drop(current);
        // Torn down here unless a lease still holds it.
        drop(retired);
        Ok(true)
    }

    /// Block until the current snapshot covers `target`, the deadline
    /// passes, or the manager closes.
    pub fn wait_until(
        &self,
        target: Generation,
        deadline: Instant,
    ) -> Result<()> {
        let mut state = self.state();
        loop {
            if state.phase == Phase::Closed {
                return Err(Error::Closed);
            }
            let current = self.current_generation();
            if current >= target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    target,
                    current,
                    last_refresh_error: state.last_outcome.clone().err(),
                });
            }
            self.refreshed.wait_until(&mut state, deadline);
        }
    }

    /// When the latest refresh attempt started.
    pub fn last_refresh_at(&self) -> Option<Instant> {
        self.state().last_refresh_at
    }

    pub fn stats(&self) -> SnapshotStats {
        let refreshes = self.state().completed;
        let current = self.current();
        SnapshotStats {
            current_serial: current.serial,
            current_generation: current.generation,
            current_leases: current.leases(),
            refreshes,
            torn_down: self.teardowns.load(Ordering::Acquire),
        }
    }

    /// Reject further refreshes and leases and wake every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut state = self.state();
        if state.phase != Phase::Closed {
            state.phase = Phase::Closed;
            debug!("snapshot manager closed");
        }
        drop(state);
        self.refreshed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
