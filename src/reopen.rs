//! Background refresh loop.
//!
//! The coordinator refreshes the snapshot manager every `max_stale`. While
//! callers are blocked in [`ReopenCoordinator::wait_for_generation`] it
//! switches to the eager cadence, refreshing as often as `min_stale`
//! allows.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    generation::Generation,
    snapshot::SnapshotManager,
};

#[derive(Debug, Default)]
struct LoopState {
    waiters: usize,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LoopState>,
    /// Wakes the loop when a waiter arrives or on shutdown.
    wake: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock()
    }
}

/// Unregisters a waiter on every exit path.
struct Waiter<'a> {
    shared: &'a Shared,
}

impl<'a> Waiter<'a> {
    fn register(shared: &'a Shared) -> Self {
        shared.state().waiters += 1;
        shared.wake.notify_all();
        Self { shared }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

pub struct ReopenCoordinator {
    manager: Arc<SnapshotManager>,
    shared: Arc<Shared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ReopenCoordinator {
    /// Start the refresh thread.
    pub fn start(
        manager: Arc<SnapshotManager>,
        min_stale: Duration,
        max_stale: Duration,
    ) -> Result<Self> {
        if min_stale > max_stale {
            return Err(Error::Config(
                "minimum staleness exceeds maximum staleness".into(),
            ));
        }
        let shared = Arc::new(Shared::default());

        let handle = {
            let manager = Arc::clone(&manager);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("docnrt-reopen".to_string())
                .spawn(move || {
                    run(&manager, &shared, min_stale, max_stale);
                })?
        };
        debug!(
            min_stale_ms = min_stale.as_millis() as u64,
            max_stale_ms = max_stale.as_millis() as u64,
            "reopen coordinator started"
        );

        Ok(Self {
            manager,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Block until a snapshot covering `target` is current.
    ///
    /// Fails with [`Error::Timeout`] once `timeout` elapses (carrying the
    /// last refresh error, if any) and with [`Error::Closed`] when the
    /// index shuts down first.
    pub fn wait_for_generation(
        &self,
        target: Generation,
        timeout: Duration,
    ) -> Result<()> {
        if self.manager.is_closed() {
            return Err(Error::Closed);
        }
        if self.manager.current_generation() >= target {
            return Ok(());
        }
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            Error::Validation(format!("timeout {timeout:?} is out of range"))
        })?;

        let _waiter = Waiter::register(&self.shared);
        self.manager.wait_until(target, deadline)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.state().shutdown
    }

    /// Stop refreshing, then close the manager so pending waits fail with
    /// [`Error::Closed`].
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state();
            state.shutdown = true;
        }
        self.shared.wake.notify_all();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("reopen thread panicked");
        }

        self.manager.close();
    }
}

impl Drop for ReopenCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReopenCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReopenCoordinator")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(
    manager: &SnapshotManager,
    shared: &Shared,
    min_stale: Duration,
    max_stale: Duration,
) {
    let mut last_start = Instant::now();
    let mut state = shared.state();

    loop {
        if state.shutdown {
            break;
        }
        let interval = if state.waiters > 0 {
            min_stale
        } else {
            max_stale
        };
        let next = last_start + interval;
        if next > Instant::now() {
            shared.wake.wait_until(&mut state, next);
            continue;
        }
        drop(state);

        last_start = Instant::now();
        match manager.maybe_refresh() {
            Ok(_) => {}
            Err(Error::Closed) => break,
            Err(e) => warn!(error = %e, "refresh failed, retrying"),
        }

        state = shared.state();
    }
    debug!("reopen coordinator stopped");
}
