//! Coalesced conditional snapshot fetches and the slow-sync indicator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::http::api::{GameApi, SnapshotFetch};
use crate::http::etag::parse_game_version_from_etag;
use crate::sync::engine::ReconciliationEngine;
use crate::sync::error_state::{ErrorSlot, ErrorSource, ErrorState};
use crate::sync::state::{ApplyOutcome, AuthoritativeUpdate};

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The server returned a body; this is what the engine did with it.
    Updated(ApplyOutcome),
    /// 304: the displayed state is already current.
    NotModified,
    /// Not retried. The error has also been surfaced if the game is still displayed.
    Failed(SyncError),
}

impl RefreshOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, RefreshOutcome::Failed(_))
    }
}

/// A refresh every caller for the same game awaits together.
pub type RefreshHandle = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Flight {
    id: u64,
    handle: RefreshHandle,
}

struct Inner {
    api: Arc<dyn GameApi>,
    engine: ReconciliationEngine,
    errors: ErrorSlot,
    slow: SlowSyncIndicator,
    slow_threshold: Duration,
    flights: Mutex<HashMap<i64, Flight>>,
    next_flight: AtomicU64,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn GameApi>,
        engine: ReconciliationEngine,
        errors: ErrorSlot,
        slow_threshold: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                engine,
                errors,
                slow: SlowSyncIndicator::new(),
                slow_threshold,
                flights: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    /// Fetch the authoritative snapshot for `game_id`, joining a fetch that is
    /// already in flight for the same game.
    ///
    /// The fetch runs on its own task, so dropping the returned handle does not
    /// cancel it. Must be called from within a Tokio runtime.
    pub fn refresh(&self, game_id: i64) -> RefreshHandle {
        let mut flights = self.inner.flights.lock();
        if let Some(flight) = flights.get(&game_id) {
            debug!(game_id, flight = flight.id, "[REFRESH] joining in-flight refresh");
            return flight.handle.clone();
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run(game_id, id).await });
        let handle = join_outcome(task).boxed().shared();
        flights.insert(
            game_id,
            Flight {
                id,
                handle: handle.clone(),
            },
        );
        handle
    }

    pub fn in_flight(&self, game_id: i64) -> bool {
        self.inner.flights.lock().contains_key(&game_id)
    }

    pub fn slow_sync(&self) -> watch::Receiver<bool> {
        self.inner.slow.subscribe()
    }
}

async fn join_outcome(task: JoinHandle<RefreshOutcome>) -> RefreshOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => RefreshOutcome::Failed(SyncError::transport(format!(
            "refresh task failed: {err}"
        ))),
    }
}

/// Removes the flight entry when the fetch task ends, however it ends.
struct FlightGuard<'a> {
    inner: &'a Inner,
    game_id: i64,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.inner.flights.lock();
        if flights.get(&self.game_id).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.game_id);
        }
    }
}

impl Inner {
    async fn run(&self, game_id: i64, id: u64) -> RefreshOutcome {
        let _flight = FlightGuard {
            inner: self,
            game_id,
            id,
        };
        let _slow = self.slow.begin(self.slow_threshold);

        let etag = self.engine.etag(game_id);
        debug!(game_id, flight = id, etag = ?etag, "[REFRESH] fetching snapshot");

        match self.api.fetch_snapshot(game_id, etag.as_deref()).await {
            Ok(SnapshotFetch::NotModified) => {
                debug!(game_id, "[REFRESH] not modified");
                self.clear_errors_for(game_id);
                RefreshOutcome::NotModified
            }
            Ok(SnapshotFetch::Modified { response, etag }) => {
                let etag_version = etag
                    .as_deref()
                    .and_then(|e| parse_game_version_from_etag(e).ok());
                if etag_version.is_some_and(|v| v != response.version) {
                    warn!(
                        game_id,
                        version = response.version,
                        etag = ?etag,
                        "[REFRESH] etag version disagrees with body version"
                    );
                }
                let outcome = self
                    .engine
                    .apply_authoritative(game_id, AuthoritativeUpdate::from_http(response, etag));
                self.clear_errors_for(game_id);
                RefreshOutcome::Updated(outcome)
            }
            Err(err) => {
                if self.engine.displayed() == Some(game_id) {
                    self.errors
                        .set(ErrorState::from_error(&err, ErrorSource::Http));
                }
                warn!(
                    game_id,
                    code = %err.code(),
                    trace_id = ?err.trace_id(),
                    error = %err,
                    "[REFRESH] snapshot fetch failed"
                );
                RefreshOutcome::Failed(err)
            }
        }
    }

    fn clear_errors_for(&self, game_id: i64) {
        if self.engine.displayed() == Some(game_id) {
            self.errors.clear();
        }
    }
}

#[derive(Default)]
struct TimerFlags {
    fired: bool,
    done: bool,
}

/// Raises a flag while at least one refresh has been running longer than its
/// threshold.
#[derive(Clone)]
struct SlowSyncIndicator {
    slow_count: Arc<Mutex<usize>>,
    tx: Arc<watch::Sender<bool>>,
}

impl SlowSyncIndicator {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            slow_count: Arc::new(Mutex::new(0)),
            tx: Arc::new(tx),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn begin(&self, threshold: Duration) -> SlowSyncGuard {
        let flags = Arc::new(Mutex::new(TimerFlags::default()));
        let indicator = self.clone();
        let timer_flags = Arc::clone(&flags);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let mut flags = timer_flags.lock();
            if flags.done {
                return;
            }
            flags.fired = true;
            let mut count = indicator.slow_count.lock();
            *count += 1;
            if *count == 1 {
                info!(threshold_ms = threshold.as_millis() as u64, "[REFRESH] sync is slow");
                indicator.tx.send_replace(true);
            }
        });
        SlowSyncGuard {
            indicator: self.clone(),
            flags,
            timer,
        }
    }
}

struct SlowSyncGuard {
    indicator: SlowSyncIndicator,
    flags: Arc<Mutex<TimerFlags>>,
    timer: JoinHandle<()>,
}

impl Drop for SlowSyncGuard {
    fn drop(&mut self) {
        self.timer.abort();
        let mut flags = self.flags.lock();
        flags.done = true;
        if !flags.fired {
            return;
        }
        let mut count = self.indicator.slow_count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.indicator.tx.send_replace(false);
        }
    }
}
