//! Periodically refreshed list of analyses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use threatscope_core::{AnalysisStatus, AnalysisSummary};
use threatscope_gateway::AnalysisGateway;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Immutable list state published by [`AnalysesCollectionController`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Analyses in server order.
    pub items: Arc<[AnalysisSummary]>,
    /// `true` while a refresh is in flight.
    pub loading: bool,
    /// Message of the last failed refresh; cleared by the next success.
    pub last_error: Option<String>,
    /// Completion time of the last successful refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for CollectionSnapshot {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
            loading: false,
            last_error: None,
            refreshed_at: None,
        }
    }
}

#[derive(Clone)]
struct RefreshContext {
    gateway: Arc<dyn AnalysisGateway>,
    state: Arc<watch::Sender<CollectionSnapshot>>,
    in_flight: Arc<AtomicBool>,
    filter: Arc<Mutex<Option<AnalysisStatus>>>,
    live: Arc<Mutex<CancellationToken>>,
}

impl RefreshContext {
    fn live_token(&self) -> CancellationToken {
        lock(&self.live).clone()
    }

    /// Cancels every refresh started so far and arms a fresh token.
    fn rotate_token(&self) {
        let previous = std::mem::replace(&mut *lock(&self.live), CancellationToken::new());
        previous.cancel();
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the analyses list fresh on a fixed timer.
///
/// The timer keeps ticking while a refresh is in flight; ticks that find one
/// running are skipped, so two refreshes never overlap. Results of refreshes
/// still in flight at [`stop`](Self::stop) or drop are discarded.
pub struct AnalysesCollectionController {
    context: RefreshContext,
    interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AnalysesCollectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysesCollectionController")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl AnalysesCollectionController {
    /// Creates a stopped controller refreshing every `interval`.
    pub fn new(gateway: Arc<dyn AnalysisGateway>, interval: Duration) -> Self {
        let (state, _) = watch::channel(CollectionSnapshot::default());
        Self {
            context: RefreshContext {
                gateway,
                state: Arc::new(state),
                in_flight: Arc::new(AtomicBool::new(false)),
                filter: Arc::new(Mutex::new(None)),
                live: Arc::new(Mutex::new(CancellationToken::new())),
            },
            interval,
            ticker: Mutex::new(None),
        }
    }

    /// Subscribes to snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot> {
        self.context.state.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> CollectionSnapshot {
        self.context.state.borrow().clone()
    }

    /// Sets the status filter used by subsequent refreshes.
    pub fn set_filter(&self, status: Option<AnalysisStatus>) {
        *lock(&self.context.filter) = status;
    }

    /// Current status filter.
    pub fn filter(&self) -> Option<AnalysisStatus> {
        *lock(&self.context.filter)
    }

    /// Starts the timer; the first refresh runs immediately.
    ///
    /// Calling `start` on a running controller is a no-op.
    pub fn start(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() {
            return;
        }

        let token = self.context.live_token();
        *ticker = Some(tokio::spawn(refresh_loop(self.context.clone(), self.interval, token)));
        debug!(stage = "collection", action = "start", interval_ms = self.interval.as_millis() as u64, "refresh timer started");
    }

    /// Stops the timer and discards the result of any in-flight refresh.
    pub fn stop(&self) {
        let ticker = lock(&self.ticker).take();
        self.context.rotate_token();
        self.context.state.send_if_modified(|snapshot| std::mem::take(&mut snapshot.loading));
        if ticker.is_some() {
            debug!(stage = "collection", action = "stop", "refresh timer stopped");
        }
    }

    /// Returns `true` while the timer runs.
    pub fn is_running(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    /// Refreshes now, unless a refresh is already in flight.
    ///
    /// Returns `false` when skipped or when [`stop`](Self::stop) discarded
    /// the result.
    pub async fn refresh_now(&self) -> bool {
        let token = self.context.live_token();
        refresh(&self.context, &token).await
    }
}

impl Drop for AnalysesCollectionController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn refresh_loop(context: RefreshContext, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let context = context.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    refresh(&context, &token).await;
                });
            }
        }
    }
}

async fn refresh(context: &RefreshContext, token: &CancellationToken) -> bool {
    let Some(_guard) = InFlightGuard::acquire(&context.in_flight) else {
        debug!(stage = "collection", action = "refresh", "refresh already in flight; skipped");
        return false;
    };

    let filter = *lock(&context.filter);
    let started = context.state.send_if_modified(|snapshot| {
        if token.is_cancelled() {
            return false;
        }
        snapshot.loading = true;
        true
    });
    if !started {
        return false;
    }

    let outcome = tokio::select! {
        _ = token.cancelled() => None,
        outcome = context.gateway.list_analyses(filter) => Some(outcome),
    };
    let Some(outcome) = outcome else {
        debug!(stage = "collection", action = "refresh", "controller stopped; refresh discarded");
        return false;
    };

    // Commits re-check the token: `stop` may cancel between fetch and commit.
    match outcome {
        Ok(items) => {
            let count = items.len();
            let committed = context.state.send_if_modified(|snapshot| {
                if token.is_cancelled() {
                    return false;
                }
                snapshot.items = Arc::from(items);
                snapshot.loading = false;
                snapshot.last_error = None;
                snapshot.refreshed_at = Some(Utc::now());
                true
            });
            if committed {
                debug!(stage = "collection", action = "refresh", count, "list refreshed");
            }
            committed
        }
        Err(error) => {
            warn!(stage = "collection", action = "refresh", error = %error, "list refresh failed");
            let message = error.user_message();
            context.state.send_if_modified(|snapshot| {
                if token.is_cancelled() {
                    return false;
                }
                snapshot.loading = false;
                snapshot.last_error = Some(message);
                true
            })
        }
    }
}
