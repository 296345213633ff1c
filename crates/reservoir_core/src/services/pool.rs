//! Shared connection pool manager.
//!
//! Holds at most one live [`PoolHandle`] and hands it to concurrent callers:
//! - Lock-guarded fast path when a healthy handle is cached (no I/O)
//! - Single-flight connects: one connect sequence at a time, late callers
//!   attach to the in-flight attempt through a `watch` channel
//! - Bounded retries with linear backoff on transient failures
//! - Invalidation on transport-class failures, fail-fast after `close`

use crate::error::ReservoirError;
use crate::models::{ConnectionConfig, HealthReport, PoolSnapshot, PoolState};
use crate::services::backoff::{Clock, LinearBackoff, TokioClock};
use crate::services::connector::{Connector, PoolHandle};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Result cell of one connect sequence. `None` until it resolves.
type ConnectOutcome<H> = Option<Result<Arc<H>, ReservoirError>>;

enum Slot<H> {
    Absent,
    Connecting { generation: u64, outcome: watch::Receiver<ConnectOutcome<H>> },
    Ready { generation: u64, handle: Arc<H>, since: DateTime<Utc> },
    Closed,
}

impl<H> Slot<H> {
    fn state(&self) -> PoolState {
        match self {
            Slot::Absent => PoolState::Absent,
            Slot::Connecting { .. } => PoolState::Connecting,
            Slot::Ready { .. } => PoolState::Ready,
            Slot::Closed => PoolState::Closed,
        }
    }
}

/// What a caller gets when it enters `acquire` past the fast path.
enum Admission<H> {
    Ready(Arc<H>),
    Wait(watch::Receiver<ConnectOutcome<H>>),
}

struct Shared<C: Connector> {
    config: ConnectionConfig,
    connector: C,
    clock: Arc<dyn Clock>,
    slot: RwLock<Slot<C::Handle>>,
    /// Connect sequences started
    generation: AtomicU64,
    /// Individual connect attempts made
    connect_attempts: AtomicU64,
}

/// Process-wide manager for one shared database pool.
///
/// Cheap to clone; clones share the same state.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("url", &self.shared.config.display_url())
            .field("state", &self.state())
            .field("generation", &self.shared.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool manager. No connection is made until the first `acquire`.
    pub fn new(config: ConnectionConfig, connector: C) -> Self {
        Self::with_clock(config, connector, Arc::new(TokioClock))
    }

    /// Create a pool manager with a custom backoff clock.
    pub fn with_clock(config: ConnectionConfig, connector: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                clock,
                slot: RwLock::new(Slot::Absent),
                generation: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.shared.slot.read().state()
    }

    /// Get a point-in-time snapshot of the manager.
    pub fn status(&self) -> PoolSnapshot {
        let slot = self.shared.slot.read();
        let (ready_since, pool) = match &*slot {
            Slot::Ready { handle, since, .. } => (Some(*since), handle.status()),
            _ => (None, None),
        };
        PoolSnapshot {
            state: slot.state(),
            generation: self.shared.generation.load(Ordering::SeqCst),
            connect_attempts: self.shared.connect_attempts.load(Ordering::SeqCst),
            ready_since,
            pool,
        }
    }

    /// Get the shared pool handle, connecting if necessary.
    ///
    /// Returns the cached handle without I/O when it is ready and reports
    /// itself connected. Otherwise joins the in-flight connect sequence, or
    /// starts one. Every caller attached to the same sequence receives the
    /// same handle or the same error. Fails fast with
    /// [`ReservoirError::PoolClosed`] after [`close`](Self::close).
    pub async fn acquire(&self) -> Result<Arc<C::Handle>, ReservoirError> {
        if let Some(handle) = self.shared.ready_handle()? {
            return Ok(handle);
        }

        match Shared::admit(&self.shared)? {
            Admission::Ready(handle) => Ok(handle),
            Admission::Wait(outcome) => wait_for_outcome(outcome).await,
        }
    }

    /// Drop `handle` if it is still the cached one.
    ///
    /// The next `acquire` reconnects. Reports about a handle that was already
    /// replaced are ignored. Returns true if the pool was invalidated.
    pub fn invalidate(&self, handle: &Arc<C::Handle>) -> bool {
        let mut slot = self.shared.slot.write();
        let is_current =
            matches!(&*slot, Slot::Ready { handle: current, .. } if Arc::ptr_eq(current, handle));
        if !is_current {
            return false;
        }

        if let Slot::Ready { generation, .. } = std::mem::replace(&mut *slot, Slot::Absent) {
            tracing::warn!(generation, "Invalidating pool after connection-level failure");
        }
        true
    }

    /// Invalidate `handle` if `error` carries a transport or timeout signature.
    ///
    /// Semantic query errors leave the pool untouched.
    pub fn report_failure(&self, handle: &Arc<C::Handle>, error: &ReservoirError) -> bool {
        if error.is_transient() {
            self.invalidate(handle)
        } else {
            false
        }
    }

    /// Check health: acquire, then run a no-op statement.
    pub async fn check_health(&self) -> bool {
        self.check_health_report().await.healthy
    }

    /// Check health and report latency or the terminal error.
    ///
    /// Performs no retries beyond those inside `acquire`.
    pub async fn check_health_report(&self) -> HealthReport {
        let handle = match self.acquire().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(error = %err, "Health check could not acquire pool");
                return HealthReport::unhealthy(err.to_string());
            }
        };

        let start = Instant::now();
        match handle.ping().await {
            Ok(()) => HealthReport::healthy(start.elapsed().as_millis() as u64),
            Err(err) => {
                tracing::warn!(error = %err, "Health check statement failed");
                self.report_failure(&handle, &err);
                HealthReport::unhealthy(err.to_string())
            }
        }
    }

    /// Shut the pool down.
    ///
    /// Subsequent `acquire` calls fail with [`ReservoirError::PoolClosed`]. A
    /// connect sequence still in flight discards its handle when it finishes.
    /// Idempotent.
    pub async fn close(&self) -> Result<(), ReservoirError> {
        let previous = std::mem::replace(&mut *self.shared.slot.write(), Slot::Closed);

        match previous {
            Slot::Ready { handle, generation, .. } => {
                handle.close().await?;
                tracing::info!(generation, "Connection pool closed");
            }
            Slot::Connecting { generation, .. } => {
                tracing::info!(generation, "Connection pool closed during connect");
            }
            Slot::Absent => tracing::info!("Connection pool closed before first use"),
            Slot::Closed => tracing::debug!("Connection pool already closed"),
        }
        Ok(())
    }
}

impl<C: Connector> Shared<C> {
    /// Fast path under the read lock.
    fn ready_handle(&self) -> Result<Option<Arc<C::Handle>>, ReservoirError> {
        match &*self.slot.read() {
            Slot::Ready { handle, .. } if handle.is_connected() => Ok(Some(Arc::clone(handle))),
            Slot::Closed => Err(ReservoirError::PoolClosed),
            _ => Ok(None),
        }
    }

    /// Slow path under the write lock: join the in-flight attempt or start one.
    fn admit(this: &Arc<Self>) -> Result<Admission<C::Handle>, ReservoirError> {
        let mut slot = this.slot.write();
        match &*slot {
            Slot::Ready { handle, .. } if handle.is_connected() => {
                return Ok(Admission::Ready(Arc::clone(handle)));
            }
            Slot::Closed => return Err(ReservoirError::PoolClosed),
            Slot::Connecting { generation, outcome } => {
                tracing::trace!(generation, "Joining in-flight connect");
                return Ok(Admission::Wait(outcome.clone()));
            }
            Slot::Ready { .. } | Slot::Absent => {}
        }

        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(None);
        let previous =
            std::mem::replace(&mut *slot, Slot::Connecting { generation, outcome: rx.clone() });
        drop(slot);

        let stale = match previous {
            Slot::Ready { handle, generation: old, .. } => {
                tracing::warn!(generation = old, "Cached pool reports disconnected, replacing it");
                Some(handle)
            }
            _ => None,
        };

        tokio::spawn(Arc::clone(this).run_connect(generation, stale, tx));
        Ok(Admission::Wait(rx))
    }

    /// Drive one connect sequence to completion and publish its outcome.
    ///
    /// Runs detached so callers that stop waiting do not cancel it.
    async fn run_connect(
        self: Arc<Self>,
        generation: u64,
        stale: Option<Arc<C::Handle>>,
        tx: watch::Sender<ConnectOutcome<C::Handle>>,
    ) {
        if let Some(stale) = stale {
            close_quietly(stale.as_ref(), "stale").await;
        }

        let result = AssertUnwindSafe(self.connect_with_retry(generation))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ReservoirError::internal("Connect task panicked")));

        let (outcome, orphan) = self.publish(generation, result);
        if let Some(orphan) = orphan {
            close_quietly(&orphan, "created after shutdown").await;
        }

        tx.send_replace(Some(outcome));
    }

    /// Attempt to connect up to `max_attempts` times with linear backoff.
    async fn connect_with_retry(&self, generation: u64) -> Result<C::Handle, ReservoirError> {
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let backoff = LinearBackoff::new(policy.base_delay());
        let connect_timeout = self.config.connect_timeout();
        let mut attempt: u32 = 1;

        loop {
            if self.is_closed() {
                return Err(ReservoirError::PoolClosed);
            }

            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                generation,
                attempt,
                max_attempts,
                host = %self.config.host,
                database = %self.config.database,
                "Connecting to database"
            );

            let result =
                match tokio::time::timeout(connect_timeout, self.connector.connect(&self.config))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ReservoirError::timeout(format!(
                        "Connect attempt {attempt} timed out after {}ms",
                        connect_timeout.as_millis()
                    ))),
                };

            let err = match result {
                Ok(handle) => {
                    if attempt > 1 {
                        tracing::info!(generation, attempts = attempt, "Connected after retrying");
                    }
                    return Ok(handle);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::warn!(generation, attempt, error = %err, "Connect failed, not retrying");
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::error!(
                    generation,
                    attempts = attempt,
                    error = %err,
                    "Giving up connecting to database"
                );
                return Err(err);
            }

            let delay = backoff.delay_after(attempt);
            tracing::warn!(
                generation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Connect attempt failed, backing off"
            );
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Move out of `Connecting` with the sequence's result.
    ///
    /// Returns the outcome for waiters, plus a handle to close if the pool was
    /// shut down while connecting.
    #[allow(clippy::type_complexity)]
    fn publish(
        &self,
        generation: u64,
        result: Result<C::Handle, ReservoirError>,
    ) -> (Result<Arc<C::Handle>, ReservoirError>, Option<C::Handle>) {
        let mut slot = self.slot.write();
        let is_current =
            matches!(&*slot, Slot::Connecting { generation: current, .. } if *current == generation);

        match result {
            Ok(handle) if is_current => {
                let handle = Arc::new(handle);
                *slot = Slot::Ready { generation, handle: Arc::clone(&handle), since: Utc::now() };
                tracing::info!(
                    generation,
                    host = %self.config.host,
                    database = %self.config.database,
                    "Connection pool ready"
                );
                (Ok(handle), None)
            }
            Ok(handle) => {
                tracing::info!(generation, "Pool closed during connect, discarding new handle");
                (Err(ReservoirError::PoolClosed), Some(handle))
            }
            Err(err) if is_current => {
                *slot = Slot::Absent;
                (Err(err), None)
            }
            Err(_) => (Err(ReservoirError::PoolClosed), None),
        }
    }

    fn is_closed(&self) -> bool {
        matches!(&*self.slot.read(), Slot::Closed)
    }
}

/// Suspend until the connect sequence behind `outcome` resolves.
async fn wait_for_outcome<H>(
    mut outcome: watch::Receiver<ConnectOutcome<H>>,
) -> Result<Arc<H>, ReservoirError> {
    let resolved: ConnectOutcome<H> = (*outcome
        .wait_for(Option::is_some)
        .await
        .map_err(|_| ReservoirError::internal("Connect sequence ended without a result"))?)
    .clone();

    resolved.unwrap_or_else(|| Err(ReservoirError::internal("Connect sequence ended without a result")))
}

/// Close a handle the pool no longer owns, logging failures and panics.
async fn close_quietly<H: PoolHandle>(handle: &H, what: &str) {
    match AssertUnwindSafe(handle.close()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(error = %err, "Failed to close {what} pool"),
        Err(_) => tracing::warn!("Closing {what} pool panicked"),
    }
}
