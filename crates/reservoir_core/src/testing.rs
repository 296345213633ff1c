//! In-memory doubles for the connector seam.

use crate::error::ReservoirError;
use crate::models::{ConnectionConfig, ParamValue, PoolStatus, RowMap};
use crate::services::backoff::Clock;
use crate::services::connector::{Connector, PoolHandle};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with the given retry policy and a 1s connect timeout.
pub(crate) fn test_config(max_attempts: u32, base_delay_ms: u64) -> ConnectionConfig {
    ConnectionConfig::builder()
        .host("db.test")
        .database("app")
        .username("svc")
        .password("secret")
        .connect_timeout_secs(1)
        .request_timeout_secs(5)
        .retry(max_attempts, base_delay_ms)
        .build()
        .expect("valid test config")
}

pub(crate) fn transient() -> ReservoirError {
    ReservoirError::connection("connection refused")
}

pub(crate) fn semantic() -> ReservoirError {
    ReservoirError::query(
        "duplicate key value violates unique constraint \"users_pkey\"",
        None,
        None,
        None,
        Some("23505".to_string()),
    )
}

#[derive(Default)]
struct ConnectorTally {
    calls: AtomicUsize,
    closed: AtomicUsize,
    next_id: AtomicUsize,
    delay_ms: AtomicU64,
    panic: AtomicBool,
    panic_on_close: AtomicBool,
    always_fail: Mutex<Option<ReservoirError>>,
    script: Mutex<VecDeque<ReservoirError>>,
}

/// Connector whose outcomes are scripted per attempt.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    tally: Arc<ConnectorTally>,
}

impl FakeConnector {
    /// Always connects.
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Fails with each error in turn, then connects.
    pub fn failing_times(errors: impl IntoIterator<Item = ReservoirError>) -> Self {
        let connector = Self::default();
        connector.tally.script.lock().extend(errors);
        connector
    }

    /// Fails every attempt with `error`.
    pub fn always_failing(error: ReservoirError) -> Self {
        let connector = Self::default();
        *connector.tally.always_fail.lock() = Some(error);
        connector
    }

    /// Panics inside the connect primitive.
    pub fn panicking() -> Self {
        let connector = Self::default();
        connector.tally.panic.store(true, Ordering::SeqCst);
        connector
    }

    /// Handles it produces panic when closed.
    pub fn with_panicking_close(self) -> Self {
        self.tally.panic_on_close.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep (on the tokio timer) before resolving each attempt.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.tally.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Number of connect attempts made.
    pub fn calls(&self) -> usize {
        self.tally.calls.load(Ordering::SeqCst)
    }

    /// Number of handles released through `close`.
    pub fn closed_handles(&self) -> usize {
        self.tally.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Handle = FakeHandle;

    async fn connect(&self, _config: &ConnectionConfig) -> Result<FakeHandle, ReservoirError> {
        self.tally.calls.fetch_add(1, Ordering::SeqCst);

        let delay = Duration::from_millis(self.tally.delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.tally.panic.load(Ordering::SeqCst) {
            panic!("connector exploded");
        }

        let always = self.tally.always_fail.lock().clone();
        if let Some(err) = always {
            return Err(err);
        }
        let scripted = self.tally.script.lock().pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        let id = self.tally.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeHandle::new(id, Arc::clone(&self.tally)))
    }
}

/// Handle that records statements and fails on demand.
pub(crate) struct FakeHandle {
    pub id: usize,
    connected: AtomicBool,
    pings: AtomicUsize,
    affected: AtomicU64,
    stall_ms: AtomicU64,
    fail_next: Mutex<Option<ReservoirError>>,
    rows: Mutex<Vec<RowMap>>,
    statements: Mutex<Vec<(String, Vec<ParamValue>)>>,
    tally: Arc<ConnectorTally>,
}

impl std::fmt::Debug for FakeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHandle")
            .field("id", &self.id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FakeHandle {
    fn new(id: usize, tally: Arc<ConnectorTally>) -> Self {
        Self {
            id,
            connected: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
            affected: AtomicU64::new(0),
            stall_ms: AtomicU64::new(0),
            fail_next: Mutex::new(None),
            rows: Mutex::new(Vec::new()),
            statements: Mutex::new(Vec::new()),
            tally,
        }
    }

    /// Flip the liveness flag off.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Make the next ping, query or execute fail with `error`.
    pub fn fail_next(&self, error: ReservoirError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Rows returned by `query`.
    pub fn set_rows(&self, rows: Vec<RowMap>) {
        *self.rows.lock() = rows;
    }

    /// Count returned by `execute`.
    pub fn set_affected(&self, count: u64) {
        self.affected.store(count, Ordering::SeqCst);
    }

    /// Delay every statement by `duration`.
    pub fn stall(&self, duration: Duration) {
        self.stall_ms.store(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Statements run so far.
    pub fn statements(&self) -> Vec<(String, Vec<ParamValue>)> {
        self.statements.lock().clone()
    }

    /// Pings run so far.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    async fn run(&self, sql: &str, params: &[ParamValue]) -> Result<(), ReservoirError> {
        self.statements.lock().push((sql.to_string(), params.to_vec()));
        let stall = Duration::from_millis(self.stall_ms.load(Ordering::SeqCst));
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
        let failure = self.fail_next.lock().take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PoolHandle for FakeHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), ReservoirError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_next.lock().take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<Vec<RowMap>, ReservoirError> {
        self.run(sql, params).await?;
        Ok(self.rows.lock().clone())
    }

    async fn execute(&self, sql: &str, params: &[ParamValue]) -> Result<u64, ReservoirError> {
        self.run(sql, params).await?;
        Ok(self.affected.load(Ordering::SeqCst))
    }

    fn status(&self) -> Option<PoolStatus> {
        Some(PoolStatus { max_size: 10, size: 1, available: 1, waiting: 0 })
    }

    async fn close(&self) -> Result<(), ReservoirError> {
        self.connected.store(false, Ordering::SeqCst);
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
        if self.tally.panic_on_close.load(Ordering::SeqCst) {
            panic!("handle exploded on close");
        }
        Ok(())
    }
}

/// Clock that records requested sleeps and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
