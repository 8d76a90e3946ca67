//! In-memory backend for tests and load simulation

use crate::connection::{ConnectionFactory, DatabaseConnection, QueryParam, Row};
use crate::error::{PoolError, PoolResult};
use crate::statistics::saturating_millis;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockCounters {
    created: AtomicUsize,
    closed: AtomicUsize,
    queries: AtomicUsize,
    failures_pending: AtomicUsize,
    unavailable: AtomicBool,
    fail_close: AtomicBool,
    create_delay_ms: AtomicU64,
    query_delay_ms: AtomicU64,
}

/// Factory producing [`MockConnection`]s, with injectable failures and latency
///
/// Clones share counters, so a test can keep one handle while the pool owns another.
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    counters: Arc<MockCounters>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.counters
            .create_delay_ms
            .store(saturating_millis(delay), Ordering::SeqCst);
        self
    }

    pub fn with_query_delay(self, delay: Duration) -> Self {
        self.counters
            .query_delay_ms
            .store(saturating_millis(delay), Ordering::SeqCst);
        self
    }

    /// Fail the next `count` creations
    pub fn fail_next(&self, count: usize) {
        self.counters.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Fail every creation until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `close()` report an error (the connection is still counted as closed)
    pub fn fail_closes(&self, fail: bool) {
        self.counters.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Connections created and not yet closed
    pub fn open(&self) -> usize {
        self.created().saturating_sub(self.closed())
    }

    pub fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> PoolResult<Box<dyn DatabaseConnection>> {
        let delay = self.counters.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let injected = self
            .counters
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.counters.unavailable.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionFailed("mock backend unavailable".into()));
        }

        let id = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockConnection {
            id,
            counters: self.counters.clone(),
            closed: false,
        }))
    }
}

/// Connection that answers every statement with a single descriptive row.
/// Statements containing `FAIL` return a query error.
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    counters: Arc<MockCounters>,
    closed: bool,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    async fn execute(&mut self, sql: &str) -> PoolResult<Row> {
        if self.closed {
            return Err(PoolError::Query("connection is closed".into()));
        }
        let delay = self.counters.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.counters.queries.fetch_add(1, Ordering::SeqCst);

        if sql.contains("FAIL") {
            return Err(PoolError::Query(format!("mock failure for '{}'", sql)));
        }
        Ok(Row::new()
            .with_column("connection_id", self.id as i64)
            .with_column("sql", sql))
    }
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn query(&mut self, sql: &str) -> PoolResult<Vec<Row>> {
        Ok(vec![self.execute(sql).await?])
    }

    async fn query_with_params(&mut self, sql: &str, params: &[QueryParam]) -> PoolResult<Vec<Row>> {
        let row = params
            .iter()
            .fold(self.execute(sql).await?, |row, p| {
                row.with_column(p.name.clone(), p.value.clone())
            });
        Ok(vec![row])
    }

    async fn close(&mut self) -> PoolResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);

        if self.counters.fail_close.load(Ordering::SeqCst) {
            return Err(PoolError::CloseFailed("mock close failure".into()));
        }
        Ok(())
    }
}
