//! Connection Pool Management
//!
//! [`PooledConnection`] owns a set of backend connections, lends them to
//! callers through [`PoolGuard`], queues callers FIFO when every connection is
//! busy, and can be resized while in use.
//!
//! All bookkeeping (entries, wait queue, wait samples) lives behind a single
//! mutex that is never held across an `.await`. Connections are created and
//! closed outside the lock; creations in flight are counted as pending so the
//! pool never overshoots `max_pool_size`.

use crate::config::PoolConfig;
use crate::connection::{ConnectionFactory, DatabaseConnection, QueryParam, Row};
use crate::error::{PoolError, PoolResult};
use crate::health::PoolHealthReport;
use crate::scalable::ScalablePool;
use crate::statistics::{saturating_millis, ExtendedPoolStats, PoolMetrics, WaitTimeWindow};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolStatus {
    Disconnected,
    Connected,
    Closed,
}

/// One managed backend connection; `connection` is `None` while lent out
struct PoolEntry {
    id: u64,
    connection: Option<Box<dyn DatabaseConnection>>,
    in_use: bool,
    last_used: Instant,
}

/// A connection checked out of a specific entry
struct Lease {
    entry_id: u64,
    connection: Box<dyn DatabaseConnection>,
}

enum WaitOutcome {
    Granted(Lease),
    /// A creation slot has been reserved for this caller
    CreateSlot { enqueued_at: Instant },
    Rejected(PoolError),
}

struct WaitingClient {
    sender: oneshot::Sender<WaitOutcome>,
    enqueued_at: Instant,
}

enum Checkout {
    Ready(Lease),
    Create,
    Wait(oneshot::Receiver<WaitOutcome>),
}

enum ResizePlan {
    Grow(usize),
    Shrink {
        requested: usize,
        closing: Vec<Box<dyn DatabaseConnection>>,
    },
    Unchanged,
}

struct PoolState {
    status: PoolStatus,
    max_size: usize,
    entries: Vec<PoolEntry>,
    waiters: VecDeque<WaitingClient>,
    pending_creations: usize,
    wait_times: WaitTimeWindow,
    next_entry_id: u64,
}

impl PoolState {
    fn new(max_size: usize) -> Self {
        Self {
            status: PoolStatus::Disconnected,
            max_size,
            entries: Vec::new(),
            waiters: VecDeque::new(),
            pending_creations: 0,
            wait_times: WaitTimeWindow::new(),
            next_entry_id: 0,
        }
    }

    fn ensure_open(&self) -> PoolResult<()> {
        match self.status {
            PoolStatus::Connected => Ok(()),
            PoolStatus::Disconnected => Err(PoolError::NotConnected),
            PoolStatus::Closed => Err(PoolError::PoolClosing),
        }
    }

    /// Live entries plus creations that have been promised a slot
    fn committed_size(&self) -> usize {
        self.entries.len() + self.pending_creations
    }

    fn entry_index(&self, entry_id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == entry_id)
    }

    fn checkout_idle(&mut self) -> Option<Lease> {
        let entry = self.entries.iter_mut().find(|e| !e.in_use)?;
        let connection = entry.connection.take()?;
        entry.in_use = true;
        Some(Lease {
            entry_id: entry.id,
            connection,
        })
    }

    fn insert_idle(&mut self, connection: Box<dyn DatabaseConnection>, now: Instant) {
        self.next_entry_id += 1;
        self.entries.push(PoolEntry {
            id: self.next_entry_id,
            connection: Some(connection),
            in_use: false,
            last_used: now,
        });
    }

    fn insert_in_use(&mut self, connection: Box<dyn DatabaseConnection>, now: Instant) -> Lease {
        // The entry is registered before the connection is handed over
        self.next_entry_id += 1;
        let entry_id = self.next_entry_id;
        self.entries.push(PoolEntry {
            id: entry_id,
            connection: None,
            in_use: true,
            last_used: now,
        });
        Lease {
            entry_id,
            connection,
        }
    }

    /// Hand a freed connection to the longest-waiting caller still listening.
    /// Returns the lease when nobody took it.
    fn dispatch(&mut self, mut lease: Lease, now: Instant) -> Option<Lease> {
        while let Some(waiter) = self.waiters.pop_front() {
            let waited = now.saturating_duration_since(waiter.enqueued_at);
            match waiter.sender.send(WaitOutcome::Granted(lease)) {
                Ok(()) => {
                    self.wait_times.record(waited);
                    return None;
                }
                Err(WaitOutcome::Granted(returned)) => lease = returned,
                Err(_) => return None,
            }
        }
        Some(lease)
    }

    /// Return a lease to its entry, serving a waiter first if one exists.
    /// Yields the connection back when its entry no longer exists.
    fn give_back(&mut self, lease: Lease, now: Instant) -> Option<Box<dyn DatabaseConnection>> {
        let Some(index) = self.entry_index(lease.entry_id) else {
            return Some(lease.connection);
        };
        self.entries[index].last_used = now;

        if let Some(lease) = self.dispatch(lease, now) {
            let entry = &mut self.entries[index];
            entry.connection = Some(lease.connection);
            entry.in_use = false;
        }
        None
    }

    /// Add a freshly created connection, serving a waiter first if one exists
    fn admit(&mut self, connection: Box<dyn DatabaseConnection>, now: Instant) {
        if self.waiters.is_empty() {
            self.insert_idle(connection, now);
        } else {
            let lease = self.insert_in_use(connection, now);
            let _ = self.give_back(lease, now);
        }
    }

    fn prune_abandoned_waiters(&mut self) {
        self.waiters.retain(|w| !w.sender.is_closed());
    }

    /// Reserve freed creation capacity for the longest-waiting callers, in queue order
    fn grant_free_slots(&mut self) {
        if self.status != PoolStatus::Connected {
            return;
        }
        while self.committed_size() < self.max_size {
            let Some(waiter) = self.waiters.pop_front() else {
                return;
            };
            self.pending_creations += 1;
            let slot = WaitOutcome::CreateSlot {
                enqueued_at: waiter.enqueued_at,
            };
            if waiter.sender.send(slot).is_err() {
                self.pending_creations -= 1;
            }
        }
    }

    /// Remove up to `limit` idle entries, newest first
    fn take_idle_from_back(&mut self, limit: usize) -> Vec<Box<dyn DatabaseConnection>> {
        let mut taken = Vec::new();
        let mut index = self.entries.len();
        while index > 0 && taken.len() < limit {
            index -= 1;
            if !self.entries[index].in_use {
                if let Some(connection) = self.entries.remove(index).connection {
                    taken.push(connection);
                }
            }
        }
        taken
    }

    fn take_expired(&mut self, idle_timeout: Duration, min_size: usize, now: Instant) -> Vec<Box<dyn DatabaseConnection>> {
        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.entries.len() && self.entries.len() > min_size {
            let entry = &self.entries[index];
            if !entry.in_use && now.saturating_duration_since(entry.last_used) > idle_timeout {
                if let Some(connection) = self.entries.remove(index).connection {
                    taken.push(connection);
                }
            } else {
                index += 1;
            }
        }
        taken
    }

    fn metrics(&mut self) -> PoolMetrics {
        self.prune_abandoned_waiters();
        let active = self.entries.iter().filter(|e| e.in_use).count();
        PoolMetrics::from_counts(
            self.entries.len(),
            active,
            self.waiters.len(),
            self.wait_times.average_ms(),
        )
    }
}

struct PoolShared {
    dsn: String,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    acquire_count: AtomicU64,
    acquire_errors: AtomicU64,
    created_at: Instant,
}

impl PoolShared {
    fn checkout(&self) -> PoolResult<Checkout> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if let Some(lease) = state.checkout_idle() {
            state.wait_times.record(Duration::ZERO);
            return Ok(Checkout::Ready(lease));
        }

        if state.committed_size() < *self.config.get_max_pool_size() {
            state.pending_creations += 1;
            return Ok(Checkout::Create);
        }

        state.prune_abandoned_waiters();
        if let Some(max_depth) = *self.config.get_max_queue_depth() {
            if state.waiters.len() >= max_depth {
                warn!("Pool '{}' wait queue is full ({} callers)", self.dsn, max_depth);
                return Err(PoolError::QueueFull { max_depth });
            }
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.push_back(WaitingClient {
            sender,
            enqueued_at: Instant::now(),
        });
        debug!(
            "All {} connections of '{}' busy, caller queued (queue length: {})",
            state.entries.len(),
            self.dsn,
            state.waiters.len()
        );
        Ok(Checkout::Wait(receiver))
    }

    fn release(&self, lease: Lease) {
        let orphan = self.state.lock().give_back(lease, Instant::now());
        if let Some(connection) = orphan {
            close_detached(self.dsn.clone(), connection);
        }
    }

    async fn evict_idle(&self) -> usize {
        let expired = self.state.lock().take_expired(
            *self.config.get_idle_timeout(),
            *self.config.get_min_pool_size(),
            Instant::now(),
        );
        let count = expired.len();
        for connection in expired {
            close_quietly(&self.dsn, connection).await;
        }
        if count > 0 {
            info!("Evicted {} idle connections from pool '{}'", count, self.dsn);
        }
        count
    }
}

/// Pending-creation reservations, released on drop if the creating future is cancelled
struct PendingSlots<'a> {
    shared: &'a PoolShared,
    remaining: usize,
}

impl<'a> PendingSlots<'a> {
    fn new(shared: &'a PoolShared, remaining: usize) -> Self {
        Self { shared, remaining }
    }

    fn settle_one(&mut self, state: &mut PoolState) {
        state.pending_creations = state.pending_creations.saturating_sub(1);
        self.remaining -= 1;
    }
}

impl Drop for PendingSlots<'_> {
    fn drop(&mut self) {
        if self.remaining > 0 {
            let mut state = self.shared.state.lock();
            state.pending_creations = state.pending_creations.saturating_sub(self.remaining);
            state.grant_free_slots();
        }
    }
}

/// A queued caller's claim; a grant that arrives after the caller gave up is returned to the pool
struct WaitTicket {
    shared: Arc<PoolShared>,
    receiver: oneshot::Receiver<WaitOutcome>,
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        self.receiver.close();
        match self.receiver.try_recv() {
            Ok(WaitOutcome::Granted(lease)) => self.shared.release(lease),
            Ok(WaitOutcome::CreateSlot { .. }) => {
                let mut state = self.shared.state.lock();
                state.pending_creations = state.pending_creations.saturating_sub(1);
                state.grant_free_slots();
            }
            _ => {}
        }
    }
}

/// Managed connection pool for one DSN
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    lifecycle: tokio::sync::Mutex<()>,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PooledConnection {
    pub fn new<S: Into<String>>(
        dsn: S,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let max_size = *config.get_max_pool_size();
        Ok(Self {
            shared: Arc::new(PoolShared {
                dsn: dsn.into(),
                config,
                factory,
                state: Mutex::new(PoolState::new(max_size)),
                acquire_count: AtomicU64::new(0),
                acquire_errors: AtomicU64::new(0),
                created_at: Instant::now(),
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            cleanup_handle: Mutex::new(None),
        })
    }

    pub fn dsn(&self) -> &str {
        &self.shared.dsn
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Eagerly create `min_pool_size` connections and start the idle sweep
    pub async fn connect(&self) -> PoolResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let shared = &self.shared;
        let initial = *shared.config.get_min_pool_size();

        {
            let mut state = shared.state.lock();
            match state.status {
                PoolStatus::Connected => {
                    debug!("Pool '{}' already connected", shared.dsn);
                    return Ok(());
                }
                PoolStatus::Closed => return Err(PoolError::PoolClosing),
                PoolStatus::Disconnected => state.pending_creations += initial,
            }
        }
        let mut slots = PendingSlots::new(shared, initial);

        let results = join_all((0..initial).map(|_| shared.factory.create())).await;
        let mut created = Vec::with_capacity(initial);
        let mut failure = None;
        for result in results {
            match result {
                Ok(connection) => created.push(connection),
                Err(e) => {
                    failure.get_or_insert(creation_error(e));
                }
            }
        }

        if let Some(err) = failure {
            drop(slots);
            for connection in created {
                close_quietly(&shared.dsn, connection).await;
            }
            error!("Failed to connect pool '{}': {}", shared.dsn, err);
            return Err(err);
        }

        {
            let mut state = shared.state.lock();
            let now = Instant::now();
            for connection in created {
                slots.settle_one(&mut state);
                state.insert_idle(connection, now);
            }
            state.status = PoolStatus::Connected;
        }

        self.start_cleanup_task();
        info!(
            "Connection pool '{}' connected ({} connections, max {})",
            shared.dsn, initial, *shared.config.get_max_pool_size()
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().status == PoolStatus::Connected
    }

    /// Check out a connection, creating or waiting for one as needed.
    /// The connection returns to the pool when the guard is dropped.
    pub async fn acquire(&self) -> PoolResult<PoolGuard> {
        self.shared.acquire_count.fetch_add(1, Ordering::Relaxed);

        match self.acquire_lease().await {
            Ok(lease) => Ok(PoolGuard {
                shared: self.shared.clone(),
                lease: Some(lease),
            }),
            Err(e) => {
                self.shared.acquire_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn acquire_lease(&self) -> PoolResult<Lease> {
        match self.shared.checkout()? {
            Checkout::Ready(lease) => Ok(lease),
            Checkout::Create => self.create_for_caller(Instant::now()).await,
            Checkout::Wait(receiver) => {
                let ticket = WaitTicket {
                    shared: self.shared.clone(),
                    receiver,
                };
                self.wait_for_turn(ticket).await
            }
        }
    }

    /// Create a connection on a slot already reserved in `pending_creations`.
    /// `started` is when the caller began waiting.
    async fn create_for_caller(&self, started: Instant) -> PoolResult<Lease> {
        let shared = &self.shared;
        let mut slots = PendingSlots::new(shared, 1);
        let created = shared.factory.create().await;

        let outcome = {
            let mut state = shared.state.lock();
            slots.settle_one(&mut state);
            match created {
                Ok(connection) if state.status != PoolStatus::Connected => Err(Some(connection)),
                Ok(connection) => {
                    let lease = state.insert_in_use(connection, Instant::now());
                    state.wait_times.record(started.elapsed());
                    debug!(
                        "Created connection for '{}' on demand (size: {})",
                        shared.dsn,
                        state.entries.len()
                    );
                    Ok(lease)
                }
                Err(e) => {
                    state.grant_free_slots();
                    error!("Failed to create connection for '{}': {}", shared.dsn, e);
                    return Err(creation_error(e));
                }
            }
        };

        match outcome {
            Ok(lease) => Ok(lease),
            Err(orphan) => {
                if let Some(connection) = orphan {
                    close_quietly(&shared.dsn, connection).await;
                }
                Err(PoolError::PoolClosing)
            }
        }
    }

    /// Wait in the queue until a connection or a creation slot is handed over
    async fn wait_for_turn(&self, mut ticket: WaitTicket) -> PoolResult<Lease> {
        let outcome = match *self.shared.config.get_acquire_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut ticket.receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Timed out after {:?} waiting for a '{}' connection", limit, self.shared.dsn);
                    return Err(PoolError::AcquireTimeout {
                        timeout_ms: saturating_millis(limit),
                    });
                }
            },
            None => (&mut ticket.receiver).await,
        };

        match outcome {
            Ok(WaitOutcome::Granted(lease)) => Ok(lease),
            Ok(WaitOutcome::CreateSlot { enqueued_at }) => self.create_for_caller(enqueued_at).await,
            Ok(WaitOutcome::Rejected(err)) => Err(err),
            Err(_) => Err(PoolError::PoolClosing),
        }
    }

    /// Run a statement on a pooled connection
    pub async fn query(&self, sql: &str) -> PoolResult<Vec<Row>> {
        let mut connection = self.acquire().await?;
        connection.query(sql).await
    }

    /// Run a parameterized statement on a pooled connection
    pub async fn query_with_params(&self, sql: &str, params: &[QueryParam]) -> PoolResult<Vec<Row>> {
        let mut connection = self.acquire().await?;
        connection.query_with_params(sql, params).await
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        self.shared.state.lock().metrics()
    }

    /// Grow or shrink the pool to `new_size`.
    ///
    /// Shrinking only closes idle connections, newest first, and is
    /// best-effort when too few are idle.
    pub async fn resize_pool(&self, new_size: usize) -> PoolResult<()> {
        let (min, max) = (*self.shared.config.get_min_pool_size(), *self.shared.config.get_max_pool_size());
        if new_size < min || new_size > max {
            warn!(
                "Rejected resize of '{}' to {} (bounds: [{}, {}])",
                self.shared.dsn, new_size, min, max
            );
            return Err(PoolError::ResizeOutOfBounds {
                requested: new_size,
                min,
                max,
            });
        }

        let plan = {
            let mut state = self.shared.state.lock();
            state.ensure_open()?;
            let committed = state.committed_size();
            if new_size > committed {
                let count = new_size - committed;
                state.pending_creations += count;
                ResizePlan::Grow(count)
            } else if new_size < state.entries.len() {
                let requested = state.entries.len() - new_size;
                ResizePlan::Shrink {
                    requested,
                    closing: state.take_idle_from_back(requested),
                }
            } else {
                ResizePlan::Unchanged
            }
        };

        match plan {
            ResizePlan::Grow(count) => self.grow_by(new_size, count).await,
            ResizePlan::Shrink { requested, closing } => self.shrink(new_size, requested, closing).await,
            ResizePlan::Unchanged => {
                debug!("Pool '{}' already at size {}", self.shared.dsn, new_size);
                Ok(())
            }
        }
    }

    async fn grow_by(&self, target: usize, count: usize) -> PoolResult<()> {
        let shared = &self.shared;
        let mut slots = PendingSlots::new(shared, count);
        let results = join_all((0..count).map(|_| shared.factory.create())).await;

        let mut failures = Vec::new();
        let mut orphans = Vec::new();
        {
            let mut state = shared.state.lock();
            let now = Instant::now();
            for result in results {
                slots.settle_one(&mut state);
                match result {
                    Ok(connection) if state.status == PoolStatus::Connected => state.admit(connection, now),
                    Ok(connection) => orphans.push(connection),
                    Err(e) => failures.push(creation_error(e).to_string()),
                }
            }
            if !failures.is_empty() {
                state.grant_free_slots();
            }
        }
        for connection in orphans {
            close_quietly(&shared.dsn, connection).await;
        }

        if failures.is_empty() {
            info!("Grew pool '{}' by {} to {}", shared.dsn, count, target);
            Ok(())
        } else {
            error!(
                "Growing pool '{}' to {}: {} of {} connections failed",
                shared.dsn,
                target,
                failures.len(),
                count
            );
            Err(PoolError::ResizeFailed {
                requested: target,
                reason: format!("{} of {} connections failed: {}", failures.len(), count, failures[0]),
            })
        }
    }

    async fn shrink(
        &self,
        target: usize,
        requested: usize,
        closing: Vec<Box<dyn DatabaseConnection>>,
    ) -> PoolResult<()> {
        let removed = closing.len();
        let mut failures = Vec::new();
        for mut connection in closing {
            if let Err(e) = connection.close().await {
                warn!("Failed to close connection while shrinking '{}': {}", self.shared.dsn, e);
                failures.push(e.to_string());
            }
        }

        if removed < requested {
            info!(
                "Shrank pool '{}' by {} of {} requested; remaining connections are busy",
                self.shared.dsn, removed, requested
            );
        } else {
            info!("Shrank pool '{}' by {} to {}", self.shared.dsn, removed, target);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::ResizeFailed {
                requested: target,
                reason: format!("{} connections failed to close: {}", failures.len(), failures[0]),
            })
        }
    }

    /// Close idle connections past `idle_timeout`, keeping at least `min_pool_size`
    pub async fn evict_idle_connections(&self) -> usize {
        self.shared.evict_idle().await
    }

    fn start_cleanup_task(&self) {
        let weak: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let period = *self.shared.config.get_cleanup_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.evict_idle().await;
            }
        });

        if let Some(previous) = self.cleanup_handle.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Get pool statistics with lifetime acquire counters
    pub fn extended_stats(&self) -> ExtendedPoolStats {
        ExtendedPoolStats {
            metrics: self.pool_metrics(),
            acquire_count: self.shared.acquire_count.load(Ordering::Relaxed),
            acquire_errors: self.shared.acquire_errors.load(Ordering::Relaxed),
            uptime: self.shared.created_at.elapsed(),
        }
    }

    /// Run the configured probe query and report pool health
    pub async fn health_check(&self) -> PoolResult<PoolHealthReport> {
        let started = Instant::now();
        self.query(self.shared.config.get_health_check_query())
            .await
            .map_err(|e| PoolError::HealthCheckFailed { reason: e.to_string() })?;

        let report = PoolHealthReport {
            check_duration: started.elapsed(),
            stats: self.extended_stats(),
        };
        debug!("Pool '{}' health: {}", self.shared.dsn, report.status_summary());
        Ok(report)
    }

    /// Reject every queued caller, then close all idle connections.
    /// Connections still lent out are closed when their guards drop.
    pub async fn close(&self) -> PoolResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }

        let (waiters, idle, lent) = {
            let mut state = self.shared.state.lock();
            state.status = PoolStatus::Closed;
            let waiters: Vec<WaitingClient> = state.waiters.drain(..).collect();
            let mut idle = Vec::new();
            let mut lent = 0;
            for entry in state.entries.drain(..) {
                match entry.connection {
                    Some(connection) => idle.push(connection),
                    None => lent += 1,
                }
            }
            (waiters, idle, lent)
        };

        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.sender.send(WaitOutcome::Rejected(PoolError::PoolClosing));
        }

        let closing = idle.len();
        for connection in idle {
            close_quietly(&self.shared.dsn, connection).await;
        }

        info!(
            "Connection pool '{}' closed ({} connections closed, {} still lent out, {} waiters rejected)",
            self.shared.dsn, closing, lent, rejected
        );
        Ok(())
    }

    #[cfg(test)]
    fn entry_ids(&self) -> Vec<u64> {
        self.shared.state.lock().entries.iter().map(|e| e.id).collect()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ScalablePool for PooledConnection {
    fn pool_metrics(&self) -> PoolMetrics {
        PooledConnection::pool_metrics(self)
    }

    async fn resize_pool(&self, new_size: usize) -> PoolResult<()> {
        PooledConnection::resize_pool(self, new_size).await
    }

    fn size_bounds(&self) -> (usize, usize) {
        (*self.shared.config.get_min_pool_size(), *self.shared.config.get_max_pool_size())
    }
}

/// A connection checked out of a [`PooledConnection`]
///
/// Dereferences to the underlying connection and returns it to the pool on drop.
pub struct PoolGuard {
    shared: Arc<PoolShared>,
    lease: Option<Lease>,
}

const LEASE_HELD: &str = "lease is held until the guard is dropped";

impl PoolGuard {
    /// Identifier of the pool entry backing this guard
    pub fn entry_id(&self) -> u64 {
        self.lease.as_ref().map(|l| l.entry_id).unwrap_or_default()
    }
}

impl Deref for PoolGuard {
    type Target = dyn DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        self.lease.as_ref().expect(LEASE_HELD).connection.as_ref()
    }
}

impl DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.lease.as_mut().expect(LEASE_HELD).connection.as_mut()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.shared.release(lease);
        }
    }
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("dsn", &self.shared.dsn)
            .field("entry_id", &self.entry_id())
            .finish()
    }
}

fn creation_error(err: PoolError) -> PoolError {
    match err {
        PoolError::ConnectionFailed(_) => err,
        other => PoolError::ConnectionFailed(other.to_string()),
    }
}

async fn close_quietly(dsn: &str, mut connection: Box<dyn DatabaseConnection>) {
    if let Err(e) = connection.close().await {
        warn!("Failed to close connection for '{}': {}", dsn, e);
    }
}

/// Close a connection that came back after its entry was removed
fn close_detached(dsn: String, connection: Box<dyn DatabaseConnection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { close_quietly(&dsn, connection).await });
        }
        Err(_) => debug!("No runtime to close returned connection for '{}'; dropping it", dsn),
    }
}
