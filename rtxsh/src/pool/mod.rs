//! Bounded pool of long-lived sessions.
//!
//! The router accepts only a handful of simultaneous shell logins, so
//! callers share at most [`PoolConfig::max_sessions`] sessions. A caller
//! [`acquire`](Pool::acquire)s a session, uses it exclusively, and then
//! either [`release`](Pool::release)s it for reuse or
//! [`discard`](Pool::discard)s it when it can no longer be trusted.
//!
//! The pool is generic over a [`ResourceFactory`] so the bookkeeping can
//! be exercised without a router; [`SessionFactory`] is the factory that
//! dials real sessions.

mod session;

pub use session::SessionFactory;

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{ConfigError, Error, PoolError, Result};

/// Creates and tears down pooled resources.
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Create a new resource. Called without the pool lock held.
    fn create(&self, ctx: &Context) -> impl Future<Output = Result<Self::Resource>> + Send;

    /// Dispose of a resource. Must not fail; errors are the factory's to log.
    fn close(&self, resource: Self::Resource) -> impl Future<Output = ()> + Send;
}

/// Pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on sessions in use plus sessions being created.
    pub max_sessions: usize,

    /// Idle time after which an available session is closed by the sweep.
    #[serde(with = "secs")]
    pub idle_timeout: Duration,

    /// Longest an `acquire` waits for a free slot.
    #[serde(with = "secs")]
    pub acquire_timeout: Duration,

    /// Interval between idle sweeps.
    #[serde(with = "secs")]
    pub sweep_interval: Duration,

    /// Whether to run the idle sweep at all.
    pub idle_sweep: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            idle_sweep: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(invalid("max_sessions must be at least 1"));
        }
        if self.acquire_timeout.is_zero() {
            return Err(invalid("acquire_timeout must be positive"));
        }
        if self.idle_sweep && self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    ConfigError::Invalid {
        message: message.to_string(),
    }
    .into()
}

/// Durations as whole seconds in serialized configuration.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_created: u64,
    pub in_use: usize,
    pub available: usize,
    pub pending: usize,
    pub total_acquisitions: u64,
    pub wait_count: u64,
    pub max_sessions: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Meta {
    id: u64,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

enum Step<R> {
    Reuse(Idle<R>),
    Create,
    Wait,
}

struct Idle<R> {
    meta: Meta,
    resource: R,
}

struct PoolState<R> {
    /// LIFO: the most recently released session is handed out first.
    available: Vec<Idle<R>>,
    in_use: HashSet<u64>,
    pending: usize,
    next_id: u64,
    total_created: u64,
    total_acquisitions: u64,
    wait_count: u64,
    closed: bool,
}

struct Shared<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Resource>>,
    released: Notify,
    shutdown: CancellationToken,
}

impl<F: ResourceFactory> Shared<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_created: state.total_created,
            in_use: state.in_use.len(),
            available: state.available.len(),
            pending: state.pending,
            total_acquisitions: state.total_acquisitions,
            wait_count: state.wait_count,
            max_sessions: self.config.max_sessions,
            closed: state.closed,
        }
    }

    /// Wake one waiter if there is something for it to take.
    fn pass_on(&self) {
        let state = self.lock();
        let has_room = state.in_use.len() + state.pending < self.config.max_sessions;
        if !state.closed && (!state.available.is_empty() || has_room) {
            drop(state);
            self.released.notify_one();
        }
    }

    async fn release(&self, meta: Meta, resource: F::Resource) {
        let rejected = {
            let mut state = self.lock();
            state.in_use.remove(&meta.id);
            if state.closed {
                Some(resource)
            } else {
                state.available.push(Idle {
                    meta: Meta {
                        last_used: Instant::now(),
                        ..meta
                    },
                    resource,
                });
                None
            }
        };

        match rejected {
            Some(resource) => {
                debug!("Pool closed, closing released session {}", meta.id);
                self.factory.close(resource).await;
            }
            None => {
                debug!("Released session {} (used {} times)", meta.id, meta.use_count);
                self.released.notify_one();
            }
        }
    }

    fn forget(&self, id: u64) {
        self.lock().in_use.remove(&id);
        self.released.notify_one();
    }

    async fn sweep_idle(&self) {
        let now = Instant::now();
        let expired = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let mut idle = std::mem::take(&mut state.available);
            idle.sort_by_key(|i| i.meta.last_used);
            let newest = idle.len().saturating_sub(1);
            let mut expired = Vec::new();
            for (index, entry) in idle.into_iter().enumerate() {
                let idle_for = now.saturating_duration_since(entry.meta.last_used);
                if index < newest && idle_for >= self.config.idle_timeout {
                    expired.push(entry);
                } else {
                    state.available.push(entry);
                }
            }
            expired
        };

        if expired.is_empty() {
            return;
        }
        for entry in &expired {
            info!(
                "Closing idle session {} (idle {:?}, age {:?})",
                entry.meta.id,
                now.saturating_duration_since(entry.meta.last_used),
                now.saturating_duration_since(entry.meta.created_at),
            );
        }
        join_all(expired.into_iter().map(|e| self.factory.close(e.resource))).await;
    }
}

impl<F: ResourceFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Decrements the pending-creation count unless the creation completed.
struct PendingCreation<'a, F: ResourceFactory> {
    shared: &'a Shared<F>,
    armed: bool,
}

impl<F: ResourceFactory> Drop for PendingCreation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().pending -= 1;
            self.shared.released.notify_one();
        }
    }
}

/// A bounded pool of resources created by `F`.
pub struct Pool<F: ResourceFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool. With the idle sweep enabled this must be called
    /// from within a Tokio runtime.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            factory,
            config,
            state: Mutex::new(PoolState {
                available: Vec::new(),
                in_use: HashSet::new(),
                pending: 0,
                next_id: 1,
                total_created: 0,
                total_acquisitions: 0,
                wait_count: 0,
                closed: false,
            }),
            released: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        if shared.config.idle_sweep {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::Invalid {
                message: "the idle sweep needs a Tokio runtime".to_string(),
            })?;
            runtime.spawn(sweep_loop(
                Arc::downgrade(&shared),
                shared.shutdown.clone(),
                shared.config.sweep_interval,
            ));
        }

        debug!("Created pool (max {} sessions)", shared.config.max_sessions);
        Ok(Self { shared })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Take a session from the pool, creating one if there is room.
    ///
    /// Waits at most [`PoolConfig::acquire_timeout`] or until `ctx`
    /// ends, whichever is sooner.
    pub async fn acquire(&self, ctx: &Context) -> Result<Pooled<F>> {
        let start = Instant::now();
        let deadline = start + self.shared.config.acquire_timeout;
        let mut waited = false;

        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(PoolError::Closed.into());
                }
                if let Some(mut idle) = state.available.pop() {
                    idle.meta.use_count += 1;
                    idle.meta.last_used = Instant::now();
                    state.in_use.insert(idle.meta.id);
                    state.total_acquisitions += 1;
                    Step::Reuse(idle)
                } else if state.in_use.len() + state.pending < self.shared.config.max_sessions {
                    state.pending += 1;
                    Step::Create
                } else {
                    if !waited {
                        state.wait_count += 1;
                        waited = true;
                    }
                    debug!(
                        "Pool exhausted ({} in use, {} pending), waiting",
                        state.in_use.len(),
                        state.pending
                    );
                    Step::Wait
                }
            };

            match step {
                Step::Reuse(idle) => {
                    debug!("Acquired session {} (use {})", idle.meta.id, idle.meta.use_count);
                    return Ok(self.wrap(idle.meta, idle.resource));
                }
                Step::Create => return self.create(ctx).await,
                Step::Wait => {}
            }

            tokio::select! {
                biased;
                err = ctx.done() => {
                    self.shared.pass_on();
                    return Err(err);
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.shared.pass_on();
                    let waited = start.elapsed();
                    warn!("Timed out after {:?} waiting for a pooled session", waited);
                    return Err(PoolError::Exhausted { waited }.into());
                }
            }
        }
    }

    async fn create(&self, ctx: &Context) -> Result<Pooled<F>> {
        let mut pending = PendingCreation {
            shared: &self.shared,
            armed: true,
        };

        let resource = match self.shared.factory.create(ctx).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!("Failed to create session: {}", e);
                return Err(e);
            }
        };

        let meta = {
            let mut state = self.shared.lock();
            state.pending -= 1;
            pending.armed = false;
            if state.closed {
                None
            } else {
                let now = Instant::now();
                let meta = Meta {
                    id: state.next_id,
                    created_at: now,
                    last_used: now,
                    use_count: 1,
                };
                state.next_id += 1;
                state.total_created += 1;
                state.total_acquisitions += 1;
                state.in_use.insert(meta.id);
                Some((meta, state.in_use.len()))
            }
        };

        match meta {
            Some((meta, in_use)) => {
                info!("Created session {} ({} in use)", meta.id, in_use);
                Ok(self.wrap(meta, resource))
            }
            None => {
                debug!("Pool closed during session creation");
                self.shared.factory.close(resource).await;
                Err(PoolError::Closed.into())
            }
        }
    }

    fn wrap(&self, meta: Meta, resource: F::Resource) -> Pooled<F> {
        Pooled {
            meta,
            resource: Some(resource),
            pool: self.shared.clone(),
        }
    }

    /// Return a healthy session for reuse. Its state, including the
    /// privilege mode, is kept as is.
    pub async fn release(&self, mut pooled: Pooled<F>) {
        if let Some(resource) = pooled.resource.take() {
            pooled.pool.release(pooled.meta, resource).await;
        }
    }

    /// Remove a broken session from the pool and close it.
    pub async fn discard(&self, mut pooled: Pooled<F>) {
        if let Some(resource) = pooled.resource.take() {
            info!("Discarding session {}", pooled.meta.id);
            pooled.pool.forget(pooled.meta.id);
            pooled.pool.factory.close(resource).await;
        }
    }

    /// Close the pool: idle sessions are closed now, sessions in use are
    /// closed as they come back. Later acquisitions fail with
    /// [`PoolError::Closed`].
    pub async fn close(&self) {
        let idle = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.available)
        };
        self.shared.shutdown.cancel();
        self.shared.released.notify_waiters();

        info!("Closing pool ({} idle sessions)", idle.len());
        join_all(idle.into_iter().map(|i| self.shared.factory.close(i.resource))).await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Log the current counters at info level.
    pub fn log_stats(&self) {
        let s = self.stats();
        info!(
            "Pool stats: total_created={} in_use={} available={} total_acquisitions={} wait_count={}",
            s.total_created, s.in_use, s.available, s.total_acquisitions, s.wait_count
        );
    }
}

async fn sweep_loop<F: ResourceFactory>(shared: Weak<Shared<F>>, shutdown: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.sweep_idle().await;
    }
    debug!("Idle sweep stopped");
}

/// A resource checked out of a [`Pool`].
///
/// Hand it back with [`Pool::release`] or [`Pool::discard`]. Dropping it
/// instead is treated as a discard.
pub struct Pooled<F: ResourceFactory> {
    meta: Meta,
    // Some for as long as the caller holds the guard. Only release,
    // discard and Drop take it, and each of them consumes the guard.
    resource: Option<F::Resource>,
    pool: Arc<Shared<F>>,
}

impl<F: ResourceFactory> Pooled<F> {
    /// Pool-assigned identifier, unique for the pool's lifetime.
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// How many times this resource has been acquired.
    pub fn use_count(&self) -> u64 {
        self.meta.use_count
    }

    pub fn created_at(&self) -> Instant {
        self.meta.created_at
    }
}

/// Deref cannot observe `None`: the guard is consumed whenever the
/// resource is taken.
const CHECKED_OUT: &str = "pooled resource is present until released or discarded";

impl<F: ResourceFactory> Deref for Pooled<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect(CHECKED_OUT)
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect(CHECKED_OUT)
    }
}

impl<F: ResourceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        warn!("Session {} dropped without release; discarding it", self.meta.id);
        self.pool.forget(self.meta.id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.pool.clone();
                runtime.spawn(async move { pool.factory.close(resource).await });
            }
            Err(_) => debug!("No runtime to close session {}; dropping it", self.meta.id),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.meta.id)
            .field("use_count", &self.meta.use_count)
            .finish()
    }
}
