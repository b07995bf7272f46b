//! Retry policies.
//!
//! A [`RetryStrategy`] maps a zero-based retry index to the delay before
//! that retry, or `None` once retries are exhausted. Executors consult it
//! for transport failures; [`retry_transient`] and [`poll_until`] are the
//! helpers collaborators use for device-reported transient errors and for
//! convergence polling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::context::Context;
use crate::error::{Error, ProtocolError, Result};

/// Decides whether and when to retry.
pub trait RetryStrategy: Send + Sync {
    /// Delay before retry number `attempt` (0-based), or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

impl<T: RetryStrategy + ?Sized> RetryStrategy for Arc<T> {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (**self).next_delay(attempt)
    }
}

impl<T: RetryStrategy + ?Sized> RetryStrategy for &T {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (**self).next_delay(attempt)
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Delay doubles each attempt starting at `base_delay`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10), 5)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub delay: Duration,
    pub max_retries: u32,
}

impl LinearBackoff {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

impl RetryStrategy for LinearBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then_some(self.delay)
    }
}

/// Run `op`, retrying while it fails with an error accepted by `retryable`.
///
/// The context is checked before every attempt and the delay between
/// attempts is cancellable. Errors `retryable` rejects, and the last
/// error once the strategy gives up, are returned unchanged.
pub async fn retry_when<T, F, Fut>(
    ctx: &Context,
    strategy: &dyn RetryStrategy,
    retryable: fn(&Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        ctx.check()?;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => match strategy.next_delay(attempt) {
                Some(delay) => {
                    debug!("Attempt {} failed, retrying in {:?}: {}", attempt + 1, delay, e);
                    ctx.sleep(delay).await?;
                    attempt += 1;
                }
                None => {
                    debug!("Giving up after {} attempts: {}", attempt + 1, e);
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// Run `op`, retrying while it fails with a transient device error
/// (busy, conflict, timeout).
pub async fn retry_transient<T, F, Fut>(
    ctx: &Context,
    strategy: &dyn RetryStrategy,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(ctx, strategy, Error::is_transient_device, op).await
}

/// Poll `observe` until it reports a value, waiting between polls according
/// to `strategy`.
///
/// `observe` returns `Ok(None)` while the expected state has not been
/// reached yet. Errors stop polling immediately.
pub async fn poll_until<T, F, Fut>(
    ctx: &Context,
    strategy: &dyn RetryStrategy,
    mut observe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempt = 0;
    loop {
        ctx.check()?;
        if let Some(value) = observe().await? {
            return Ok(value);
        }
        match strategy.next_delay(attempt) {
            Some(delay) => {
                ctx.sleep(delay).await?;
                attempt += 1;
            }
            None => {
                return Err(ProtocolError::NotConverged {
                    attempts: attempt + 1,
                }
                .into());
            }
        }
    }
}
