//! Bounded concurrency for keysign ceremonies.
//!
//! A slot is held by a [`SlotGuard`]; dropping the guard releases the slot.
//! There is no explicit release call, so a slot cannot be released twice or
//! leaked on an early return.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RateLimitError;

pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicU64>,
    capacity: usize,
}

/// An acquired ceremony slot.
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    pending: Arc<AtomicU64>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // saturating: never wraps below zero
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            pending: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait for a free slot or for `ctx` to be cancelled.
    pub async fn acquire(&self, ctx: &CancellationToken) -> Result<SlotGuard, RateLimitError> {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(RateLimitError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| RateLimitError::Closed)?
            }
        };

        Ok(self.guard(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Result<SlotGuard, RateLimitError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.guard(permit)),
            Err(TryAcquireError::NoPermits) => {
                debug!(pending = self.pending(), "signing throttled");
                Err(RateLimitError::Throttled {
                    pending: self.pending(),
                })
            }
            Err(TryAcquireError::Closed) => Err(RateLimitError::Closed),
        }
    }

    /// Refuse all future acquisitions. Held slots stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn guard(&self, permit: OwnedSemaphorePermit) -> SlotGuard {
        self.pending.fetch_add(1, Ordering::AcqRel);
        SlotGuard {
            _permit: permit,
            pending: self.pending.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_throttle_and_release() {
        let limiter = RateLimiter::new(3);

        let a = limiter.try_acquire().unwrap();
        let b = limiter.try_acquire().unwrap();
        let c = limiter.try_acquire().unwrap();
        assert_eq!(limiter.pending(), 3);

        assert_eq!(
            limiter.try_acquire().unwrap_err(),
            RateLimitError::Throttled { pending: 3 }
        );

        drop(a);
        drop(b);
        drop(c);

        let d = limiter.try_acquire().unwrap();
        drop(d);
        assert_eq!(limiter.pending(), 0);
        assert_eq!(limiter.semaphore.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let limiter = RateLimiter::new(1);
        let _held = limiter.try_acquire().unwrap();

        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert_eq!(err, RateLimitError::Cancelled);
        assert_eq!(limiter.pending(), 1);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let limiter = Arc::new(RateLimiter::new(1));
        let held = limiter.try_acquire().unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire(&CancellationToken::new()).await.unwrap();
                limiter.pending()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(limiter.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_drops_never_underflow() {
        let limiter = Arc::new(RateLimiter::new(20));
        let guards: Vec<_> = (0..10).map(|_| limiter.try_acquire().unwrap()).collect();
        assert_eq!(limiter.pending(), 10);

        let handles: Vec<_> = guards
            .into_iter()
            .map(|g| tokio::spawn(async move { drop(g) }))
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(limiter.pending(), 0);
        assert_eq!(limiter.semaphore.available_permits(), 20);
    }

    #[tokio::test]
    async fn test_closed_limiter() {
        let limiter = RateLimiter::new(2);
        let held = limiter.try_acquire().unwrap();
        limiter.close();

        assert_eq!(limiter.try_acquire().unwrap_err(), RateLimitError::Closed);
        assert_eq!(
            limiter.acquire(&CancellationToken::new()).await.unwrap_err(),
            RateLimitError::Closed
        );
        drop(held);
        assert_eq!(limiter.pending(), 0);
    }
}
