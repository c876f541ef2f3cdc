//! Periodic task driver.
//!
//! A [`Ticker`] awaits each tick of its task before arming the next one, so
//! two ticks of the same ticker never overlap. Transient task errors are
//! logged and the ticker keeps going; fatal errors stop it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TickerError;

/// What the ticker should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

#[derive(Debug)]
pub enum TaskError<E> {
    /// Logged; the next tick runs as usual.
    Transient(E),
    /// Stops the ticker and is returned to its caller.
    Fatal(E),
}

#[async_trait]
pub trait ScheduledTask: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn tick(&mut self, ctx: &CancellationToken) -> Result<Tick, TaskError<Self::Error>>;
}

#[derive(Debug)]
pub struct Ticker {
    name: String,
    interval: Duration,
}

impl Ticker {
    /// Create a new ticker. A zero interval is refused; `tokio::time::interval`
    /// panics on it.
    pub fn new(name: impl Into<String>, interval: Duration) -> Result<Self, TickerError> {
        let name = name.into();
        if interval.is_zero() {
            return Err(TickerError::ZeroInterval { name });
        }
        Ok(Self { name, interval })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drive `task` until it stops, fails fatally, or `ctx` is cancelled.
    ///
    /// The first tick fires immediately.
    pub async fn run<T>(&self, ctx: &CancellationToken, task: &mut T) -> Result<(), TickerError>
    where
        T: ScheduledTask + ?Sized,
    {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(ticker = %self.name, interval = ?self.interval, "ticker started");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(TickerError::Cancelled { name: self.name.clone() });
                }
                _ = interval.tick() => {}
            }

            let outcome = tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(TickerError::Cancelled { name: self.name.clone() });
                }
                outcome = task.tick(ctx) => outcome,
            };

            match outcome {
                Ok(Tick::Continue) => {}
                Ok(Tick::Stop) => {
                    info!(ticker = %self.name, "ticker stopped");
                    return Ok(());
                }
                Err(TaskError::Transient(e)) => {
                    warn!(ticker = %self.name, error = %e, "tick failed, will retry");
                }
                Err(TaskError::Fatal(e)) => {
                    return Err(TickerError::Task {
                        name: self.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
