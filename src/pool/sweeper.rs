//! Idle Connection Sweeper
//!
//! A background task that periodically closes pooled connections that have
//! sat idle for longer than the configured timeout. Each tick walks every
//! key's queue from the oldest entry and stops at the first fresh one.
//!
//! The sweeper only holds a weak reference to the pool, so it never keeps a
//! dropped pool alive; it exits on shutdown or once the pool is gone.

use super::connection_pool::PoolShared;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// A handle to the running sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct IdleSweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl IdleSweeper {
    /// Starts the sweeper as a background task ticking every `interval`.
    pub(crate) fn start<F>(pool: Weak<PoolShared<F>>, interval: Duration) -> Self
    where
        F: Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(pool, interval, shutdown_rx));

        debug!(interval_ms = interval.as_millis() as u64, "Idle sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Idle sweeper stopped");
        }
    }
}

impl Drop for IdleSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop<F>(
    pool: Weak<PoolShared<F>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Wait for the next tick or shutdown signal
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Idle sweeper received shutdown signal");
                    return;
                }
            }
        }

        let Some(pool) = pool.upgrade() else {
            debug!("Connection pool dropped, idle sweeper exiting");
            return;
        };

        let evicted = pool.evict_idle(Instant::now());
        if evicted > 0 {
            debug!(evicted, "Idle connections evicted");
        } else {
            trace!("Idle sweep found nothing to evict");
        }
    }
}
