//! Poll-and-dispatch event pump for Keystone.
//!
//! Platform SDKs of this kind do not call back on their own: something has
//! to poll them. The pump polls [`Platform::poll_events`] at a fixed rate
//! and hands every event it drains to [`Registry::resolve`].
//!
//! # Integration
//!
//! The client spawns one pump per registry:
//!
//! ```ignore
//! let pump = EventPump::spawn(Arc::clone(&registry), PumpConfig::default());
//! // ... requests come and go ...
//! let totals = pump.shutdown().await;
//! ```
//!
//! Tests that want full control over delivery skip the task and call
//! [`dispatch_once`] directly.

use std::sync::Arc;
use std::time::Duration;

use keystone_platform::Platform;
use keystone_registry::{Registry, ResolveStatus};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the event pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// How many times per second the platform is polled.
    pub poll_rate_hz: u32,
    /// Random jitter (0–max µs) added to the first poll so several clients
    /// started together do not poll in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: 30,
            initial_jitter_us: 2_000,
        }
    }
}

impl PumpConfig {
    /// Maximum supported poll rate.
    pub const MAX_POLL_RATE_HZ: u32 = 128;

    /// A config for a specific poll rate with default jitter.
    pub fn with_rate(poll_rate_hz: u32) -> Self {
        Self {
            poll_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp the poll rate into `1..=MAX_POLL_RATE_HZ`.
    ///
    /// A pump that never polls would strand every waiter, so 0 is raised
    /// to 1 rather than accepted.
    pub fn validated(mut self) -> Self {
        if self.poll_rate_hz == 0 {
            warn!("poll_rate_hz is 0 — raising to 1");
            self.poll_rate_hz = 1;
        } else if self.poll_rate_hz > Self::MAX_POLL_RATE_HZ {
            warn!(
                rate = self.poll_rate_hz,
                max = Self::MAX_POLL_RATE_HZ,
                "poll_rate_hz exceeds maximum — clamping"
            );
            self.poll_rate_hz = Self::MAX_POLL_RATE_HZ;
        }
        self
    }

    /// Time between polls. Assumes a validated (non-zero) rate.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.poll_rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters for what the pump has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Number of times the platform was polled.
    pub polls: u64,
    /// Events handed to a waiting caller.
    pub delivered: u64,
    /// Events for handles nobody was waiting on.
    pub discarded: u64,
}

impl PumpStats {
    fn absorb(&mut self, batch: PumpStats) {
        self.polls += batch.polls;
        self.delivered += batch.delivered;
        self.discarded += batch.discarded;
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Polls the platform once and resolves every event it returns.
pub fn dispatch_once<P: Platform>(registry: &Registry<P>) -> PumpStats {
    let mut batch = PumpStats {
        polls: 1,
        ..Default::default()
    };

    for event in registry.platform().poll_events() {
        match registry.resolve(event) {
            ResolveStatus::Delivered => batch.delivered += 1,
            ResolveStatus::Discarded => batch.discarded += 1,
        }
    }

    if batch.delivered + batch.discarded > 0 {
        debug!(
            delivered = batch.delivered,
            discarded = batch.discarded,
            "dispatched platform events"
        );
    }
    batch
}

// ---------------------------------------------------------------------------
// Pump task
// ---------------------------------------------------------------------------

/// Spawns and owns the background polling task.
pub struct EventPump;

impl EventPump {
    /// Starts polling on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime, like `tokio::spawn`.
    pub fn spawn<P: Platform>(
        registry: Arc<Registry<P>>,
        config: PumpConfig,
    ) -> PumpHandle {
        let config = config.validated();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (stats_tx, stats_rx) = watch::channel(PumpStats::default());

        debug!(
            rate_hz = config.poll_rate_hz,
            interval_ms = config.poll_interval().as_secs_f64() * 1000.0,
            "event pump started"
        );

        let task = tokio::spawn(run(registry, config, shutdown_rx, stats_tx));

        PumpHandle {
            shutdown: Some(shutdown_tx),
            task,
            stats: stats_rx,
        }
    }
}

async fn run<P: Platform>(
    registry: Arc<Registry<P>>,
    config: PumpConfig,
    mut shutdown: oneshot::Receiver<()>,
    stats: watch::Sender<PumpStats>,
) -> PumpStats {
    let period = config.poll_interval();
    let jitter = if config.initial_jitter_us > 0 {
        Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
    } else {
        Duration::ZERO
    };

    let mut interval = time::interval_at(Instant::now() + period + jitter, period);
    // A late poll drains everything queued anyway; bursts of catch-up
    // polls would only find empty queues.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut totals = PumpStats::default();
    loop {
        tokio::select! {
            // Fires on an explicit shutdown or when the handle is dropped.
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                totals.absorb(dispatch_once(&registry));
                trace!(polls = totals.polls, "pump tick");
                stats.send_replace(totals);
            }
        }
    }

    // One last drain so events queued before shutdown still reach waiters.
    totals.absorb(dispatch_once(&registry));
    stats.send_replace(totals);
    debug!(
        polls = totals.polls,
        delivered = totals.delivered,
        discarded = totals.discarded,
        "event pump stopped"
    );
    totals
}

/// Handle to a running pump. Dropping it stops the pump.
pub struct PumpHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<PumpStats>,
    stats: watch::Receiver<PumpStats>,
}

impl PumpHandle {
    /// Totals as of the most recent poll.
    pub fn stats(&self) -> PumpStats {
        *self.stats.borrow()
    }

    /// Whether the pump task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the pump after one final drain and returns its totals.
    pub async fn shutdown(mut self) -> PumpStats {
        if let Some(tx) = self.shutdown.take() {
            // The task may already be gone; that is fine.
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(totals) => totals,
            Err(e) => {
                tracing::error!(error = %e, "event pump task failed");
                *self.stats.borrow()
            }
        }
    }
}
