//! Periodic purge of long-lapsed reservations.
//!
//! Lapsed holds already stop blocking their slot, so correctness never
//! depends on this task. It only keeps the bookings table small. Holds with a
//! pending or superseded payment intent are left alone, since the provider may
//! still settle it and the callback must find its booking.

use crate::engine::BookingEngine;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Bookings deleted per run.
const BATCH_SIZE: i64 = 500;

/// Background task deleting reservations whose hold lapsed long ago.
pub struct CleanupTask {
    engine: BookingEngine,
    every: Duration,
    max_age: chrono::Duration,
    shutdown: broadcast::Receiver<()>,
}

impl CleanupTask {
    /// Purge holds lapsed for more than `max_age`, every `every`.
    #[must_use]
    pub const fn new(
        engine: BookingEngine,
        every: Duration,
        max_age: chrono::Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            every,
            max_age,
            shutdown,
        }
    }

    /// Run one purge pass.
    ///
    /// Returns the number of deleted bookings.
    pub async fn run_once(&self) -> usize {
        let cutoff = self.engine.now() - self.max_age;
        match self.engine.purge_expired(cutoff, BATCH_SIZE).await {
            Ok(purged) => purged,
            Err(e) => {
                error!(error = %e, "Reservation cleanup failed");
                0
            }
        }
    }

    /// Spawn the task on the runtime.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(every = ?self.every, max_age_hours = self.max_age.num_hours(), "Reservation cleanup started");
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Reservation cleanup received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Reservation cleanup stopped");
    }
}
