use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use super::clock::TimeSource;

/// One tick, stamped with the generation of the phase that started the ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    pub generation: u64,
    pub at: DateTime<Utc>,
}

/// Cancellable periodic timer; aborts its task when cancelled or dropped
pub struct Ticker {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn a task that sends a tick every `period`, the first one immediately
    pub fn start(
        generation: u64,
        period: Duration,
        time: TimeSource,
        tx: mpsc::Sender<TickEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticks.tick().await;
                let event = TickEvent {
                    generation,
                    at: time.now(),
                };
                if tx.send(event).await.is_err() {
                    debug!("Tick receiver closed, stopping ticker {}", generation);
                    break;
                }
            }
        });

        Self { generation, handle }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
