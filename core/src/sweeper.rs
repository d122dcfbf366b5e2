//! Presence sweeper
//!
//! A single periodic task polls the registry's ignore set and evicts devices
//! not re-sighted within the staleness window. Polling one shared tick
//! instead of arming a timer per device bounds timer churn as device counts
//! fluctuate; the cost is up to one tick of detection latency.

use crate::events::DiscoveryEvent;
use crate::registry::DeviceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Evicts stale ignore-set devices on a fixed interval.
pub struct PresenceSweeper {
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    window: Duration,
}

impl PresenceSweeper {
    /// Create a sweeper over the shared registry.
    pub fn new(registry: Arc<DeviceRegistry>, interval: Duration, window: Duration) -> Self {
        Self {
            registry,
            interval,
            window,
        }
    }

    /// Spawn the sweep loop. Each evicted device produces exactly one
    /// [`DiscoveryEvent::DeviceOutOfRange`] on `events`. The loop runs until
    /// the returned handle is aborted or the event channel closes.
    pub fn spawn(self, events: mpsc::Sender<DiscoveryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick of tokio's interval fires immediately; consume it so
            // the first sweep happens one full interval after start.
            tick.tick().await;

            loop {
                tick.tick().await;
                for device in self.registry.sweep_stale(self.window) {
                    info!(address = %device.address, "device out of range");
                    if events
                        .send(DiscoveryEvent::DeviceOutOfRange(device))
                        .await
                        .is_err()
                    {
                        debug!("event channel closed, sweeper exiting");
                        return;
                    }
                }
            }
        })
    }
}
