//! Interval poller that drains the automation job queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::AutomationEngine;

/// Polls the job queue on a fixed interval, draining it fully each round.
pub struct AutomationPoller {
    engine: Arc<AutomationEngine>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl AutomationPoller {
    pub fn new(engine: Arc<AutomationEngine>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Spawn the polling loop. The first drain happens immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let interval = self.interval;
        let mut shutdown = self.shutdown.subscribe();
        info!(interval_secs = interval.as_secs(), "🤖 Automation poller started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        info!("🛑 Automation poller stopping");
                        break;
                    }
                }
                // Drain the whole queue before sleeping again.
                loop {
                    match engine.process_next().await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!("automation poll failed: {e}");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
