//! Lease keep-alive for a claimed job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

use crate::store::{JobStore, StoreError};

/// Why a job's lease ended while it was still being worked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseLost {
    pub reason: String,
}

/// Stops the heartbeat task when stopped or dropped.
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts refreshing `job_id`'s heartbeat every `interval`.
    ///
    /// The returned receiver fires once if the store reports the job is no
    /// longer processing. Other heartbeat errors are logged and retried on
    /// the next tick.
    pub fn start(
        store: Arc<dyn JobStore>,
        job_id: &str,
        interval: Duration,
    ) -> (Self, oneshot::Receiver<LeaseLost>) {
        let (lost_tx, lost_rx) = oneshot::channel();
        let job_id = job_id.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // claim already stamped the heartbeat

            loop {
                ticker.tick().await;
                match store.heartbeat(&job_id, Utc::now()).await {
                    Ok(()) => trace!(job_id = %job_id, "Heartbeat sent"),
                    Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                        warn!(job_id = %job_id, "Lease lost: {}", e);
                        let _ = lost_tx.send(LeaseLost {
                            reason: e.to_string(),
                        });
                        return;
                    }
                    Err(e) => warn!(job_id = %job_id, "Heartbeat failed, retrying: {}", e),
                }
            }
        });

        (Self { task }, lost_rx)
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
