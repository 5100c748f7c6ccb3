//! Background expiry sweeper: cancels pending bookings whose payment window
//! lapsed and completes confirmed bookings whose session has ended.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time;
use tracing::{error, info};

use shared::Error;

use crate::store::Store;

pub struct ExpirySweeper {
    store: Arc<dyn Store>,
    pending_ttl: chrono::Duration,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn Store>, pending_ttl_minutes: i64, interval_secs: u64) -> Self {
        Self {
            store,
            pending_ttl: chrono::Duration::minutes(pending_ttl_minutes),
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep(Utc::now()).await {
                error!("Error sweeping expired bookings: {}", e);
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let cutoff = now - self.pending_ttl;
        let cancelled = self.store.cancel_stale_pending(cutoff, now).await?;
        for id in &cancelled {
            info!("booking {} cancelled, payment window lapsed", id);
        }

        let completed = self.store.complete_elapsed_confirmed(now).await?;
        for id in &completed {
            info!("booking {} completed, session ended", id);
        }

        Ok(())
    }
}
