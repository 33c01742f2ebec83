//! Background feed loads with an immediate acknowledgement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use crate::error::LoadError;
use crate::fetch::HttpClient;
use crate::loader::{FeedLoader, LoadSummary};

/// Runs feed loads on the tokio runtime, at most `max_concurrent_loads` at a
/// time. Loads queued beyond that wait for a permit.
pub struct LoadScheduler<C: HttpClient> {
    loader: Arc<FeedLoader<C>>,
    permits: Arc<Semaphore>,
}

impl<C: HttpClient> Clone for LoadScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            permits: Arc::clone(&self.permits),
        }
    }
}

/// Returned as soon as a load is queued.
#[derive(Debug)]
pub struct LoadAck {
    pub url: String,
    pub accepted_at: DateTime<Utc>,
    handle: JoinHandle<Result<LoadSummary, LoadError>>,
}

impl LoadAck {
    /// Waits for the load to finish. The outcome is already in the import
    /// ledger either way.
    pub async fn wait(self) -> Result<LoadSummary, LoadError> {
        self.handle.await?
    }
}

impl<C: HttpClient + 'static> LoadScheduler<C> {
    pub fn new(loader: FeedLoader<C>, max_concurrent_loads: usize) -> Self {
        Self {
            loader: Arc::new(loader),
            permits: Arc::new(Semaphore::new(max_concurrent_loads.max(1))),
        }
    }

    /// Queues a load of `source` and returns without waiting for it.
    pub fn trigger(&self, source: &str) -> LoadAck {
        let loader = Arc::clone(&self.loader);
        let permits = Arc::clone(&self.permits);
        let owned = source.to_string();
        let span = tracing::info_span!("scheduled_load", source = %source);

        let handle = tokio::spawn(
            async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await;
                loader.load_source(&owned).await
            }
            .instrument(span),
        );

        info!(source, "Feed load accepted");

        LoadAck {
            url: source.to_string(),
            accepted_at: Utc::now(),
            handle,
        }
    }

    /// Triggers a load every `interval`, `count` times (0 = until the process
    /// exits), waiting for each to finish before sleeping.
    pub async fn refresh_every(&self, source: &str, interval: std::time::Duration, count: usize) {
        let mut round = 0;
        loop {
            round += 1;
            let ack = self.trigger(source);
            if let Err(e) = ack.wait().await {
                warn!(round, error = %e, "Scheduled refresh failed; keeping the previous feed");
            }

            if count > 0 && round >= count {
                break;
            }
            info!(interval_secs = interval.as_secs(), "Waiting before next refresh");
            tokio::time::sleep(interval).await;
        }
    }
}
