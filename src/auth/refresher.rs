// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Set Refresher
//!
//! Background task that refreshes the signing key set on its TTL schedule so
//! request handlers rarely pay for a fetch.
//!
//! ## Strategy
//!
//! Every `interval` (the cache TTL by default) the refresher calls
//! [`KeySetCache::refresh`]. A failed refresh leaves the cached keys in
//! place and is retried after `retry_interval` instead of a full TTL.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::jwks::KeySetCache;

/// Delay before retrying a failed scheduled refresh.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Background key set refresher.
pub struct KeySetRefresher {
    cache: KeySetCache,
    interval: Duration,
    retry_interval: Duration,
}

impl KeySetRefresher {
    /// Create a refresher that runs on the cache's own TTL.
    pub fn new(cache: KeySetCache) -> Self {
        let interval = cache.ttl();
        Self {
            cache,
            interval,
            retry_interval: DEFAULT_RETRY_INTERVAL.min(interval),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Run the refresh loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(refresher.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            jwks_uri = %self.cache.jwks_uri(),
            "Key set refresher starting"
        );

        let mut delay = if self.cache.is_cached().await {
            self.interval
        } else {
            self.refresh_step().await
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = shutdown.cancelled() => {
                    info!("Key set refresher shutting down");
                    return;
                }
            }

            delay = self.refresh_step().await;
        }
    }

    /// One refresh attempt. Returns how long to wait before the next one.
    async fn refresh_step(&self) -> Duration {
        match self.cache.refresh().await {
            Ok(()) => {
                let keys = self.cache.key_ids().await;
                info!(keys = ?keys, "Scheduled key set refresh complete");
                self.interval
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_secs = self.retry_interval.as_secs(),
                    "Scheduled key set refresh failed, keeping cached keys"
                );
                self.retry_interval
            }
        }
    }
}
