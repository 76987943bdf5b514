// Request throttling for shared RPC connections
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep, Instant};

use super::{ChainClient, ChainError, LogQuery, ObservedLog, PendingTx, TxRef, TxRequest};
use crate::transfer::types::ChainId;

/// Limits applied to one RPC endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Max concurrent in-flight requests
    pub max_in_flight: usize,
    /// Minimum spacing between two requests (ms)
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            min_interval_ms: 50,
        }
    }
}

/// Wraps a chain client so that every transfer sharing it stays under the
/// provider's rate limit.
///
/// Share one instance per endpoint (behind an `Arc`) across all transfers.
pub struct RateLimitedClient<C> {
    inner: C,
    permits: Semaphore,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<C: ChainClient> RateLimitedClient<C> {
    pub fn new(inner: C, config: &RateLimitConfig) -> Self {
        Self {
            inner,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_request: Mutex::new(None),
        }
    }

    pub fn shared(inner: C, config: &RateLimitConfig) -> Arc<Self> {
        Arc::new(Self::new(inner, config))
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Number of requests that can start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn throttle(&self) -> Result<SemaphorePermit<'_>, ChainError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ChainError::Network("rate limiter closed".to_string()))?;

        if !self.min_interval.is_zero() {
            let mut last = self.last_request.lock().await;
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < self.min_interval {
                    sleep(self.min_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        Ok(permit)
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for RateLimitedClient<C> {
    fn chain_id(&self) -> ChainId {
        self.inner.chain_id()
    }

    fn sender(&self) -> Address {
        self.inner.sender()
    }

    async fn prepare(&self, tx: &TxRequest) -> Result<PendingTx, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.prepare(tx).await
    }

    async fn submit(&self, tx: &PendingTx) -> Result<TxRef, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.submit(tx).await
    }

    async fn reset_nonce(&self) {
        self.inner.reset_nonce().await
    }

    async fn get_confirmations(&self, tx: TxRef) -> Result<u64, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.get_confirmations(tx).await
    }

    async fn get_balance(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.get_balance(account, token).await
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.block_number().await
    }

    async fn find_logs(&self, query: &LogQuery) -> Result<Vec<ObservedLog>, ChainError> {
        let _permit = self.throttle().await?;
        self.inner.find_logs(query).await
    }
}
