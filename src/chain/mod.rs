//! Chain access layer
//!
//! Every ledger interaction made by the coordinator and the bridge adapters
//! goes through the `ChainClient` trait. Transactions are signed first
//! (`prepare`) and broadcast second (`submit`) so the caller can persist the
//! hash and raw bytes in between.

pub mod erc20;
pub mod ethers_client;
pub mod mock;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transfer::types::ChainId;

pub use ethers_client::EthersChainClient;
pub use mock::MockChainClient;
pub use rate_limit::{RateLimitConfig, RateLimitedClient};
pub use retry::{retry_transient, RetryPolicy};

/// Transaction hash on some ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub H256);

impl TxRef {
    pub fn as_h256(&self) -> H256 {
        self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // H256's Display abbreviates the hash, Debug prints all 32 bytes
        write!(f, "{:?}", self.0)
    }
}

impl From<H256> for TxRef {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

/// Unsigned contract call produced by a bridge adapter
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    /// Native value attached to the call (bridge fees, L2 gas prepayment)
    pub value: U256,
    /// Explicit gas limit; estimated by the client when absent
    pub gas_limit: Option<U256>,
}

impl TxRequest {
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::zero(),
            gas_limit: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// A signed transaction that has been (or is about to be) broadcast.
///
/// `raw` is kept so the exact same bytes can be rebroadcast after a restart;
/// re-signing would risk a second transaction with a different nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: TxRef,
    pub raw: Bytes,
}

/// Event log filter used when looking for the destination-side arrival
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: H256,
    /// Indexed topics 1..=3, `None` matches anything
    pub topics: [Option<H256>; 3],
    pub from_block: u64,
}

impl LogQuery {
    pub fn new(address: Address, topic0: H256, from_block: u64) -> Self {
        Self {
            address,
            topic0,
            topics: [None, None, None],
            from_block,
        }
    }

    /// Constrain indexed topic `index` (1-based, like `topic1`..`topic3`)
    pub fn topic(mut self, index: usize, value: H256) -> Self {
        if (1..=3).contains(&index) {
            self.topics[index - 1] = Some(value);
        }
        self
    }

    pub fn matches(&self, address: Address, topics: &[H256], block_number: u64) -> bool {
        if address != self.address || block_number < self.from_block {
            return false;
        }
        if topics.first() != Some(&self.topic0) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, expected)| match expected {
            Some(t) => topics.get(i + 1) == Some(t),
            None => true,
        })
    }
}

/// A log returned by `find_logs`
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedLog {
    pub tx: TxRef,
    pub block_number: u64,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

/// Chain client failure
///
/// `Network` is transient (timeouts, connection refused, rate limited) and is
/// retried with backoff. `Rejected` means the ledger refused or reverted the
/// transaction and is terminal for that transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    Network(String),
    Rejected(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_))
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Network(msg) => write!(f, "Network error: {}", msg),
            ChainError::Rejected(msg) => write!(f, "Rejected by chain: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

/// Ledger client used by the coordinator and adapters
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain this client is connected to
    fn chain_id(&self) -> ChainId;

    /// Account that signs transactions prepared by this client
    fn sender(&self) -> Address;

    /// Fill nonce/gas and sign, without broadcasting
    async fn prepare(&self, tx: &TxRequest) -> Result<PendingTx, ChainError>;

    /// Broadcast a signed transaction.
    ///
    /// Must be idempotent: broadcasting bytes the node already knows returns
    /// the same hash instead of an error.
    async fn submit(&self, tx: &PendingTx) -> Result<TxRef, ChainError>;

    /// Forget any locally cached nonce so the next `prepare` asks the node.
    ///
    /// Called when a prepared transaction will never reach the node.
    async fn reset_nonce(&self) {}

    /// Number of blocks on top of (and including) the one that mined `tx`.
    ///
    /// Returns 0 while the transaction is pending or unknown, and
    /// `Err(Rejected)` if it was mined but reverted.
    async fn get_confirmations(&self, tx: TxRef) -> Result<u64, ChainError>;

    /// ERC-20 balance of `account`
    async fn get_balance(&self, account: Address, token: Address) -> Result<U256, ChainError>;

    /// Current head block number
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Logs matching `query` from `query.from_block` to the head
    async fn find_logs(&self, query: &LogQuery) -> Result<Vec<ObservedLog>, ChainError>;
}
