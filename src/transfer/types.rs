//! Core types for bridge transfers
//!
//! This module defines the fundamental types used across the transfer system.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::transfer::state::TransferState;

/// Request ID - a random UUID (v4) assigned when the request is created
///
/// Used as the storage key for the append-only transfer log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid RequestId: {}", e))
    }
}

/// EVM chain id (1 = Ethereum, 11155111 = Sepolia, 42161 = Arbitrum One, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of one token transfer across a bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Unique identifier, also the persistence key
    pub id: RequestId,
    /// Chain the tokens leave from
    pub source_chain: ChainId,
    /// Chain the tokens arrive on
    pub dest_chain: ChainId,
    /// Token contract on the source chain
    pub token: Address,
    /// Amount in the token's smallest unit (WSTON has 27 decimals)
    pub amount: U256,
    /// Receiver on the destination chain
    pub recipient: Address,
}

impl TransferRequest {
    pub fn new(
        source_chain: ChainId,
        dest_chain: ChainId,
        token: Address,
        amount: U256,
        recipient: Address,
    ) -> Self {
        Self {
            id: RequestId::new(),
            source_chain,
            dest_chain,
            token,
            amount,
            recipient,
        }
    }
}

/// Final outcome of `BridgeCoordinator::execute`
///
/// Both variants carry the full state so every transaction reference that
/// was ever recorded stays visible to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferResult {
    Completed(TransferState),
    Failed(TransferState),
}

impl TransferResult {
    pub fn state(&self) -> &TransferState {
        match self {
            TransferResult::Completed(s) | TransferResult::Failed(s) => s,
        }
    }

    pub fn into_state(self) -> TransferState {
        match self {
            TransferResult::Completed(s) | TransferResult::Failed(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TransferResult::Completed(_))
    }
}
