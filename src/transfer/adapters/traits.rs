//! Bridge adapter trait
//!
//! Defines the interface for interacting with one destination ecosystem's bridge.

use async_trait::async_trait;
use ethers::types::Address;

use crate::chain::erc20::approve_call;
use crate::chain::{ChainClient, ChainError, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

/// Where to look for the destination-side arrival of a deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Confirmed deposit on the source chain
    pub deposit_tx: TxRef,
    /// Destination head block captured before the deposit was broadcast
    pub from_block: u64,
    /// Destination transactions already credited to other transfers
    pub claimed: Vec<TxRef>,
}

impl Observation {
    pub fn new(deposit_tx: TxRef, from_block: u64) -> Self {
        Self {
            deposit_tx,
            from_block,
            claimed: Vec::new(),
        }
    }

    pub fn with_claimed(mut self, claimed: Vec<TxRef>) -> Self {
        self.claimed = claimed;
        self
    }

    pub fn is_claimed(&self, tx: TxRef) -> bool {
        self.claimed.contains(&tx)
    }
}

/// Bridge adapter trait - implemented once per destination ecosystem
///
/// Adapters only BUILD transactions; the coordinator signs, records and
/// broadcasts them. That keeps record-before-act in one place.
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &str;

    /// Contract that must be approved to pull the token on the source chain
    fn bridge_address(&self) -> Address;

    /// Authorize the bridge to move `request.amount` of the token
    ///
    /// Returns:
    /// - Ok: the unsigned approval call
    /// - Err(Rejected): the request cannot be bridged by this adapter
    async fn approve(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        Ok(approve_call(request.token, self.bridge_address(), request.amount))
    }

    /// Build the deposit/lock call for the approved amount
    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError>;

    /// Look for the mint/release matching this request on the destination chain
    ///
    /// Must be idempotent and side-effect free: it may be called again long
    /// after the coordinator gave up waiting. Transactions listed in
    /// `observation.claimed` belong to other transfers and must be skipped.
    ///
    /// Returns:
    /// - Ok(Some(tx)): arrival observed in destination transaction `tx`
    /// - Ok(None): not (yet) observed
    /// - Err(Network): transient, retry
    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError>;
}
