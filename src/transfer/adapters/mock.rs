//! Mock bridge adapter for testing
//!
//! Arrival on the destination chain is counted in `observe_destination`
//! calls, so with a fixed poll interval it is counted in ticks. Each request
//! arrives in its own destination transaction.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use std::sync::Mutex;

use super::traits::{BridgeAdapter, Observation};
use crate::chain::{ChainClient, ChainError, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

/// Mock adapter for testing
pub struct MockBridgeAdapter {
    name: String,
    bridge: Address,
    /// Observe calls until arrival; `None` = never arrives
    arrive_after: Mutex<Option<u32>>,
    polls: Mutex<u32>,
    reject_approve: Mutex<Option<String>>,
    reject_deposit: Mutex<Option<String>>,
}

impl MockBridgeAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bridge: Address::from_low_u64_be(0xb1d6e),
            arrive_after: Mutex::new(Some(1)),
            polls: Mutex::new(0),
            reject_approve: Mutex::new(None),
            reject_deposit: Mutex::new(None),
        }
    }

    /// Arrival becomes visible on the `polls`th observation
    pub fn arrive_after(&self, polls: u32) {
        *self.arrive_after.lock().unwrap() = Some(polls);
    }

    pub fn never_arrive(&self) {
        *self.arrive_after.lock().unwrap() = None;
    }

    pub fn reject_approve(&self, reason: &str) {
        *self.reject_approve.lock().unwrap() = Some(reason.to_string());
    }

    pub fn reject_deposit(&self, reason: &str) {
        *self.reject_deposit.lock().unwrap() = Some(reason.to_string());
    }

    /// Number of `observe_destination` calls so far
    pub fn observe_polls(&self) -> u32 {
        *self.polls.lock().unwrap()
    }

    /// Destination transaction reported on arrival of `request`
    pub fn destination_ref(&self, request: &TransferRequest) -> TxRef {
        TxRef(H256::from(keccak256(request.id.as_uuid().as_bytes())))
    }
}

#[async_trait]
impl BridgeAdapter for MockBridgeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn bridge_address(&self) -> Address {
        self.bridge
    }

    async fn approve(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        log::debug!("[{}] approve({}, amount={})", self.name, request.id, request.amount);
        if let Some(reason) = self.reject_approve.lock().unwrap().clone() {
            return Err(ChainError::Rejected(reason));
        }
        Ok(crate::chain::erc20::approve_call(request.token, self.bridge, request.amount))
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        log::debug!("[{}] deposit({}, amount={})", self.name, request.id, request.amount);
        if let Some(reason) = self.reject_deposit.lock().unwrap().clone() {
            return Err(ChainError::Rejected(reason));
        }

        let mut data = b"deposit".to_vec();
        let mut word = [0u8; 32];
        request.amount.to_big_endian(&mut word);
        data.extend_from_slice(&word);
        Ok(TxRequest::call(self.bridge, data))
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        _dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        let polls = {
            let mut p = self.polls.lock().unwrap();
            *p += 1;
            *p
        };
        log::debug!(
            "[{}] observe_destination({}, deposit={}, poll={})",
            self.name,
            request.id,
            observation.deposit_tx,
            polls
        );

        let tx = self.destination_ref(request);
        match *self.arrive_after.lock().unwrap() {
            Some(after) if polls >= after && !observation.is_claimed(tx) => Ok(Some(tx)),
            _ => Ok(None),
        }
    }
}
