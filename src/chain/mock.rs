//! Mock chain client for testing
//!
//! Confirmations are counted in polls: a transaction scheduled to confirm
//! after `n` polls reports 0 confirmations on polls `1..n` and one more
//! confirmation on every poll from the `n`th on.
//!
//! Nonces behave like a node's: a rejected broadcast rewinds the local nonce
//! to the first one the chain has not accepted. With strict nonces a
//! transaction above a gap never confirms.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::{ChainClient, ChainError, LogQuery, ObservedLog, PendingTx, TxRef, TxRequest};
use crate::transfer::types::ChainId;

#[derive(Default)]
struct MockChainState {
    balances: HashMap<(Address, Address), U256>,
    /// Confirmation schedule handed out to submissions in order
    schedule: VecDeque<Option<u32>>,
    /// Schedule used once `schedule` is drained; `None` = never confirms
    default_confirm_after: Option<u32>,
    confirm_after: HashMap<TxRef, Option<u32>>,
    polls: HashMap<TxRef, u32>,
    reverted: HashMap<TxRef, String>,
    prepared: Vec<TxRequest>,
    broadcasts: Vec<TxRef>,
    nonce: u64,
    tx_nonces: HashMap<TxRef, u64>,
    accepted_nonces: BTreeSet<u64>,
    strict_nonces: bool,
    submit_latency: Option<Duration>,
    reject_next_submit: Option<String>,
    network_failures: u32,
    confirmation_failures: u32,
    logs: Vec<(Address, ObservedLog)>,
    block: u64,
}

impl MockChainState {
    /// First nonce the chain has not accepted
    fn pending_nonce(&self) -> u64 {
        let mut next = 0;
        while self.accepted_nonces.contains(&next) {
            next += 1;
        }
        next
    }
}

/// Mock chain client
pub struct MockChainClient {
    chain_id: ChainId,
    sender: Address,
    state: Mutex<MockChainState>,
}

impl MockChainClient {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            sender: Address::from_low_u64_be(0x5c5c),
            state: Mutex::new(MockChainState {
                default_confirm_after: Some(1),
                ..Default::default()
            }),
        }
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    /// Transactions above a nonce gap stay pending forever
    pub fn strict_nonces(&self) {
        self.state.lock().unwrap().strict_nonces = true;
    }

    /// Every `submit` takes `latency` before the node answers
    pub fn set_submit_latency(&self, latency: Duration) {
        self.state.lock().unwrap().submit_latency = Some(latency);
    }

    pub fn set_balance(&self, account: Address, token: Address, amount: U256) {
        self.state.lock().unwrap().balances.insert((account, token), amount);
    }

    /// Every submission confirms after `polls` polls
    pub fn confirm_after(&self, polls: u32) {
        self.state.lock().unwrap().default_confirm_after = Some(polls);
    }

    /// No submission ever confirms
    pub fn never_confirm(&self) {
        self.state.lock().unwrap().default_confirm_after = None;
    }

    /// Per-submission schedule, consumed in submission order
    pub fn set_confirmation_schedule(&self, schedule: Vec<Option<u32>>) {
        self.state.lock().unwrap().schedule = schedule.into();
    }

    /// Mark a transaction as mined-but-reverted
    pub fn revert_tx(&self, tx: TxRef, reason: &str) {
        self.state.lock().unwrap().reverted.insert(tx, reason.to_string());
    }

    /// Next `submit` is refused by the "node"
    pub fn reject_next_submit(&self, reason: &str) {
        self.state.lock().unwrap().reject_next_submit = Some(reason.to_string());
    }

    /// Next `n` calls of any kind fail with a transient network error
    pub fn fail_next_calls(&self, n: u32) {
        self.state.lock().unwrap().network_failures = n;
    }

    /// Next `n` confirmation lookups fail with a transient network error
    pub fn fail_next_confirmation_checks(&self, n: u32) {
        self.state.lock().unwrap().confirmation_failures = n;
    }

    pub fn set_block_number(&self, block: u64) {
        self.state.lock().unwrap().block = block;
    }

    /// Make a log visible to `find_logs`
    pub fn push_log(&self, emitter: Address, log: ObservedLog) {
        self.state.lock().unwrap().logs.push((emitter, log));
    }

    /// Calls prepared (signed) so far
    pub fn prepared(&self) -> Vec<TxRequest> {
        self.state.lock().unwrap().prepared.clone()
    }

    /// Every broadcast, including rebroadcasts of the same hash
    pub fn broadcasts(&self) -> Vec<TxRef> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn poll_count(&self, tx: TxRef) -> u32 {
        self.state.lock().unwrap().polls.get(&tx).copied().unwrap_or(0)
    }

    /// Nonce of a prepared transaction
    pub fn nonce_of(&self, tx: TxRef) -> Option<u64> {
        self.state.lock().unwrap().tx_nonces.get(&tx).copied()
    }

    fn take_network_failure(&self) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.network_failures > 0 {
            state.network_failures -= 1;
            return Err(ChainError::Network("mock connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn prepare(&self, tx: &TxRequest) -> Result<PendingTx, ChainError> {
        self.take_network_failure()?;
        let mut state = self.state.lock().unwrap();

        let mut raw = Vec::with_capacity(tx.data.len() + 60);
        raw.extend_from_slice(&self.chain_id.as_u64().to_be_bytes());
        raw.extend_from_slice(&state.nonce.to_be_bytes());
        raw.extend_from_slice(tx.to.as_bytes());
        raw.extend_from_slice(&tx.data);
        let hash = TxRef(H256::from(keccak256(&raw)));
        let nonce = state.nonce;
        state.tx_nonces.insert(hash, nonce);
        state.nonce += 1;
        state.prepared.push(tx.clone());

        Ok(PendingTx {
            hash,
            raw: Bytes::from(raw),
        })
    }

    async fn submit(&self, tx: &PendingTx) -> Result<TxRef, ChainError> {
        self.take_network_failure()?;
        let latency = self.state.lock().unwrap().submit_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();

        if let Some(reason) = state.reject_next_submit.take() {
            state.nonce = state.pending_nonce();
            return Err(ChainError::Rejected(reason));
        }

        if let Some(nonce) = state.tx_nonces.get(&tx.hash).copied() {
            state.accepted_nonces.insert(nonce);
        }
        state.broadcasts.push(tx.hash);
        if !state.confirm_after.contains_key(&tx.hash) {
            let schedule = match state.schedule.pop_front() {
                Some(s) => s,
                None => state.default_confirm_after,
            };
            state.confirm_after.insert(tx.hash, schedule);
        }
        Ok(tx.hash)
    }

    async fn get_confirmations(&self, tx: TxRef) -> Result<u64, ChainError> {
        self.take_network_failure()?;
        let mut state = self.state.lock().unwrap();

        if state.confirmation_failures > 0 {
            state.confirmation_failures -= 1;
            return Err(ChainError::Network("receipt lookup timed out".to_string()));
        }
        if let Some(reason) = state.reverted.get(&tx) {
            return Err(ChainError::Rejected(reason.clone()));
        }

        let polls = {
            let p = state.polls.entry(tx).or_insert(0);
            *p += 1;
            *p
        };

        if state.strict_nonces {
            let stuck = state.tx_nonces.get(&tx).is_some_and(|n| *n >= state.pending_nonce());
            if stuck {
                return Ok(0);
            }
        }

        match state.confirm_after.get(&tx) {
            Some(Some(after)) => Ok((polls + 1).saturating_sub(*after) as u64),
            _ => Ok(0),
        }
    }

    async fn reset_nonce(&self) {
        let mut state = self.state.lock().unwrap();
        state.nonce = state.pending_nonce();
    }

    async fn get_balance(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        self.take_network_failure()?;
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(&(account, token)).copied().unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.take_network_failure()?;
        Ok(self.state.lock().unwrap().block)
    }

    async fn find_logs(&self, query: &LogQuery) -> Result<Vec<ObservedLog>, ChainError> {
        self.take_network_failure()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|(emitter, log)| query.matches(*emitter, &log.topics, log.block_number))
            .map(|(_, log)| log.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> TxRequest {
        TxRequest::call(Address::from_low_u64_be(1), vec![1u8, 2, 3])
    }

    #[tokio::test]
    async fn test_confirmation_schedule() {
        let mock = MockChainClient::new(ChainId(1));
        mock.set_confirmation_schedule(vec![Some(2), None]);

        let first = mock.prepare(&call()).await.unwrap();
        let second = mock.prepare(&call()).await.unwrap();
        assert_ne!(first.hash, second.hash);

        mock.submit(&first).await.unwrap();
        mock.submit(&second).await.unwrap();

        assert_eq!(mock.get_confirmations(first.hash).await.unwrap(), 0);
        assert_eq!(mock.get_confirmations(first.hash).await.unwrap(), 1);
        assert_eq!(mock.get_confirmations(first.hash).await.unwrap(), 2);

        for _ in 0..10 {
            assert_eq!(mock.get_confirmations(second.hash).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_rebroadcast_keeps_schedule() {
        let mock = MockChainClient::new(ChainId(1));
        mock.set_confirmation_schedule(vec![Some(3)]);

        let tx = mock.prepare(&call()).await.unwrap();
        mock.submit(&tx).await.unwrap();
        mock.submit(&tx).await.unwrap();

        assert_eq!(mock.broadcasts(), vec![tx.hash, tx.hash]);
        assert_eq!(mock.get_confirmations(tx.hash).await.unwrap(), 0);
        assert_eq!(mock.get_confirmations(tx.hash).await.unwrap(), 0);
        assert_eq!(mock.get_confirmations(tx.hash).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failures_and_rejections() {
        let mock = MockChainClient::new(ChainId(1));
        mock.fail_next_calls(1);
        assert!(matches!(mock.block_number().await, Err(ChainError::Network(_))));
        assert!(mock.block_number().await.is_ok());

        let tx = mock.prepare(&call()).await.unwrap();
        mock.reject_next_submit("nonce too low");
        assert_eq!(
            mock.submit(&tx).await,
            Err(ChainError::Rejected("nonce too low".to_string()))
        );
        assert!(mock.broadcasts().is_empty());

        mock.fail_next_confirmation_checks(1);
        assert!(matches!(mock.get_confirmations(tx.hash).await, Err(ChainError::Network(_))));
        assert!(mock.block_number().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_rewinds_nonce() {
        let mock = MockChainClient::new(ChainId(1));
        mock.strict_nonces();

        let first = mock.prepare(&call()).await.unwrap();
        let second = mock.prepare(&TxRequest::call(Address::from_low_u64_be(2), vec![4u8])).await.unwrap();
        assert_eq!(mock.nonce_of(second.hash), Some(1));

        mock.reject_next_submit("replacement transaction underpriced");
        assert!(mock.submit(&first).await.is_err());

        // Nonce 0 was never accepted, so nonce 1 sits behind a gap
        mock.submit(&second).await.unwrap();
        for _ in 0..5 {
            assert_eq!(mock.get_confirmations(second.hash).await.unwrap(), 0);
        }

        let retry = mock.prepare(&call()).await.unwrap();
        assert_eq!(mock.nonce_of(retry.hash), Some(0));
        mock.submit(&retry).await.unwrap();
        assert_eq!(mock.get_confirmations(retry.hash).await.unwrap(), 1);
        assert!(mock.get_confirmations(second.hash).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_reset_nonce_reuses_unsent_nonce() {
        let mock = MockChainClient::new(ChainId(1));
        let dropped = mock.prepare(&call()).await.unwrap();
        mock.reset_nonce().await;

        let next = mock.prepare(&TxRequest::call(Address::from_low_u64_be(3), vec![5u8])).await.unwrap();
        assert_eq!(mock.nonce_of(dropped.hash), Some(0));
        assert_eq!(mock.nonce_of(next.hash), Some(0));
    }

    #[tokio::test]
    async fn test_balances_default_to_zero() {
        let mock = MockChainClient::new(ChainId(1));
        let token = Address::from_low_u64_be(9);
        assert_eq!(mock.get_balance(mock.sender(), token).await.unwrap(), U256::zero());

        mock.set_balance(mock.sender(), token, U256::from(500u64));
        assert_eq!(mock.get_balance(mock.sender(), token).await.unwrap(), U256::from(500u64));
    }
}
