//! Bridge Coordinator
//!
//! Drives one transfer through the stage machine:
//!
//! ```text
//! Created -> Approving -> ApprovalConfirmed -> Depositing
//!         -> DepositConfirmedSource -> AwaitingDestination -> Completed
//! ```
//!
//! Every signed transaction is recorded in the TransferDb before it is
//! broadcast (record-before-act). A resumed transfer rebroadcasts the recorded
//! bytes and never signs a second transaction for the same stage.
//!
//! New transactions from one account are signed and broadcast one at a time
//! under a per-account signing lock, so a nonce the node rejects is reused by
//! the next transaction instead of leaving it stuck behind a gap.

use ethers::types::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};

use crate::chain::{retry_transient, ChainClient, ChainError, PendingTx, RetryPolicy, TxRef, TxRequest};
use crate::transfer::adapters::{BridgeAdapter, Observation};
use crate::transfer::db::TransferDb;
use crate::transfer::errors::{ErrorKind, TransferError};
use crate::transfer::state::{Stage, TransferEvent, TransferState};
use crate::transfer::types::{ChainId, RequestId, TransferRequest, TransferResult};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// One tick: delay between two polls of any wait
    pub poll_interval_ms: u64,
    /// Max wait for an approval or deposit to reach the confirmation depth
    pub confirmation_timeout_ms: u64,
    /// Max wait for the destination arrival; `None` waits forever
    pub destination_timeout_ms: Option<u64>,
    /// Confirmation depth for chains without an explicit entry
    pub default_confirmations: u64,
    pub confirmations: HashMap<ChainId, u64>,
    /// Backoff for transient network errors
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 15_000,
            confirmation_timeout_ms: 30 * 60 * 1000,
            destination_timeout_ms: None,
            default_confirmations: 1,
            confirmations: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Required confirmations on `chain` (at least 1: the tx must be mined)
    pub fn confirmation_depth(&self, chain: ChainId) -> u64 {
        self.confirmations
            .get(&chain)
            .copied()
            .unwrap_or(self.default_confirmations)
            .max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn destination_timeout(&self) -> Option<Duration> {
        self.destination_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug)]
struct Control {
    stage: Stage,
    cancel_requested: bool,
}

/// Caller-side handle to a running transfer
///
/// The stage seen here and the cancel flag live under one lock, and the
/// coordinator checks the flag under that lock before every submission. An
/// accepted cancel is therefore always honoured, and a cancel arriving once a
/// transaction is in flight is always rejected.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    request_id: RequestId,
    control: Arc<Mutex<Control>>,
}

impl TransferHandle {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            control: Arc::new(Mutex::new(Control {
                stage: Stage::Created,
                cancel_requested: false,
            })),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Stage last reached by the coordinator
    pub fn stage(&self) -> Stage {
        self.lock().stage
    }

    /// Request cancellation.
    ///
    /// Accepted only in `Created` or `ApprovalConfirmed`; the transfer then
    /// ends `Failed{kind=Cancelled}` before its next submission.
    pub fn cancel(&self) -> Result<(), TransferError> {
        let mut control = self.lock();
        if !control.stage.is_cancellable() {
            return Err(TransferError::CancellationRejected { stage: control.stage });
        }
        control.cancel_requested = true;
        log::info!("[{}] cancellation accepted in stage {}", self.request_id, control.stage);
        Ok(())
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    fn set_stage(&self, stage: Stage) {
        self.lock().stage = stage;
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        // Control has no invariant a panicking holder could break
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The two source-chain submissions of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Approval,
    Deposit,
}

impl Leg {
    fn event(self) -> TransferEvent {
        match self {
            Leg::Approval => TransferEvent::StartApproval,
            Leg::Deposit => TransferEvent::StartDeposit,
        }
    }

    fn error(self, err: ChainError) -> TransferError {
        match self {
            Leg::Approval => TransferError::approval(err),
            Leg::Deposit => TransferError::deposit(err),
        }
    }

    fn record(self, state: &mut TransferState, tx: PendingTx) -> Result<(), TransferError> {
        match self {
            Leg::Approval => state.record_approval(tx),
            Leg::Deposit => state.record_deposit(tx),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Leg::Approval => "approval",
            Leg::Deposit => "deposit",
        }
    }
}

/// Bridge Coordinator - drives transfers through the stage machine
pub struct BridgeCoordinator {
    db: Arc<TransferDb>,
    config: CoordinatorConfig,
    /// Signing lock per (chain, account)
    signers: Mutex<HashMap<(ChainId, Address), Arc<AsyncMutex<()>>>>,
}

impl BridgeCoordinator {
    pub fn new(db: Arc<TransferDb>, config: CoordinatorConfig) -> Self {
        Self {
            db,
            config,
            signers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<TransferDb> {
        &self.db
    }

    /// Run a new transfer to completion or failure
    pub async fn execute(
        &self,
        request: TransferRequest,
        adapter: &dyn BridgeAdapter,
        source: &dyn ChainClient,
        dest: &dyn ChainClient,
    ) -> TransferResult {
        let handle = TransferHandle::new(request.id);
        self.execute_with_handle(request, adapter, source, dest, &handle).await
    }

    /// Same as `execute`, observable and cancellable through `handle`
    pub async fn execute_with_handle(
        &self,
        request: TransferRequest,
        adapter: &dyn BridgeAdapter,
        source: &dyn ChainClient,
        dest: &dyn ChainClient,
        handle: &TransferHandle,
    ) -> TransferResult {
        let mut state = TransferState::new(request.id);

        // Invalid requests never touch a chain and are not persisted
        if let Err(err) = validate(&request, source, dest) {
            log::warn!("[{}] rejected: {}", request.id, err);
            state.fail(err.kind(), err.to_string());
            handle.set_stage(state.stage);
            return TransferResult::Failed(state);
        }

        if let Err(err) = self.db.create(&request, &state) {
            let err = TransferError::from(err);
            log::error!("[{}] {}", request.id, err);
            state.fail(err.kind(), err.to_string());
            handle.set_stage(state.stage);
            return TransferResult::Failed(state);
        }

        log::info!(
            "[{}] created via {}: chain {} -> chain {}, amount={}, recipient={:?}",
            request.id,
            adapter.name(),
            request.source_chain,
            request.dest_chain,
            request.amount,
            request.recipient
        );

        self.drive(&request, state, adapter, source, dest, handle).await
    }

    /// Continue a persisted transfer from its latest recorded stage
    ///
    /// Recorded transactions are rebroadcast as-is; nothing already signed
    /// is signed again.
    pub async fn resume(
        &self,
        request_id: RequestId,
        adapter: &dyn BridgeAdapter,
        source: &dyn ChainClient,
        dest: &dyn ChainClient,
        handle: &TransferHandle,
    ) -> Result<TransferResult, TransferError> {
        let request = self
            .db
            .request(request_id)?
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;
        let state = self
            .db
            .latest(request_id)?
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;

        validate(&request, source, dest)?;
        handle.set_stage(state.stage);

        if state.stage.is_terminal() {
            return Ok(finish(state));
        }

        log::info!("[{}] resuming at stage {}", request_id, state.stage);
        Ok(self.drive(&request, state, adapter, source, dest, handle).await)
    }

    /// Look for the destination arrival of a transfer the coordinator
    /// stopped waiting for.
    ///
    /// A transfer that failed with `DestinationTimeout` keeps its `Failed`
    /// stage and gains the destination reference; an `AwaitingDestination`
    /// transfer completes.
    pub async fn check_destination(
        &self,
        request_id: RequestId,
        adapter: &dyn BridgeAdapter,
        dest: &dyn ChainClient,
    ) -> Result<TransferState, TransferError> {
        let request = self
            .db
            .request(request_id)?
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;
        let mut state = self
            .db
            .latest(request_id)?
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;

        if state.has_arrived() {
            return Ok(state);
        }

        let deposit_tx = state.deposit_ref().ok_or_else(|| TransferError::InvalidStateTransition {
            from: state.stage,
            event: "check_destination without deposit".to_string(),
        })?;
        let observation = Observation::new(deposit_tx, state.observe_from_block.unwrap_or(0));

        if let Some(tx) = self.observe_arrival(&request, observation, adapter, dest).await? {
            state.record_destination(tx)?;
            if state.stage == Stage::AwaitingDestination {
                state.apply(TransferEvent::DestinationObserved)?;
            }
            self.db.append(&state)?;
            log::info!("[{}] destination arrival found: {}", request_id, tx);
        } else {
            log::info!("[{}] destination arrival still not observed", request_id);
        }

        Ok(state)
    }

    /// Cancel a transfer driven with `handle` and persist the cancellation.
    ///
    /// Accepted in the same stages as `TransferHandle::cancel`. Once this
    /// returns Ok the transfer is recorded as `Failed{kind=Cancelled}`, so a
    /// process that exits before the task notices still never resumes it.
    pub fn cancel(&self, handle: &TransferHandle) -> Result<(), TransferError> {
        // Held while persisting: the task cannot enter a submission meanwhile
        let mut control = handle.lock();
        if !control.stage.is_cancellable() {
            return Err(TransferError::CancellationRejected { stage: control.stage });
        }
        control.cancel_requested = true;
        log::info!("[{}] cancellation accepted in stage {}", handle.request_id, control.stage);

        if let Some(mut state) = self.db.latest(handle.request_id)? {
            if state.stage.is_cancellable() {
                let err = TransferError::Cancelled { stage: state.stage };
                state.fail(err.kind(), err.to_string());
                self.db.append(&state)?;
            }
        }
        Ok(())
    }

    /// Latest persisted state
    pub fn status(&self, request_id: RequestId) -> Result<Option<TransferState>, TransferError> {
        Ok(self.db.latest(request_id)?)
    }

    async fn drive(
        &self,
        request: &TransferRequest,
        mut state: TransferState,
        adapter: &dyn BridgeAdapter,
        source: &dyn ChainClient,
        dest: &dyn ChainClient,
        handle: &TransferHandle,
    ) -> TransferResult {
        handle.set_stage(state.stage);

        if let Err(err) = self.run_stages(request, &mut state, adapter, source, dest, handle).await {
            match err.kind() {
                ErrorKind::DestinationTimeout | ErrorKind::Cancelled => {
                    log::warn!("[{}] {}", request.id, err)
                }
                _ => log::error!("[{}] failed in stage {}: {}", request.id, state.stage, err),
            }

            state.fail(err.kind(), err.to_string());
            if let Err(e) = self.db.append(&state) {
                log::error!("[{}] could not persist failure: {:#}", request.id, e);
            }
            handle.set_stage(state.stage);
        }

        finish(state)
    }

    async fn run_stages(
        &self,
        request: &TransferRequest,
        state: &mut TransferState,
        adapter: &dyn BridgeAdapter,
        source: &dyn ChainClient,
        dest: &dyn ChainClient,
        handle: &TransferHandle,
    ) -> Result<(), TransferError> {
        // Broadcast by this run already; anything else recorded is rebroadcast
        let mut submitted: Option<TxRef> = None;

        loop {
            match state.stage {
                Stage::Created => {
                    check_cancelled(handle, state.stage)?;
                    self.check_balance(request, source).await?;

                    let tx = retry_transient(&self.config.retry, "approve", move || adapter.approve(request))
                        .await
                        .map_err(TransferError::approval)?;

                    submitted = Some(self.submit_new(state, handle, source, &tx, Leg::Approval).await?);
                }

                Stage::Approving => {
                    let pending = recorded(&state.approval_tx, state.stage)?;
                    if submitted != Some(pending.hash) {
                        self.broadcast(source, &pending).await.map_err(TransferError::approval)?;
                    }
                    self.wait_for_confirmations(source, pending.hash, TransferError::approval).await?;
                    self.advance(state, handle, TransferEvent::ApprovalMined)?;
                }

                Stage::ApprovalConfirmed => {
                    check_cancelled(handle, state.stage)?;

                    let tx = retry_transient(&self.config.retry, "deposit", move || adapter.deposit(request))
                        .await
                        .map_err(TransferError::deposit)?;

                    // The mint can land as soon as the deposit is out, so the
                    // search starts from the head seen before broadcasting
                    if state.observe_from_block.is_none() {
                        state.observe_from_block = Some(self.destination_head(dest).await?);
                    }

                    submitted = Some(self.submit_new(state, handle, source, &tx, Leg::Deposit).await?);
                }

                Stage::Depositing => {
                    let pending = recorded(&state.deposit_tx, state.stage)?;
                    if submitted != Some(pending.hash) {
                        self.broadcast(source, &pending).await.map_err(TransferError::deposit)?;
                    }
                    self.wait_for_confirmations(source, pending.hash, TransferError::deposit).await?;

                    if state.observe_from_block.is_none() {
                        // Recorded before start blocks were kept; search the whole chain
                        log::warn!("[{}] no destination start block recorded, searching from genesis", request.id);
                        state.observe_from_block = Some(0);
                    }
                    self.advance(state, handle, TransferEvent::DepositMined)?;
                }

                Stage::DepositConfirmedSource => {
                    self.advance(state, handle, TransferEvent::AwaitDestination)?;
                }

                Stage::AwaitingDestination => {
                    let tx = self.wait_for_destination(request, state, adapter, dest).await?;
                    state.record_destination(tx)?;
                    self.advance(state, handle, TransferEvent::DestinationObserved)?;
                    log::info!("[{}] ✅ completed, destination tx {}", request.id, tx);
                }

                Stage::Completed | Stage::Failed => return Ok(()),
            }
        }
    }

    async fn check_balance(
        &self,
        request: &TransferRequest,
        source: &dyn ChainClient,
    ) -> Result<(), TransferError> {
        let owner = source.sender();
        let token = request.token;
        let balance = retry_transient(&self.config.retry, "get_balance", move || {
            source.get_balance(owner, token)
        })
        .await
        .map_err(TransferError::approval)?;

        if balance < request.amount {
            return Err(TransferError::Approval(format!(
                "insufficient balance: {:?} holds {} of token {:?}, needs {}",
                owner, balance, token, request.amount
            )));
        }
        Ok(())
    }

    async fn sign(
        &self,
        source: &dyn ChainClient,
        tx: &TxRequest,
    ) -> Result<PendingTx, ChainError> {
        retry_transient(&self.config.retry, "prepare", move || source.prepare(tx)).await
    }

    /// Sign, record and broadcast a new transaction for `leg`.
    ///
    /// The sender's signing lock is held until the node has accepted the
    /// broadcast. If the transaction never reaches the node the client's
    /// nonce is rewound before the lock is released.
    async fn submit_new(
        &self,
        state: &mut TransferState,
        handle: &TransferHandle,
        source: &dyn ChainClient,
        tx: &TxRequest,
        leg: Leg,
    ) -> Result<TxRef, TransferError> {
        let signer = self.signer(source);
        let _signing = signer.lock().await;

        enter_submission(state, handle, leg.event())?;
        let pending = self.sign(source, tx).await.map_err(|e| leg.error(e))?;
        let hash = pending.hash;

        if let Err(err) = leg.record(state, pending.clone()).and_then(|()| self.persist(state)) {
            source.reset_nonce().await;
            return Err(err);
        }
        log::info!("[{}] {} signed and recorded: {}", state.request_id, leg.name(), hash);

        if let Err(err) = self.broadcast(source, &pending).await {
            source.reset_nonce().await;
            return Err(leg.error(err));
        }
        Ok(hash)
    }

    /// Sign and broadcast a transaction that is not part of a transfer
    pub(super) async fn send_now(&self, source: &dyn ChainClient, tx: &TxRequest) -> Result<TxRef, ChainError> {
        let signer = self.signer(source);
        let _signing = signer.lock().await;

        let pending = self.sign(source, tx).await?;
        if let Err(err) = self.broadcast(source, &pending).await {
            source.reset_nonce().await;
            return Err(err);
        }
        Ok(pending.hash)
    }

    fn signer(&self, client: &dyn ChainClient) -> Arc<AsyncMutex<()>> {
        let mut signers = self.signers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        signers.entry((client.chain_id(), client.sender())).or_default().clone()
    }

    async fn destination_head(&self, dest: &dyn ChainClient) -> Result<u64, TransferError> {
        retry_transient(&self.config.retry, "block_number", move || dest.block_number())
            .await
            .map_err(|e| TransferError::Network(e.to_string()))
    }

    /// Broadcast recorded bytes.
    ///
    /// A rejected broadcast of a transaction the chain already mined (e.g.
    /// "nonce too low" after a restart) is not a failure.
    async fn broadcast(&self, source: &dyn ChainClient, pending: &PendingTx) -> Result<(), ChainError> {
        let result = retry_transient(&self.config.retry, "submit", move || source.submit(pending)).await;

        match result {
            Ok(_) => Ok(()),
            Err(ChainError::Rejected(reason)) => {
                let hash = pending.hash;
                let mined = retry_transient(&self.config.retry, "get_confirmations", move || {
                    source.get_confirmations(hash)
                })
                .await;

                match mined {
                    Ok(n) if n > 0 => {
                        log::warn!("broadcast of {} rejected ({}) but it is already mined", hash, reason);
                        Ok(())
                    }
                    Ok(_) => Err(ChainError::Rejected(reason)),
                    // Unknown whether it was mined: not a verdict on the transaction
                    Err(ChainError::Network(e)) => {
                        log::warn!("broadcast of {} rejected ({}) and its status is unknown: {}", hash, reason, e);
                        Err(ChainError::Network(format!("status of {} unknown after rejection: {}", hash, e)))
                    }
                    Err(reverted) => Err(reverted),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until `tx` reaches the confirmation depth of `source`.
    ///
    /// Sleeps one tick before each check. Never resubmits.
    pub(super) async fn wait_for_confirmations(
        &self,
        source: &dyn ChainClient,
        tx: TxRef,
        on_reject: fn(ChainError) -> TransferError,
    ) -> Result<(), TransferError> {
        let depth = self.config.confirmation_depth(source.chain_id());
        let timeout = self.config.confirmation_timeout();
        let started = Instant::now();

        loop {
            sleep(self.config.poll_interval()).await;

            let confirmations = retry_transient(&self.config.retry, "get_confirmations", move || {
                source.get_confirmations(tx)
            })
            .await
            .map_err(on_reject)?;

            if confirmations >= depth {
                log::info!("{} confirmed ({}/{}) on chain {}", tx, confirmations, depth, source.chain_id());
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(TransferError::ConfirmationTimeout {
                    tx,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            log::debug!("{} has {}/{} confirmations", tx, confirmations, depth);
        }
    }

    async fn wait_for_destination(
        &self,
        request: &TransferRequest,
        state: &TransferState,
        adapter: &dyn BridgeAdapter,
        dest: &dyn ChainClient,
    ) -> Result<TxRef, TransferError> {
        let deposit_tx = recorded(&state.deposit_tx, state.stage)?.hash;
        let observation = Observation::new(deposit_tx, state.observe_from_block.unwrap_or(0));
        let limit = self.config.destination_timeout();
        let started = Instant::now();

        loop {
            sleep(self.config.poll_interval()).await;

            match self.observe_arrival(request, observation.clone(), adapter, dest).await {
                Ok(Some(tx)) => return Ok(tx),
                Ok(None) => {}
                // The deposit is irrevocable; an RPC outage only delays observation
                Err(TransferError::Network(e)) => log::warn!("[{}] destination check failed: {}", request.id, e),
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            if let Some(limit) = limit {
                if waited >= limit {
                    return Err(TransferError::DestinationTimeout {
                        deposit_tx,
                        waited_ms: waited.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// One look for the arrival of `request`.
    ///
    /// Destination transactions credited to other transfers are skipped, and
    /// a match only counts once it is claimed for this transfer.
    async fn observe_arrival(
        &self,
        request: &TransferRequest,
        observation: Observation,
        adapter: &dyn BridgeAdapter,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, TransferError> {
        let claimed = self.db.claimed_destinations(request.dest_chain, request.id)?;
        let observation = observation.with_claimed(claimed);
        let observation = &observation;

        let found = retry_transient(&self.config.retry, "observe_destination", move || {
            adapter.observe_destination(request, observation, dest)
        })
        .await
        .map_err(|e| TransferError::Network(e.to_string()))?;

        match found {
            Some(tx) if self.db.claim_destination(request.dest_chain, tx, request.id)? => Ok(Some(tx)),
            Some(tx) => {
                log::info!("[{}] destination tx {} went to another transfer", request.id, tx);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn advance(
        &self,
        state: &mut TransferState,
        handle: &TransferHandle,
        event: TransferEvent,
    ) -> Result<(), TransferError> {
        let next = state.apply(event)?;
        self.persist(state)?;
        handle.set_stage(next);
        log::info!("[{}] -> {}", state.request_id, next);
        Ok(())
    }

    fn persist(&self, state: &TransferState) -> Result<(), TransferError> {
        Ok(self.db.append(state)?)
    }
}

fn finish(state: TransferState) -> TransferResult {
    if state.stage == Stage::Completed {
        TransferResult::Completed(state)
    } else {
        TransferResult::Failed(state)
    }
}

fn validate(
    request: &TransferRequest,
    source: &dyn ChainClient,
    dest: &dyn ChainClient,
) -> Result<(), TransferError> {
    if request.amount.is_zero() {
        return Err(TransferError::InvalidRequest("amount must be greater than 0".to_string()));
    }
    if request.source_chain == request.dest_chain {
        return Err(TransferError::InvalidRequest(format!(
            "source and destination are both chain {}",
            request.source_chain
        )));
    }
    if source.chain_id() != request.source_chain {
        return Err(TransferError::InvalidRequest(format!(
            "unknown source chain {} (client is on chain {})",
            request.source_chain,
            source.chain_id()
        )));
    }
    if dest.chain_id() != request.dest_chain {
        return Err(TransferError::InvalidRequest(format!(
            "unknown destination chain {} (client is on chain {})",
            request.dest_chain,
            dest.chain_id()
        )));
    }
    if request.token == Address::zero() {
        return Err(TransferError::InvalidRequest("token address is zero".to_string()));
    }
    if request.recipient == Address::zero() {
        return Err(TransferError::InvalidRequest("recipient address is zero".to_string()));
    }
    Ok(())
}

fn check_cancelled(handle: &TransferHandle, stage: Stage) -> Result<(), TransferError> {
    if handle.is_cancel_requested() {
        return Err(TransferError::Cancelled { stage });
    }
    Ok(())
}

/// Leave a cancellable stage for a submitting one, unless a cancel got in first
fn enter_submission(
    state: &mut TransferState,
    handle: &TransferHandle,
    event: TransferEvent,
) -> Result<(), TransferError> {
    let mut control = handle.lock();
    if control.cancel_requested {
        return Err(TransferError::Cancelled { stage: state.stage });
    }
    control.stage = state.apply(event)?;
    Ok(())
}

fn recorded(slot: &Option<PendingTx>, stage: Stage) -> Result<PendingTx, TransferError> {
    slot.clone().ok_or_else(|| TransferError::InvalidStateTransition {
        from: stage,
        event: "no recorded transaction".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::transfer::adapters::MockBridgeAdapter;
    use ethers::types::U256;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval_ms: 1_000,
            confirmation_timeout_ms: 5_000,
            destination_timeout_ms: Some(10_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_confirmation_depth() {
        let mut cfg = config();
        cfg.default_confirmations = 2;
        cfg.confirmations.insert(ChainId(1), 12);
        cfg.confirmations.insert(ChainId(5), 0);

        assert_eq!(cfg.confirmation_depth(ChainId(1)), 12);
        assert_eq!(cfg.confirmation_depth(ChainId(10)), 2);
        // A transaction is never confirmed before it is mined
        assert_eq!(cfg.confirmation_depth(ChainId(5)), 1);
    }

    #[test]
    fn test_handle_cancel_window() {
        let handle = TransferHandle::new(RequestId::new());
        assert!(handle.cancel().is_ok());

        handle.set_stage(Stage::Depositing);
        assert_eq!(
            handle.cancel(),
            Err(TransferError::CancellationRejected { stage: Stage::Depositing })
        );
    }

    #[test]
    fn test_enter_submission_honours_cancel() {
        let handle = TransferHandle::new(RequestId::new());
        let mut state = TransferState::new(handle.request_id());
        handle.cancel().unwrap();

        let err = enter_submission(&mut state, &handle, TransferEvent::StartApproval).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(state.stage, Stage::Created);
    }

    #[tokio::test]
    async fn test_validation() {
        let db = Arc::new(TransferDb::temporary().unwrap());
        let coordinator = BridgeCoordinator::new(db.clone(), config());
        let adapter = MockBridgeAdapter::new("mock");
        let source = MockChainClient::new(ChainId(1));
        let dest = MockChainClient::new(ChainId(10));

        let token = Address::from_low_u64_be(0xaa);
        let recipient = Address::from_low_u64_be(0xbb);
        let cases = vec![
            TransferRequest::new(ChainId(1), ChainId(10), token, U256::zero(), recipient),
            TransferRequest::new(ChainId(1), ChainId(1), token, U256::one(), recipient),
            TransferRequest::new(ChainId(99), ChainId(10), token, U256::one(), recipient),
            TransferRequest::new(ChainId(1), ChainId(10), Address::zero(), U256::one(), recipient),
            TransferRequest::new(ChainId(1), ChainId(10), token, U256::one(), Address::zero()),
        ];

        for request in cases {
            let id = request.id;
            let result = coordinator.execute(request, &adapter, &source, &dest).await;
            let state = result.state();
            assert_eq!(state.failure_kind(), Some(ErrorKind::InvalidRequest));
            assert_eq!(state.stage_reached(), Stage::Created);
            assert!(db.latest(id).unwrap().is_none());
        }

        assert!(source.prepared().is_empty());
    }
}
