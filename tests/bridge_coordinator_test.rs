/// Integration tests for the bridge coordinator
///
/// Mock chains and a mock adapter under tokio's paused clock, so every
/// poll interval (tick) is observable as elapsed virtual time.
use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::contract::EthEvent;
use ethers::types::{Address, H256, U256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use wston_bridge::chain::{
    erc20, ChainClient, ChainError, MockChainClient, ObservedLog, PendingTx, RetryPolicy, TxRef, TxRequest,
};
use wston_bridge::transfer::adapters::op_stack::{DepositFinalizedFilter, L2_STANDARD_BRIDGE};
use wston_bridge::transfer::adapters::{MockBridgeAdapter, Observation, OpStackAdapter, OpStackConfig};
use wston_bridge::transfer::state::TransferEvent;
use wston_bridge::transfer::{
    BridgeAdapter, BridgeCoordinator, ChainId, CoordinatorConfig, ErrorKind, Stage, TransferDb,
    TransferError, TransferHandle, TransferRequest, TransferState,
};

const SOURCE: ChainId = ChainId(11155111);
const DEST: ChainId = ChainId(421614);

struct Fixture {
    db: Arc<TransferDb>,
    coordinator: BridgeCoordinator,
    adapter: MockBridgeAdapter,
    source: MockChainClient,
    dest: MockChainClient,
    token: Address,
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval_ms: 1_000,
        confirmation_timeout_ms: 5_000,
        destination_timeout_ms: None,
        default_confirmations: 1,
        retry: RetryPolicy {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            max_attempts: 3,
        },
        ..Default::default()
    }
}

fn fixture(config: CoordinatorConfig) -> Fixture {
    let db = Arc::new(TransferDb::temporary().unwrap());
    let source = MockChainClient::new(SOURCE);
    let token = Address::from_low_u64_be(0x5705);
    source.set_balance(source.sender(), token, U256::from(1_000_000u64));

    Fixture {
        coordinator: BridgeCoordinator::new(db.clone(), config),
        db,
        adapter: MockBridgeAdapter::new("mock"),
        source,
        dest: MockChainClient::new(DEST),
        token,
    }
}

impl Fixture {
    fn request(&self, amount: u64) -> TransferRequest {
        TransferRequest::new(
            SOURCE,
            DEST,
            self.token,
            U256::from(amount),
            Address::from_low_u64_be(0xbeef),
        )
    }

    /// Persist a transfer as a crashed process would have left it
    async fn persist_until(&self, request: &TransferRequest, stage: Stage) -> TransferState {
        let mut state = TransferState::new(request.id);
        self.db.create(request, &state).unwrap();

        let approval = self.adapter.approve(request).await.unwrap();
        state.apply(TransferEvent::StartApproval).unwrap();
        state.record_approval(self.source.prepare(&approval).await.unwrap()).unwrap();
        self.db.append(&state).unwrap();
        if stage == Stage::Approving {
            return state;
        }

        state.apply(TransferEvent::ApprovalMined).unwrap();
        self.db.append(&state).unwrap();
        if stage == Stage::ApprovalConfirmed {
            return state;
        }

        let deposit = self.adapter.deposit(request).await.unwrap();
        state.observe_from_block = Some(self.dest.block_number().await.unwrap());
        state.apply(TransferEvent::StartDeposit).unwrap();
        state.record_deposit(self.source.prepare(&deposit).await.unwrap()).unwrap();
        self.db.append(&state).unwrap();
        state
    }
}

fn recorded(tx: &Option<PendingTx>) -> PendingTx {
    tx.clone().expect("transaction should be recorded")
}

const L2_TOKEN: u64 = 0x2a;

fn op_stack() -> OpStackAdapter {
    OpStackAdapter::new(
        "titan",
        OpStackConfig {
            l1_bridge: Address::from_low_u64_be(0x1b),
            l2_bridge: L2_STANDARD_BRIDGE,
            remote_token: Address::from_low_u64_be(L2_TOKEN),
            min_gas_limit: 210_000,
        },
    )
}

/// `DepositFinalized` for `request` as the L2StandardBridge emits it
fn deposit_finalized(request: &TransferRequest, tx: u64, block_number: u64) -> ObservedLog {
    ObservedLog {
        tx: TxRef(H256::from_low_u64_be(tx)),
        block_number,
        topics: vec![
            DepositFinalizedFilter::signature(),
            H256::from(Address::from_low_u64_be(L2_TOKEN)),
            H256::from(request.token),
            H256::from(Address::from_low_u64_be(0x5c5c)),
        ],
        data: abi::encode(&[
            Token::Address(request.recipient),
            Token::Uint(request.amount),
            Token::Bytes(Vec::new()),
        ])
        .into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_completes_in_five_ticks() {
    let f = fixture(config());
    f.adapter.arrive_after(3);

    let request = f.request(100);
    let id = request.id;
    let arrival = f.adapter.destination_ref(&request);
    let started = Instant::now();

    let result = f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;

    // approval (1) + deposit (1) + destination (3)
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert!(result.is_completed());

    let state = result.state();
    assert_eq!(state.stage, Stage::Completed);
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_some());
    assert_eq!(state.destination_tx, Some(arrival));
    assert!(state.failure.is_none());
    assert_eq!(f.adapter.observe_polls(), 3);

    assert_eq!(f.db.latest(id).unwrap().as_ref(), Some(state));
    assert!(f.db.find_unfinished().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deposit_never_confirms() {
    let f = fixture(config());
    f.source.set_confirmation_schedule(vec![Some(1), None]);

    let result = f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest).await;

    assert!(!result.is_completed());
    let state = result.state();
    assert_eq!(state.stage, Stage::Failed);
    assert_eq!(state.stage_reached(), Stage::Depositing);
    assert_eq!(state.failure_kind(), Some(ErrorKind::ConfirmationTimeout));
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_some());
    assert!(state.destination_tx.is_none());

    // The stuck deposit was broadcast once and never replaced
    assert_eq!(f.source.prepared().len(), 2);
    assert_eq!(f.source.broadcasts().len(), 2);
    assert_eq!(f.adapter.observe_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_approval_timeout_stops_before_deposit() {
    let f = fixture(config());
    f.source.never_confirm();
    let started = Instant::now();

    let result = f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest).await;

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    let state = result.state();
    assert_eq!(state.stage_reached(), Stage::Approving);
    assert_eq!(state.failure_kind(), Some(ErrorKind::ConfirmationTimeout));
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_none());
    assert_eq!(f.source.prepared().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destination_timeout_then_late_arrival() {
    let f = fixture(CoordinatorConfig {
        destination_timeout_ms: Some(3_000),
        ..config()
    });
    f.adapter.never_arrive();

    let request = f.request(100);
    let id = request.id;
    let result = f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.stage_reached(), Stage::AwaitingDestination);
    assert_eq!(state.failure_kind(), Some(ErrorKind::DestinationTimeout));
    assert!(state.deposit_ref().is_some());
    assert!(state.observe_from_block.is_some());
    assert!(state.failure.as_ref().unwrap().message.contains("not proven failed"));
    assert_eq!(f.db.find_awaiting_recheck().unwrap().len(), 1);

    // Still nothing on the destination
    let unchanged = f.coordinator.check_destination(id, &f.adapter, &f.dest).await.unwrap();
    assert!(!unchanged.has_arrived());

    f.adapter.arrive_after(1);
    let rechecked = f.coordinator.check_destination(id, &f.adapter, &f.dest).await.unwrap();

    assert!(rechecked.has_arrived());
    assert_eq!(rechecked.stage, Stage::Failed);
    assert_eq!(rechecked.deposit_ref(), state.deposit_ref());
    assert!(f.db.find_awaiting_recheck().unwrap().is_empty());
    assert_eq!(f.db.latest(id).unwrap(), Some(rechecked));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_rejected_while_in_flight() {
    let f = fixture(config());
    let request = f.request(100);
    let handle = TransferHandle::new(request.id);

    let run = f
        .coordinator
        .execute_with_handle(request, &f.adapter, &f.source, &f.dest, &handle);
    let control = async {
        sleep(Duration::from_millis(500)).await;
        let during_approval = handle.cancel();
        sleep(Duration::from_millis(1_000)).await;
        let during_deposit = handle.cancel();
        (during_approval, during_deposit)
    };

    let (result, (during_approval, during_deposit)) = tokio::join!(run, control);

    assert_eq!(
        during_approval,
        Err(TransferError::CancellationRejected { stage: Stage::Approving })
    );
    assert_eq!(
        during_deposit,
        Err(TransferError::CancellationRejected { stage: Stage::Depositing })
    );
    assert!(result.is_completed());
    assert_eq!(handle.stage(), Stage::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start() {
    let f = fixture(config());
    let request = f.request(100);
    let id = request.id;
    let handle = TransferHandle::new(id);

    handle.cancel().unwrap();
    let result = f
        .coordinator
        .execute_with_handle(request, &f.adapter, &f.source, &f.dest, &handle)
        .await;

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(state.stage_reached(), Stage::Created);
    assert!(f.source.prepared().is_empty());
    assert_eq!(f.db.latest(id).unwrap().unwrap().stage, Stage::Failed);
    assert_eq!(handle.stage(), Stage::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_approval_and_deposit() {
    let f = fixture(config());
    let request = f.request(100);
    f.persist_until(&request, Stage::ApprovalConfirmed).await;

    let handle = TransferHandle::new(request.id);
    handle.cancel().unwrap();
    let result = f
        .coordinator
        .resume(request.id, &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap();

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(state.stage_reached(), Stage::ApprovalConfirmed);
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_none());
    // Only the approval was ever signed
    assert_eq!(f.source.prepared().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_monotonic() {
    let f = fixture(config());
    let request = f.request(100);
    let id = request.id;

    let result = f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;
    assert!(result.is_completed());

    let history = f.db.history(id).unwrap();
    let stages: Vec<Stage> = history.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Created,
            Stage::Approving,
            Stage::ApprovalConfirmed,
            Stage::Depositing,
            Stage::DepositConfirmedSource,
            Stage::AwaitingDestination,
            Stage::Completed,
        ]
    );

    // Once recorded, a reference never changes or disappears
    for pair in history.windows(2) {
        if let Some(tx) = pair[0].approval_ref() {
            assert_eq!(pair[1].approval_ref(), Some(tx));
        }
        if let Some(tx) = pair[0].deposit_ref() {
            assert_eq!(pair[1].deposit_ref(), Some(tx));
        }
    }

    // The approval was recorded before it was broadcast
    assert!(history[1].approval_tx.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_resume_rebroadcasts_recorded_approval() {
    let f = fixture(config());
    let request = f.request(100);
    let persisted = f.persist_until(&request, Stage::Approving).await;
    let approval = recorded(&persisted.approval_tx);

    let handle = TransferHandle::new(request.id);
    let result = f
        .coordinator
        .resume(request.id, &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.state().approval_ref(), Some(approval.hash));
    // approval prepared before the crash + deposit
    assert_eq!(f.source.prepared().len(), 2);
    assert_eq!(f.source.broadcasts()[0], approval.hash);
}

#[tokio::test(start_paused = true)]
async fn test_resume_rebroadcasts_recorded_deposit() {
    let f = fixture(config());
    let request = f.request(100);
    let persisted = f.persist_until(&request, Stage::Depositing).await;
    let deposit = recorded(&persisted.deposit_tx);

    let handle = TransferHandle::new(request.id);
    let result = f
        .coordinator
        .resume(request.id, &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.state().deposit_ref(), Some(deposit.hash));
    assert_eq!(f.source.prepared().len(), 2);
    assert_eq!(f.source.broadcasts(), vec![deposit.hash]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_when_deposit_already_mined() {
    let f = fixture(config());
    let request = f.request(100);
    let persisted = f.persist_until(&request, Stage::Depositing).await;
    let deposit = recorded(&persisted.deposit_tx);

    // The previous process got the deposit out before it died
    f.source.submit(&deposit).await.unwrap();
    f.source.reject_next_submit("nonce too low");

    let handle = TransferHandle::new(request.id);
    let result = f
        .coordinator
        .resume(request.id, &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(f.source.prepared().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resume_of_finished_transfer_is_a_no_op() {
    let f = fixture(config());
    let request = f.request(100);
    let id = request.id;
    f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;
    let prepared = f.source.prepared().len();

    let handle = TransferHandle::new(id);
    let result = f.coordinator.resume(id, &f.adapter, &f.source, &f.dest, &handle).await.unwrap();

    assert!(result.is_completed());
    assert_eq!(f.source.prepared().len(), prepared);
    assert_eq!(handle.stage(), Stage::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_resume_unknown_transfer() {
    let f = fixture(config());
    let handle = TransferHandle::new(f.request(1).id);

    let err = f
        .coordinator
        .resume(handle.request_id(), &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "TRANSFER_NOT_FOUND");
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let f = fixture(config());
    f.source.fail_next_calls(2);

    let result = f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest).await;

    assert!(result.is_completed());
    assert_eq!(f.source.prepared().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_after_retries() {
    let f = fixture(config());
    f.source.fail_next_calls(10);

    let request = f.request(100);
    let id = request.id;
    let result = f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::NetworkError));
    assert_eq!(state.stage_reached(), Stage::Created);
    assert!(f.source.prepared().is_empty());
    assert_eq!(f.db.latest(id).unwrap().unwrap().failure_kind(), Some(ErrorKind::NetworkError));
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_balance() {
    let f = fixture(config());

    let result = f.coordinator.execute(f.request(2_000_000), &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::ApprovalError));
    assert_eq!(state.stage_reached(), Stage::Created);
    assert!(state.failure.as_ref().unwrap().message.contains("insufficient balance"));
    assert!(f.source.prepared().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_approval_broadcast() {
    let f = fixture(config());
    f.source.reject_next_submit("insufficient funds for gas * price + value");

    let result = f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::ApprovalError));
    assert_eq!(state.stage_reached(), Stage::Approving);
    // Recorded before the broadcast was attempted
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reverted_approval() {
    let f = fixture(config());
    let request = f.request(100);

    // Mock hashes only depend on chain, nonce and call, so a twin client
    // predicts the hash the approval will get
    let twin = MockChainClient::new(SOURCE);
    let approval = erc20::approve_call(request.token, f.adapter.bridge_address(), request.amount);
    let predicted = twin.prepare(&approval).await.unwrap().hash;
    f.source.revert_tx(predicted, "execution reverted: ERC20: approve to the zero address");

    let result = f.coordinator.execute(request, &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.approval_ref(), Some(predicted));
    assert_eq!(state.failure_kind(), Some(ErrorKind::ApprovalError));
    assert_eq!(state.stage_reached(), Stage::Approving);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_deposit() {
    let f = fixture(config());
    f.adapter.reject_deposit("token not supported by this bridge");

    let result = f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest).await;

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::DepositError));
    assert_eq!(state.stage_reached(), Stage::ApprovalConfirmed);
    assert!(state.approval_ref().is_some());
    assert!(state.deposit_ref().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_destination_outage_keeps_waiting() {
    let f = fixture(config());
    let adapter = FlakyDestination::new(3);

    let result = f.coordinator.execute(f.request(100), &adapter, &f.source, &f.dest).await;

    // The first tick exhausted its retries; the wait carried on regardless
    assert!(result.is_completed());
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 4);
}

/// Adapter whose destination RPC fails for the first `failures` observations
struct FlakyDestination {
    mock: MockBridgeAdapter,
    failures: u32,
    calls: AtomicU32,
}

impl FlakyDestination {
    fn new(failures: u32) -> Self {
        Self {
            mock: MockBridgeAdapter::new("flaky"),
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BridgeAdapter for FlakyDestination {
    fn name(&self) -> &str {
        self.mock.name()
    }

    fn bridge_address(&self) -> Address {
        self.mock.bridge_address()
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        self.mock.deposit(request).await
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ChainError::Network("connection refused".to_string()));
        }
        self.mock.observe_destination(request, observation, dest).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_arrival_before_source_confirmation_is_found() {
    let f = fixture(CoordinatorConfig {
        destination_timeout_ms: Some(5_000),
        ..config()
    });
    let adapter = op_stack();
    // Approval confirms after one tick, the deposit after three
    f.source.set_confirmation_schedule(vec![Some(1), Some(3)]);
    f.dest.set_block_number(4);

    let request = f.request(100);
    let relayed = deposit_finalized(&request, 0x77, 5);

    let run = f.coordinator.execute(request, &adapter, &f.source, &f.dest);
    let relay = async {
        // Deposit is out at 1s; the L2 mints it long before L1 confirms
        sleep(Duration::from_millis(1_500)).await;
        f.dest.push_log(L2_STANDARD_BRIDGE, relayed.clone());
        f.dest.set_block_number(10);
    };
    let (result, ()) = tokio::join!(run, relay);

    assert!(result.is_completed());
    let state = result.state();
    assert_eq!(state.observe_from_block, Some(4));
    assert_eq!(state.destination_tx, Some(relayed.tx));
}

#[tokio::test(start_paused = true)]
async fn test_identical_transfers_do_not_share_an_arrival() {
    let f = fixture(CoordinatorConfig {
        destination_timeout_ms: Some(3_000),
        ..config()
    });
    let adapter = op_stack();
    let first = f.request(100);
    let second = f.request(100);
    let ids = (first.id, second.id);

    f.dest.push_log(L2_STANDARD_BRIDGE, deposit_finalized(&first, 0x71, 1));

    let (a, b) = tokio::join!(
        f.coordinator.execute(first, &adapter, &f.source, &f.dest),
        f.coordinator.execute(second, &adapter, &f.source, &f.dest),
    );

    let (done, waiting) = match (a.is_completed(), b.is_completed()) {
        (true, false) => (a, ids.1),
        (false, true) => (b, ids.0),
        other => panic!("exactly one transfer should complete, got {:?}", other),
    };
    assert_eq!(done.state().destination_tx, Some(TxRef(H256::from_low_u64_be(0x71))));
    let timed_out = f.db.latest(waiting).unwrap().unwrap();
    assert_eq!(timed_out.failure_kind(), Some(ErrorKind::DestinationTimeout));
    assert!(timed_out.destination_tx.is_none());

    // The first log stays with its transfer; only a second one is credited
    let recheck = f.coordinator.check_destination(waiting, &adapter, &f.dest).await.unwrap();
    assert!(!recheck.has_arrived());

    let request = f.db.request(waiting).unwrap().unwrap();
    f.dest.push_log(L2_STANDARD_BRIDGE, deposit_finalized(&request, 0x72, 2));
    let recheck = f.coordinator.check_destination(waiting, &adapter, &f.dest).await.unwrap();
    assert_eq!(recheck.destination_tx, Some(TxRef(H256::from_low_u64_be(0x72))));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_broadcast_does_not_strand_next_transfer() {
    let f = fixture(config());
    // Node answers after 100ms, and nothing above a nonce gap ever mines
    f.source.strict_nonces();
    f.source.set_submit_latency(Duration::from_millis(100));
    f.source.reject_next_submit("replacement transaction underpriced");

    let (a, b) = tokio::join!(
        f.coordinator.execute(f.request(100), &f.adapter, &f.source, &f.dest),
        f.coordinator.execute(f.request(200), &f.adapter, &f.source, &f.dest),
    );

    let rejected = a.state();
    assert_eq!(rejected.failure_kind(), Some(ErrorKind::ApprovalError));
    assert_eq!(rejected.stage_reached(), Stage::Approving);

    // The second transfer signed after the rejection and reused its nonce
    assert!(b.is_completed());
    let approval = b.state().approval_ref().unwrap();
    assert_eq!(f.source.nonce_of(approval), Some(0));
    assert_eq!(f.source.nonce_of(rejected.approval_ref().unwrap()), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_rebroadcast_with_unknown_status_is_a_network_error() {
    let f = fixture(config());
    let request = f.request(100);
    let persisted = f.persist_until(&request, Stage::Depositing).await;
    let deposit = recorded(&persisted.deposit_tx);

    f.source.reject_next_submit("nonce too low");
    f.source.fail_next_confirmation_checks(3);

    let handle = TransferHandle::new(request.id);
    let result = f
        .coordinator
        .resume(request.id, &f.adapter, &f.source, &f.dest, &handle)
        .await
        .unwrap();

    let state = result.state();
    assert_eq!(state.failure_kind(), Some(ErrorKind::NetworkError));
    assert_eq!(state.stage_reached(), Stage::Depositing);
    assert_eq!(state.deposit_ref(), Some(deposit.hash));
    assert!(state.failure.as_ref().unwrap().message.contains("unknown"));
}
