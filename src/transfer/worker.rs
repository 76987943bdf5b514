//! Transfer Worker
//!
//! Runs many coordinators at once on the tokio runtime. Each transfer is a
//! task that spends nearly all of its life suspended in a confirmation wait,
//! so a semaphore bounds how many are in flight rather than a thread pool.
//! A background loop drains the submission queue, resumes unfinished
//! transfers found in the TransferDb, and rechecks destination timeouts.

use crossbeam::queue::ArrayQueue;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::chain::ChainClient;
use crate::transfer::adapters::BridgeAdapter;
use crate::transfer::coordinator::{BridgeCoordinator, TransferHandle};
use crate::transfer::errors::TransferError;
use crate::transfer::state::{Stage, TransferState};
use crate::transfer::types::{ChainId, RequestId, TransferRequest, TransferResult};

/// Worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Transfers driven concurrently; the rest wait for a slot
    pub max_concurrent_transfers: usize,
    /// Scan interval for queued, unfinished and timed-out transfers (ms)
    pub scan_interval_ms: u64,
    /// Queue capacity
    pub queue_capacity: usize,
    /// Look again for arrivals of transfers that hit `DestinationTimeout`
    pub recheck_timed_out: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 16,
            scan_interval_ms: 60_000, // 1 minute
            queue_capacity: 1024,
            recheck_timed_out: true,
        }
    }
}

/// Transfer queue (ring buffer with backpressure)
pub struct TransferQueue {
    buffer: ArrayQueue<TransferRequest>,
}

impl TransferQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Try to push a request to the queue
    /// Returns false if queue is full (backpressure)
    pub fn try_push(&self, request: TransferRequest) -> bool {
        self.buffer.push(request).is_ok()
    }

    pub fn try_pop(&self) -> Option<TransferRequest> {
        self.buffer.pop()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Everything needed to drive transfers over one (source, destination) pair
#[derive(Clone)]
pub struct Route {
    pub adapter: Arc<dyn BridgeAdapter>,
    pub source: Arc<dyn ChainClient>,
    pub dest: Arc<dyn ChainClient>,
}

/// Concurrent driver for many transfers
pub struct TransferWorker {
    coordinator: Arc<BridgeCoordinator>,
    routes: HashMap<(ChainId, ChainId), Route>,
    queue: TransferQueue,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<RequestId, TransferHandle>>,
    config: WorkerConfig,
}

impl TransferWorker {
    pub fn new(coordinator: Arc<BridgeCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            routes: HashMap::new(),
            queue: TransferQueue::new(config.queue_capacity),
            permits: Arc::new(Semaphore::new(config.max_concurrent_transfers.max(1))),
            active: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Register the adapter and clients used for `source -> dest` transfers
    pub fn with_route(mut self, source_chain: ChainId, dest_chain: ChainId, route: Route) -> Self {
        self.routes.insert((source_chain, dest_chain), route);
        self
    }

    pub fn coordinator(&self) -> &Arc<BridgeCoordinator> {
        &self.coordinator
    }

    pub fn route(&self, source_chain: ChainId, dest_chain: ChainId) -> Result<&Route, TransferError> {
        self.routes.get(&(source_chain, dest_chain)).ok_or_else(|| {
            TransferError::InvalidRequest(format!(
                "no bridge configured from chain {} to chain {}",
                source_chain, dest_chain
            ))
        })
    }

    /// Queue a request for the background loop
    /// Returns false if the queue is full
    pub fn enqueue(&self, request: TransferRequest) -> bool {
        self.queue.try_push(request)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Start a transfer in its own task
    pub fn submit(
        self: &Arc<Self>,
        request: TransferRequest,
    ) -> Result<(TransferHandle, JoinHandle<TransferResult>), TransferError> {
        let route = self.route(request.source_chain, request.dest_chain)?.clone();
        let handle = self.track(request.id)?;

        let worker = Arc::clone(self);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            let _permit = worker.permits.clone().acquire_owned().await.ok();
            let result = worker
                .coordinator
                .execute_with_handle(
                    request,
                    route.adapter.as_ref(),
                    route.source.as_ref(),
                    route.dest.as_ref(),
                    &task_handle,
                )
                .await;
            worker.untrack(task_handle.request_id());
            result
        });

        Ok((handle, task))
    }

    /// Run every request concurrently and wait for all of them.
    ///
    /// Results come back in request order. A request without a configured
    /// route fails with `InvalidRequest` without affecting the others.
    pub async fn run_batch(self: &Arc<Self>, requests: Vec<TransferRequest>) -> Vec<TransferResult> {
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let id = request.id;
            pending.push(match self.submit(request) {
                Ok((_, task)) => Ok((id, task)),
                Err(err) => Err(rejected(id, err)),
            });
        }

        let joined = join_all(pending.into_iter().map(|entry| async move {
            match entry {
                Ok((id, task)) => task.await.unwrap_or_else(|e| {
                    rejected(id, TransferError::Storage(format!("transfer task aborted: {}", e)))
                }),
                Err(result) => result,
            }
        }))
        .await;

        let completed = joined.iter().filter(|r| r.is_completed()).count();
        log::info!("Batch finished: {}/{} completed", completed, joined.len());
        joined
    }

    /// Resume one persisted transfer in its own task
    pub fn spawn_resume(
        self: &Arc<Self>,
        request: &TransferRequest,
    ) -> Result<(TransferHandle, JoinHandle<Result<TransferResult, TransferError>>), TransferError> {
        let route = self.route(request.source_chain, request.dest_chain)?.clone();
        let handle = self.track(request.id)?;

        let worker = Arc::clone(self);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            let _permit = worker.permits.clone().acquire_owned().await.ok();
            let result = worker
                .coordinator
                .resume(
                    task_handle.request_id(),
                    route.adapter.as_ref(),
                    route.source.as_ref(),
                    route.dest.as_ref(),
                    &task_handle,
                )
                .await;
            worker.untrack(task_handle.request_id());
            result
        });

        Ok((handle, task))
    }

    /// Resume every unfinished transfer that is not already running
    pub async fn resume_unfinished(self: &Arc<Self>) -> Result<Vec<TransferResult>, TransferError> {
        let unfinished = self.coordinator.db().find_unfinished()?;
        let mut tasks = Vec::new();

        for (request, state) in unfinished {
            if self.is_active(request.id) {
                continue;
            }
            log::info!("Resuming transfer {} (stage: {})", request.id, state.stage);
            match self.spawn_resume(&request) {
                Ok((_, task)) => tasks.push(task),
                Err(e) => log::error!("Cannot resume transfer {}: {}", request.id, e),
            }
        }

        let mut results = Vec::with_capacity(tasks.len());
        for joined in join_all(tasks).await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => log::error!("Resume failed: {}", e),
                Err(e) => log::error!("Resume task aborted: {}", e),
            }
        }
        Ok(results)
    }

    /// Look again for the destination arrival of one transfer
    pub async fn recheck_destination(&self, request_id: RequestId) -> Result<TransferState, TransferError> {
        let request = self
            .coordinator
            .db()
            .request(request_id)?
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;
        let route = self.route(request.source_chain, request.dest_chain)?;

        self.coordinator
            .check_destination(request_id, route.adapter.as_ref(), route.dest.as_ref())
            .await
    }

    /// Recheck every transfer that timed out waiting for its destination
    pub async fn recheck_timed_out(&self) -> Result<Vec<TransferState>, TransferError> {
        let candidates = self.coordinator.db().find_awaiting_recheck()?;
        let mut states = Vec::with_capacity(candidates.len());

        for (request, _) in candidates {
            match self.recheck_destination(request.id).await {
                Ok(state) => {
                    if state.has_arrived() {
                        log::info!("Late arrival observed for transfer {}", request.id);
                    }
                    states.push(state);
                }
                Err(e) => log::warn!("Recheck of transfer {} failed: {}", request.id, e),
            }
        }
        Ok(states)
    }

    /// Cancel a running transfer
    ///
    /// An accepted cancel is persisted before this returns, so it holds even
    /// if the process exits before the transfer's task observes it.
    pub fn cancel(&self, request_id: RequestId) -> Result<(), TransferError> {
        let handle = self
            .active()
            .get(&request_id)
            .cloned()
            .ok_or_else(|| TransferError::TransferNotFound(request_id.to_string()))?;
        self.coordinator.cancel(&handle)
    }

    /// Request cancellation of every running transfer
    /// Returns how many accepted it
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<TransferHandle> = self.active().values().cloned().collect();
        let mut accepted = 0;
        for handle in handles {
            match self.coordinator.cancel(&handle) {
                Ok(()) => accepted += 1,
                Err(e @ TransferError::CancellationRejected { .. }) => {
                    log::info!("Transfer {} keeps running: {}", handle.request_id(), e)
                }
                Err(e) => log::error!("Cancellation of transfer {} not persisted: {}", handle.request_id(), e),
            }
        }
        accepted
    }

    /// Running transfers and the stage each has reached
    pub fn active_transfers(&self) -> Vec<(RequestId, Stage)> {
        self.active().iter().map(|(id, h)| (*id, h.stage())).collect()
    }

    pub fn is_active(&self, request_id: RequestId) -> bool {
        self.active().contains_key(&request_id)
    }

    /// Run the background worker loop
    pub async fn run(self: Arc<Self>) {
        log::info!(
            "Transfer worker started (routes={}, max_concurrent={}, scan_interval={}ms)",
            self.routes.len(),
            self.config.max_concurrent_transfers,
            self.config.scan_interval_ms
        );

        loop {
            // 1. Start queued requests
            while let Some(request) = self.queue.try_pop() {
                let id = request.id;
                if let Err(e) = self.submit(request) {
                    log::error!("Cannot start transfer {}: {}", id, e);
                }
            }

            // 2. Pick up unfinished transfers left by a previous run
            match self.coordinator.db().find_unfinished() {
                Ok(unfinished) => {
                    for (request, state) in unfinished {
                        if self.is_active(request.id) {
                            continue;
                        }
                        log::info!("Resuming transfer {} (stage: {})", request.id, state.stage);
                        if let Err(e) = self.spawn_resume(&request) {
                            log::error!("Cannot resume transfer {}: {}", request.id, e);
                        }
                    }
                }
                Err(e) => log::error!("Error scanning unfinished transfers: {:#}", e),
            }

            // 3. Late arrivals
            if self.config.recheck_timed_out {
                if let Err(e) = self.recheck_timed_out().await {
                    log::error!("Error rechecking timed-out transfers: {}", e);
                }
            }

            sleep(Duration::from_millis(self.config.scan_interval_ms)).await;
        }
    }

    /// Start the worker in a background task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    fn track(&self, request_id: RequestId) -> Result<TransferHandle, TransferError> {
        let mut active = self.active();
        if active.contains_key(&request_id) {
            return Err(TransferError::InvalidRequest(format!(
                "transfer {} is already running",
                request_id
            )));
        }
        let handle = TransferHandle::new(request_id);
        active.insert(request_id, handle.clone());
        Ok(handle)
    }

    fn untrack(&self, request_id: RequestId) {
        self.active().remove(&request_id);
    }

    fn active(&self) -> MutexGuard<'_, HashMap<RequestId, TransferHandle>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn rejected(id: RequestId, err: TransferError) -> TransferResult {
    let mut state = TransferState::new(id);
    state.fail(err.kind(), err.to_string());
    TransferResult::Failed(state)
}
