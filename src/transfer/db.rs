//! Persistence for bridge transfers
//!
//! Uses sled with two trees:
//! - `requests`: request id -> TransferRequest (JSON), written once
//! - `transfer_log`: `{request_id}/{seq:016x}` -> TransferState (JSON), append-only
//! - `destination_claims`: `{dest_chain}/{tx}` -> DestinationClaim (JSON), written once
//!
//! Every state the coordinator reaches is appended and flushed before the
//! coordinator acts on it, so the newest entry per request is always a
//! state the transfer has actually been in.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::chain::TxRef;
use crate::transfer::errors::ErrorKind;
use crate::transfer::state::{Stage, TransferState};
use crate::transfer::types::{ChainId, RequestId, TransferRequest};

const REQUESTS_TREE: &str = "requests";
const TRANSFER_LOG_TREE: &str = "transfer_log";
const DESTINATION_CLAIMS_TREE: &str = "destination_claims";

/// A destination transaction credited to one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DestinationClaim {
    request_id: RequestId,
    tx: TxRef,
}

/// Database operations for transfers
pub struct TransferDb {
    db: Db,
    requests: Tree,
    log: Tree,
    claims: Tree,
}

impl TransferDb {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("Failed to open transfer db at {}", path))?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop (tests, dry runs)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("Failed to open temporary transfer db")?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let requests = db.open_tree(REQUESTS_TREE).context("Failed to open requests tree")?;
        let log = db.open_tree(TRANSFER_LOG_TREE).context("Failed to open transfer_log tree")?;
        let claims = db
            .open_tree(DESTINATION_CLAIMS_TREE)
            .context("Failed to open destination_claims tree")?;
        Ok(Self {
            db,
            requests,
            log,
            claims,
        })
    }

    /// Store a new request together with its initial state
    pub fn create(&self, request: &TransferRequest, state: &TransferState) -> Result<()> {
        let key = request.id.to_string();
        let value = serde_json::to_vec(request).context("Failed to serialize transfer request")?;

        let inserted = self
            .requests
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))
            .context("Failed to insert transfer request")?;
        if inserted.is_err() {
            bail!("Transfer {} already exists", request.id);
        }

        self.append(state)
    }

    /// Append a state to the request's log.
    ///
    /// Refuses a stage regression and any change to an already recorded
    /// transaction reference.
    pub fn append(&self, state: &TransferState) -> Result<()> {
        if let Some(prev) = self.latest(state.request_id)? {
            check_successor(&prev, state)?;
        }

        let seq = self.db.generate_id().context("Failed to allocate log sequence")?;
        let key = log_key(state.request_id, seq);
        let value = serde_json::to_vec(state).context("Failed to serialize transfer state")?;

        self.log.insert(key.as_bytes(), value).context("Failed to append transfer state")?;
        self.db.flush().context("Failed to flush transfer log")?;

        log::debug!("[{}] persisted stage {}", state.request_id, state.stage);
        Ok(())
    }

    /// Credit destination transaction `tx` on `chain` to `request_id`.
    ///
    /// Returns false if another transfer already holds it. Claiming the same
    /// transaction twice for the same transfer succeeds.
    pub fn claim_destination(&self, chain: ChainId, tx: TxRef, request_id: RequestId) -> Result<bool> {
        let key = claim_key(chain, tx);
        let claim = DestinationClaim { request_id, tx };
        let value = serde_json::to_vec(&claim).context("Failed to serialize destination claim")?;

        let swapped = self
            .claims
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))
            .context("Failed to write destination claim")?;

        match swapped {
            Ok(()) => {
                self.db.flush().context("Failed to flush destination claim")?;
                Ok(true)
            }
            Err(conflict) => {
                let holder: DestinationClaim = match conflict.current {
                    Some(bytes) => serde_json::from_slice(&bytes).context("Failed to parse destination claim")?,
                    None => bail!("Destination claim for {} vanished", tx),
                };
                Ok(holder.request_id == request_id)
            }
        }
    }

    /// Destination transactions on `chain` credited to transfers other than `except`
    pub fn claimed_destinations(&self, chain: ChainId, except: RequestId) -> Result<Vec<TxRef>> {
        let mut claimed = Vec::new();
        for entry in self.claims.scan_prefix(format!("{}/", chain)) {
            let (_, bytes) = entry.context("Failed to read destination claims")?;
            let claim: DestinationClaim =
                serde_json::from_slice(&bytes).context("Failed to parse destination claim")?;
            if claim.request_id != except {
                claimed.push(claim.tx);
            }
        }
        Ok(claimed)
    }

    pub fn request(&self, id: RequestId) -> Result<Option<TransferRequest>> {
        match self.requests.get(id.to_string().as_bytes()).context("Failed to read transfer request")? {
            Some(bytes) => {
                let request = serde_json::from_slice(&bytes).context("Failed to parse transfer request")?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Most recent persisted state
    pub fn latest(&self, id: RequestId) -> Result<Option<TransferState>> {
        match self.log.scan_prefix(log_prefix(id)).next_back() {
            Some(entry) => {
                let (_, bytes) = entry.context("Failed to read transfer log")?;
                let state = serde_json::from_slice(&bytes).context("Failed to parse transfer state")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Every persisted state, oldest first
    pub fn history(&self, id: RequestId) -> Result<Vec<TransferState>> {
        let mut states = Vec::new();
        for entry in self.log.scan_prefix(log_prefix(id)) {
            let (_, bytes) = entry.context("Failed to read transfer log")?;
            states.push(serde_json::from_slice(&bytes).context("Failed to parse transfer state")?);
        }
        Ok(states)
    }

    /// All requests with their latest state
    pub fn all(&self) -> Result<Vec<(TransferRequest, TransferState)>> {
        let mut transfers = Vec::new();
        for entry in self.requests.iter() {
            let (_, bytes) = entry.context("Failed to read requests tree")?;
            let request: TransferRequest =
                serde_json::from_slice(&bytes).context("Failed to parse transfer request")?;
            match self.latest(request.id)? {
                Some(state) => transfers.push((request, state)),
                None => log::warn!("Transfer {} has a request but no state", request.id),
            }
        }
        Ok(transfers)
    }

    /// Transfers not in a terminal stage (for resume after restart)
    pub fn find_unfinished(&self) -> Result<Vec<(TransferRequest, TransferState)>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|(_, state)| !state.stage.is_terminal())
            .collect())
    }

    /// Transfers that timed out waiting for the destination and have not
    /// been seen arriving since
    pub fn find_awaiting_recheck(&self) -> Result<Vec<(TransferRequest, TransferState)>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|(_, state)| {
                state.failure_kind() == Some(ErrorKind::DestinationTimeout) && !state.has_arrived()
            })
            .collect())
    }
}

fn log_prefix(id: RequestId) -> String {
    format!("{}/", id)
}

fn log_key(id: RequestId, seq: u64) -> String {
    format!("{}/{:016x}", id, seq)
}

fn claim_key(chain: ChainId, tx: TxRef) -> String {
    format!("{}/{}", chain, tx)
}

fn check_successor(prev: &TransferState, next: &TransferState) -> Result<()> {
    if next.stage < prev.stage {
        bail!(
            "Transfer {}: stage regression {} -> {}",
            prev.request_id,
            prev.stage,
            next.stage
        );
    }
    if prev.stage == Stage::Completed && next != prev {
        bail!("Transfer {}: completed transfers are immutable", prev.request_id);
    }

    fn kept<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
        a.is_none() || a == b
    }
    if !kept(prev.approval_ref(), next.approval_ref()) {
        bail!("Transfer {}: approval reference changed", prev.request_id);
    }
    if !kept(prev.deposit_ref(), next.deposit_ref()) {
        bail!("Transfer {}: deposit reference changed", prev.request_id);
    }
    if !kept(prev.destination_tx, next.destination_tx) {
        bail!("Transfer {}: destination reference changed", prev.request_id);
    }
    if !kept(prev.observe_from_block, next.observe_from_block) {
        bail!("Transfer {}: destination start block changed", prev.request_id);
    }
    Ok(())
}
