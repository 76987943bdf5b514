//! Transfer State Machine
//!
//! Defines the stages, events, and transition function for bridge transfers,
//! plus the mutable `TransferState` record the coordinator owns.

use serde::{Deserialize, Serialize};

use crate::chain::{PendingTx, TxRef};
use crate::transfer::errors::{ErrorKind, TransferError};
use crate::transfer::types::RequestId;

/// Transfer stages, in the only order they may be visited
///
/// The derived `Ord` follows declaration order and is what the monotonicity
/// checks compare against.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// State allocated, nothing sent yet
    Created,
    /// Approval requested on the source chain
    Approving,
    /// Approval mined at the required depth
    ApprovalConfirmed,
    /// Deposit/lock requested on the source chain
    Depositing,
    /// Deposit mined at the required depth
    DepositConfirmedSource,
    /// Waiting for the mint/release on the destination chain
    AwaitingDestination,
    /// Destination arrival observed ✅
    Completed,
    /// Terminal failure, see `TransferState::failure` ❌
    Failed,
}

impl Stage {
    /// Check if this is a terminal stage (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Cancellation is only honoured before anything is sent, or between a
    /// confirmed approval and the deposit submission
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Stage::Created | Stage::ApprovalConfirmed)
    }
}

/// FSM events (inputs that trigger stage transitions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TransferEvent {
    StartApproval,
    ApprovalMined,
    StartDeposit,
    DepositMined,
    AwaitDestination,
    DestinationObserved,
    Fail,
}

/// State transition function
///
/// Given the current stage and an event, returns the next stage.
/// Invalid transitions return the current stage (no change).
pub fn transition(current: Stage, event: TransferEvent) -> Stage {
    use Stage::*;
    use TransferEvent::*;

    match (current, event) {
        (Created, StartApproval) => Approving,
        (Approving, ApprovalMined) => ApprovalConfirmed,
        (ApprovalConfirmed, StartDeposit) => Depositing,
        (Depositing, DepositMined) => DepositConfirmedSource,
        (DepositConfirmedSource, AwaitDestination) => AwaitingDestination,
        (AwaitingDestination, DestinationObserved) => Completed,

        // Any live stage can fail
        (s, Fail) if !s.is_terminal() => Failed,

        // Invalid transitions - stay in current stage
        _ => current,
    }
}

/// Why a transfer stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Last live stage before failing
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Mutable record tracking one in-flight transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub request_id: RequestId,
    pub stage: Stage,
    /// Signed approval, recorded before broadcast
    pub approval_tx: Option<PendingTx>,
    /// Signed deposit, recorded before broadcast
    pub deposit_tx: Option<PendingTx>,
    /// Destination block to start searching from, captured once the deposit is confirmed
    pub observe_from_block: Option<u64>,
    /// Mint/release transaction on the destination chain
    pub destination_tx: Option<TxRef>,
    pub failure: Option<Failure>,
    /// Last update timestamp (ms)
    pub updated_at: i64,
}

impl TransferState {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            stage: Stage::Created,
            approval_tx: None,
            deposit_tx: None,
            observe_from_block: None,
            destination_tx: None,
            failure: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Apply an event; errors instead of silently staying put
    pub fn apply(&mut self, event: TransferEvent) -> Result<Stage, TransferError> {
        let next = transition(self.stage, event);
        if next == self.stage {
            return Err(TransferError::InvalidStateTransition {
                from: self.stage,
                event: event.to_string(),
            });
        }
        self.stage = next;
        self.touch();
        Ok(next)
    }

    /// Move to `Failed`, remembering the stage reached
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        if self.stage.is_terminal() {
            return;
        }
        self.failure = Some(Failure {
            stage: self.stage,
            kind,
            message: message.into(),
        });
        self.stage = Stage::Failed;
        self.touch();
    }

    pub fn record_approval(&mut self, tx: PendingTx) -> Result<(), TransferError> {
        Self::record_once(self.stage, &mut self.approval_tx, tx, "approval")?;
        self.touch();
        Ok(())
    }

    pub fn record_deposit(&mut self, tx: PendingTx) -> Result<(), TransferError> {
        Self::record_once(self.stage, &mut self.deposit_tx, tx, "deposit")?;
        self.touch();
        Ok(())
    }

    /// Record the destination-side transaction.
    ///
    /// Only valid once the deposit is confirmed on the source chain. A
    /// transfer that already failed with `DestinationTimeout` may still take
    /// the reference (late arrival); its stage stays `Failed`.
    pub fn record_destination(&mut self, tx: TxRef) -> Result<(), TransferError> {
        if self.deposit_tx.is_none() {
            return Err(TransferError::InvalidStateTransition {
                from: self.stage,
                event: "record_destination without deposit".to_string(),
            });
        }

        let allowed = match self.stage {
            Stage::DepositConfirmedSource | Stage::AwaitingDestination => true,
            Stage::Failed => self.failure_kind() == Some(ErrorKind::DestinationTimeout),
            _ => false,
        };
        if !allowed {
            return Err(TransferError::InvalidStateTransition {
                from: self.stage,
                event: "record_destination".to_string(),
            });
        }

        match self.destination_tx {
            Some(existing) if existing != tx => Err(TransferError::InvalidStateTransition {
                from: self.stage,
                event: format!("destination already recorded as {}", existing),
            }),
            _ => {
                self.destination_tx = Some(tx);
                self.touch();
                Ok(())
            }
        }
    }

    fn record_once(
        stage: Stage,
        slot: &mut Option<PendingTx>,
        tx: PendingTx,
        what: &str,
    ) -> Result<(), TransferError> {
        match slot {
            Some(existing) if existing.hash != tx.hash => Err(TransferError::InvalidStateTransition {
                from: stage,
                event: format!("{} already recorded as {}", what, existing.hash),
            }),
            _ => {
                *slot = Some(tx);
                Ok(())
            }
        }
    }

    pub fn approval_ref(&self) -> Option<TxRef> {
        self.approval_tx.as_ref().map(|t| t.hash)
    }

    pub fn deposit_ref(&self) -> Option<TxRef> {
        self.deposit_tx.as_ref().map(|t| t.hash)
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// The stage that was live when the transfer failed, or the current stage
    pub fn stage_reached(&self) -> Stage {
        self.failure.as_ref().map(|f| f.stage).unwrap_or(self.stage)
    }

    /// Destination arrival has been observed (possibly after a timeout)
    pub fn has_arrived(&self) -> bool {
        self.destination_tx.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
