// Error types for bridge transfers
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::{ChainError, TxRef};
use crate::transfer::state::Stage;

/// Error category recorded in a failed TransferState
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    ApprovalError,
    DepositError,
    ConfirmationTimeout,
    DestinationTimeout,
    NetworkError,
    CancellationRejected,
    Cancelled,
    Storage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferError {
    // Rejected before any chain interaction
    InvalidRequest(String),

    // On-chain rejections
    Approval(String),
    Deposit(String),

    // Waits
    ConfirmationTimeout { tx: TxRef, waited_ms: u64 },
    DestinationTimeout { deposit_tx: TxRef, waited_ms: u64 },

    // Transient errors that exhausted their retries
    Network(String),

    // Cancellation
    CancellationRejected { stage: Stage },
    Cancelled { stage: Stage },

    // State / persistence
    InvalidStateTransition { from: Stage, event: String },
    TransferNotFound(String),
    Storage(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Approval(msg) => write!(f, "Approval failed: {}", msg),
            Self::Deposit(msg) => write!(f, "Deposit failed: {}", msg),
            Self::ConfirmationTimeout { tx, waited_ms } => write!(
                f,
                "Transaction {} not confirmed after {}ms; it was NOT resubmitted, check it manually",
                tx, waited_ms
            ),
            Self::DestinationTimeout { deposit_tx, waited_ms } => write!(
                f,
                "Destination arrival for deposit {} not observed within {}ms; \
                 the transfer is not proven failed and may still complete",
                deposit_tx, waited_ms
            ),
            Self::Network(msg) => write!(f, "Network error (retries exhausted): {}", msg),
            Self::CancellationRejected { stage } => write!(
                f,
                "Cannot cancel in stage {}: a transaction is in flight and cannot be unsent",
                stage
            ),
            Self::Cancelled { stage } => write!(f, "Transfer cancelled in stage {}", stage),
            Self::InvalidStateTransition { from, event } => {
                write!(f, "Invalid state transition: {} on {}", from, event)
            }
            Self::TransferNotFound(id) => write!(f, "Transfer {} not found", id),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<anyhow::Error> for TransferError {
    fn from(err: anyhow::Error) -> Self {
        TransferError::Storage(format!("{:#}", err))
    }
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Approval(_) => ErrorKind::ApprovalError,
            Self::Deposit(_) => ErrorKind::DepositError,
            Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Self::DestinationTimeout { .. } => ErrorKind::DestinationTimeout,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::CancellationRejected { .. } => ErrorKind::CancellationRejected,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidStateTransition { .. } | Self::TransferNotFound(_) | Self::Storage(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Approval(_) => "APPROVAL_ERROR",
            Self::Deposit(_) => "DEPOSIT_ERROR",
            Self::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            Self::DestinationTimeout { .. } => "DESTINATION_TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::CancellationRejected { .. } => "CANCELLATION_REJECTED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether a human can simply retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Storage(_))
    }

    /// Map a chain error raised while approving
    pub fn approval(err: ChainError) -> Self {
        match err {
            ChainError::Network(msg) => Self::Network(msg),
            ChainError::Rejected(msg) => Self::Approval(msg),
        }
    }

    /// Map a chain error raised while depositing
    pub fn deposit(err: ChainError) -> Self {
        match err {
            ChainError::Network(msg) => Self::Network(msg),
            ChainError::Rejected(msg) => Self::Deposit(msg),
        }
    }
}
