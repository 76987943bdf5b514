//! Transfer module - main module file
//!
//! This module provides the bridge transfer coordinator: the stage machine,
//! the per-ecosystem bridge adapters, durable transfer state, and the worker
//! that drives many transfers concurrently.

pub mod adapters;
pub mod coordinator;
pub mod db;
pub mod errors;
pub mod state;
pub mod types;
pub mod worker;
pub mod wrap;

// Re-export commonly used types
pub use adapters::{build_adapter, BridgeAdapter, BridgeRoute};
pub use coordinator::{BridgeCoordinator, CoordinatorConfig, TransferHandle};
pub use db::TransferDb;
pub use errors::{ErrorKind, TransferError};
pub use state::{Failure, Stage, TransferState};
pub use types::{ChainId, RequestId, TransferRequest, TransferResult};
pub use worker::{Route, TransferQueue, TransferWorker, WorkerConfig};
pub use wrap::{WrapReceipt, WrapSource, WstonSettings};
