//! Adapters module - one bridge adapter per destination ecosystem

pub mod arbitrum;
pub mod mock;
pub mod op_stack;
pub mod polygon_zkevm;
pub mod traits;
pub mod zksync;

use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::types::{Address, H256};
use serde::Deserialize;
use std::sync::Arc;

use crate::chain::{ChainClient, ChainError, LogQuery, TxRef};
use crate::transfer::types::ChainId;

pub use arbitrum::{ArbitrumAdapter, ArbitrumConfig};
pub use mock::MockBridgeAdapter;
pub use op_stack::{OpStackAdapter, OpStackConfig};
pub use polygon_zkevm::{PolygonZkEvmAdapter, PolygonZkEvmConfig};
pub use traits::{BridgeAdapter, Observation};
pub use zksync::{ZkSyncAdapter, ZkSyncConfig};

/// Bridge-specific settings, selected by `kind` in the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeKindConfig {
    Arbitrum(ArbitrumConfig),
    OpStack(OpStackConfig),
    #[serde(rename = "polygon_zkevm")]
    PolygonZkEvm(PolygonZkEvmConfig),
    #[serde(rename = "zksync")]
    ZkSync(ZkSyncConfig),
}

/// One configured route: token X from chain A to chain B over bridge K
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeRoute {
    pub name: String,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    /// Token contract on the source chain
    pub token: Address,
    #[serde(flatten)]
    pub kind: BridgeKindConfig,
}

pub fn build_adapter(route: &BridgeRoute) -> Arc<dyn BridgeAdapter> {
    match &route.kind {
        BridgeKindConfig::Arbitrum(c) => Arc::new(ArbitrumAdapter::new(&route.name, c.clone())),
        BridgeKindConfig::OpStack(c) => Arc::new(OpStackAdapter::new(&route.name, c.clone())),
        BridgeKindConfig::PolygonZkEvm(c) => {
            Arc::new(PolygonZkEvmAdapter::new(&route.name, c.clone()))
        }
        BridgeKindConfig::ZkSync(c) => Arc::new(ZkSyncAdapter::new(&route.name, c.clone())),
    }
}

/// Indexed address topic (left-padded to 32 bytes)
pub(crate) fn address_topic(address: Address) -> H256 {
    H256::from(address)
}

/// First unclaimed log matching `query` whose decoded event satisfies `matches`
///
/// Logs that fail to decode are skipped; several bridges emit events with
/// the same signature from unrelated contracts. Logs are taken oldest first
/// so identical transfers are credited in arrival order.
pub(crate) async fn first_matching_log<E, F>(
    dest: &dyn ChainClient,
    query: &LogQuery,
    observation: &Observation,
    matches: F,
) -> Result<Option<TxRef>, ChainError>
where
    E: EthLogDecode + Send,
    F: Fn(&E) -> bool + Send,
{
    let mut logs = dest.find_logs(query).await?;
    logs.sort_by_key(|entry| entry.block_number);

    for entry in logs {
        if observation.is_claimed(entry.tx) {
            continue;
        }
        let raw = RawLog {
            topics: entry.topics.clone(),
            data: entry.data.to_vec(),
        };
        match E::decode_log(&raw) {
            Ok(event) if matches(&event) => return Ok(Some(entry.tx)),
            Ok(_) => {}
            Err(e) => log::debug!("skipping undecodable log in {}: {}", entry.tx, e),
        }
    }

    Ok(None)
}
