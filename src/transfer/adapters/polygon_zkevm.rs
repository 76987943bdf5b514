//! Polygon zkEVM bridge
//!
//! `bridgeAsset` locks the tokens on L1; the claim on L2 emits `ClaimEvent`
//! from the same bridge contract. None of the event fields are indexed, so
//! the search filters by signature and matches on the decoded fields.

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::contract::{abigen, EthEvent};
use ethers::types::{Address, Bytes};
use serde::Deserialize;

use super::first_matching_log;
use super::traits::{BridgeAdapter, Observation};
use crate::chain::{ChainClient, ChainError, LogQuery, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

abigen!(
    PolygonZkEvmBridge,
    r#"[
        function bridgeAsset(uint32 destinationNetwork, address destinationAddress, uint256 amount, address token, bool forceUpdateGlobalExitRoot, bytes permitData) payable
        event ClaimEvent(uint256 globalIndex, uint32 originNetwork, address originAddress, address destinationAddress, uint256 amount)
    ]"#
);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolygonZkEvmConfig {
    /// Bridge on L1 (approval spender and deposit target)
    pub l1_bridge: Address,
    /// Bridge on L2, defaults to the L1 address
    #[serde(default)]
    pub l2_bridge: Option<Address>,
    /// Network id of the destination rollup (1 for zkEVM)
    #[serde(default = "default_destination_network")]
    pub destination_network: u32,
    /// Network id tokens originate from (0 for Ethereum)
    #[serde(default)]
    pub origin_network: u32,
    #[serde(default = "default_force_update")]
    pub force_update_global_exit_root: bool,
}

fn default_destination_network() -> u32 {
    1
}

fn default_force_update() -> bool {
    true
}

pub struct PolygonZkEvmAdapter {
    name: String,
    config: PolygonZkEvmConfig,
}

impl PolygonZkEvmAdapter {
    pub fn new(name: &str, config: PolygonZkEvmConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    fn l2_bridge(&self) -> Address {
        self.config.l2_bridge.unwrap_or(self.config.l1_bridge)
    }
}

#[async_trait]
impl BridgeAdapter for PolygonZkEvmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn bridge_address(&self) -> Address {
        self.config.l1_bridge
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        let call = BridgeAssetCall {
            destination_network: self.config.destination_network,
            destination_address: request.recipient,
            amount: request.amount,
            token: request.token,
            force_update_global_exit_root: self.config.force_update_global_exit_root,
            permit_data: Bytes::new(),
        };
        Ok(TxRequest::call(self.config.l1_bridge, call.encode()))
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        let query = LogQuery::new(self.l2_bridge(), ClaimEventFilter::signature(), observation.from_block);
        let origin_network = self.config.origin_network;

        first_matching_log(dest, &query, observation, |event: &ClaimEventFilter| {
            event.origin_network == origin_network
                && event.origin_address == request.token
                && event.destination_address == request.recipient
                && event.amount == request.amount
        })
        .await
    }
}
