//! OP Stack standard bridge (Optimism, Thanos)
//!
//! Deposits go through the L1StandardBridge; the L2StandardBridge predeploy
//! emits `DepositFinalized` once the relayed message mints on L2.

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::contract::{abigen, EthEvent};
use ethers::types::{Address, Bytes, H160};
use serde::Deserialize;

use super::traits::{BridgeAdapter, Observation};
use super::{address_topic, first_matching_log};
use crate::chain::{ChainClient, ChainError, LogQuery, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

/// L2StandardBridge predeploy, 0x4200000000000000000000000000000000000010
pub const L2_STANDARD_BRIDGE: Address = H160([
    0x42, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x10,
]);

abigen!(
    L1StandardBridge,
    r#"[
        function bridgeERC20To(address localToken, address remoteToken, address to, uint256 amount, uint32 minGasLimit, bytes extraData)
    ]"#
);

abigen!(
    L2StandardBridge,
    r#"[
        event DepositFinalized(address indexed localToken, address indexed remoteToken, address indexed from, address to, uint256 amount, bytes extraData)
    ]"#
);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpStackConfig {
    /// L1StandardBridge proxy (approval spender and deposit target)
    pub l1_bridge: Address,
    #[serde(default = "default_l2_bridge")]
    pub l2_bridge: Address,
    /// Token address on L2
    pub remote_token: Address,
    #[serde(default = "default_min_gas_limit")]
    pub min_gas_limit: u32,
}

fn default_l2_bridge() -> Address {
    L2_STANDARD_BRIDGE
}

fn default_min_gas_limit() -> u32 {
    210_000
}

pub struct OpStackAdapter {
    name: String,
    config: OpStackConfig,
}

impl OpStackAdapter {
    pub fn new(name: &str, config: OpStackConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

#[async_trait]
impl BridgeAdapter for OpStackAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn bridge_address(&self) -> Address {
        self.config.l1_bridge
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        let call = BridgeERC20ToCall {
            local_token: request.token,
            remote_token: self.config.remote_token,
            to: request.recipient,
            amount: request.amount,
            min_gas_limit: self.config.min_gas_limit,
            extra_data: Bytes::new(),
        };
        Ok(TxRequest::call(self.config.l1_bridge, call.encode()))
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        // On L2 the event names the L1 token as `remoteToken`
        let query = LogQuery::new(
            self.config.l2_bridge,
            DepositFinalizedFilter::signature(),
            observation.from_block,
        )
        .topic(1, address_topic(self.config.remote_token))
        .topic(2, address_topic(request.token));

        first_matching_log(dest, &query, observation, |event: &DepositFinalizedFilter| {
            event.to == request.recipient && event.amount == request.amount
        })
        .await
    }
}
