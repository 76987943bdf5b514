//! zkSync Era ERC-20 bridge
//!
//! The deposit is an L1 -> L2 priority transaction; its base cost is paid
//! in ETH as call value. The L2 bridge emits `FinalizeDeposit` on mint.

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::contract::{abigen, EthEvent};
use ethers::types::{Address, U256};
use serde::Deserialize;

use super::traits::{BridgeAdapter, Observation};
use super::{address_topic, first_matching_log};
use crate::chain::{ChainClient, ChainError, LogQuery, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

abigen!(
    L1Erc20Bridge,
    r#"[
        function deposit(address receiver, address token, uint256 amount, uint256 gasLimit, uint256 gasPerPubdataByte, address refundRecipient) payable returns (bytes32)
    ]"#
);

abigen!(
    L2SharedBridge,
    r#"[
        event FinalizeDeposit(address indexed sender, address indexed receiver, address indexed token, uint256 amount)
    ]"#
);

/// Required by the bootloader for L1 -> L2 transactions
pub const REQUIRED_L2_GAS_PRICE_PER_PUBDATA: u64 = 800;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZkSyncConfig {
    /// L1 ERC-20 bridge (approval spender and deposit target)
    pub l1_bridge: Address,
    /// L2 shared bridge, emits `FinalizeDeposit`
    pub l2_bridge: Address,
    /// L2 token, when known; otherwise any token is accepted
    #[serde(default)]
    pub l2_token: Option<Address>,
    #[serde(default = "default_l2_tx_gas_limit")]
    pub l2_tx_gas_limit: u64,
    #[serde(default = "default_gas_per_pubdata")]
    pub l2_tx_gas_per_pubdata_byte: u64,
    /// Priority transaction base cost, in wei
    pub l2_base_cost_wei: u64,
    /// Zero address refunds the sender
    #[serde(default)]
    pub refund_recipient: Option<Address>,
}

fn default_l2_tx_gas_limit() -> u64 {
    800_000
}

fn default_gas_per_pubdata() -> u64 {
    REQUIRED_L2_GAS_PRICE_PER_PUBDATA
}

pub struct ZkSyncAdapter {
    name: String,
    config: ZkSyncConfig,
}

impl ZkSyncAdapter {
    pub fn new(name: &str, config: ZkSyncConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

#[async_trait]
impl BridgeAdapter for ZkSyncAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn bridge_address(&self) -> Address {
        self.config.l1_bridge
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        let call = DepositCall {
            receiver: request.recipient,
            token: request.token,
            amount: request.amount,
            gas_limit: U256::from(self.config.l2_tx_gas_limit),
            gas_per_pubdata_byte: U256::from(self.config.l2_tx_gas_per_pubdata_byte),
            refund_recipient: self.config.refund_recipient.unwrap_or_default(),
        };
        Ok(TxRequest::call(self.config.l1_bridge, call.encode())
            .with_value(U256::from(self.config.l2_base_cost_wei)))
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        let mut query = LogQuery::new(
            self.config.l2_bridge,
            FinalizeDepositFilter::signature(),
            observation.from_block,
        )
        .topic(2, address_topic(request.recipient));
        if let Some(token) = self.config.l2_token {
            query = query.topic(3, address_topic(token));
        }

        first_matching_log(dest, &query, observation, |event: &FinalizeDepositFilter| {
            event.receiver == request.recipient && event.amount == request.amount
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainClient, ObservedLog};
    use crate::transfer::types::ChainId;
    use ethers::abi::{self, AbiDecode, Token};
    use ethers::types::H256;

    fn config() -> ZkSyncConfig {
        ZkSyncConfig {
            l1_bridge: Address::from_low_u64_be(0x1e),
            l2_bridge: Address::from_low_u64_be(0x2e),
            l2_token: Some(Address::from_low_u64_be(0x2f)),
            l2_tx_gas_limit: 800_000,
            l2_tx_gas_per_pubdata_byte: 800,
            l2_base_cost_wei: 123_456,
            refund_recipient: None,
        }
    }

    fn request() -> TransferRequest {
        TransferRequest::new(
            ChainId(11155111),
            ChainId(300),
            Address::from_low_u64_be(0xaa),
            U256::from(1_000u64),
            Address::from_low_u64_be(0xbb),
        )
    }

    #[tokio::test]
    async fn test_deposit_pays_base_cost() {
        let adapter = ZkSyncAdapter::new("zksync", config());
        let req = request();
        let tx = adapter.deposit(&req).await.unwrap();

        assert_eq!(tx.to, Address::from_low_u64_be(0x1e));
        assert_eq!(tx.value, U256::from(123_456u64));

        let call = DepositCall::decode(&tx.data).unwrap();
        assert_eq!(call.receiver, req.recipient);
        assert_eq!(call.token, req.token);
        assert_eq!(call.refund_recipient, Address::zero());
    }

    #[tokio::test]
    async fn test_observe_requires_configured_l2_token() {
        let adapter = ZkSyncAdapter::new("zksync", config());
        let dest = MockChainClient::new(ChainId(300));
        let req = request();
        let observation = Observation::new(TxRef(H256::from_low_u64_be(1)), 0);

        let log = |token: Address, block: u64| ObservedLog {
            tx: TxRef(H256::from_low_u64_be(block)),
            block_number: block,
            topics: vec![
                FinalizeDepositFilter::signature(),
                address_topic(Address::from_low_u64_be(0x5c5c)),
                address_topic(req.recipient),
                address_topic(token),
            ],
            data: abi::encode(&[Token::Uint(req.amount)]).into(),
        };

        dest.push_log(Address::from_low_u64_be(0x2e), log(Address::from_low_u64_be(0x99), 3));
        assert_eq!(adapter.observe_destination(&req, &observation, &dest).await, Ok(None));

        dest.push_log(Address::from_low_u64_be(0x2e), log(Address::from_low_u64_be(0x2f), 4));
        assert_eq!(
            adapter.observe_destination(&req, &observation, &dest).await,
            Ok(Some(TxRef(H256::from_low_u64_be(4))))
        );
    }
}
