//! Arbitrum token bridge (retryable tickets)
//!
//! Tokens are escrowed by the L1 gateway; the router forwards a retryable
//! ticket paid for with ETH call value, and the L2 gateway emits
//! `DepositFinalized` when it mints.

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::contract::{abigen, EthEvent};
use ethers::abi::AbiEncode;
use ethers::types::{Address, U256};
use serde::Deserialize;

use super::traits::{BridgeAdapter, Observation};
use super::{address_topic, first_matching_log};
use crate::chain::{ChainClient, ChainError, LogQuery, TxRef, TxRequest};
use crate::transfer::types::TransferRequest;

abigen!(
    L1GatewayRouter,
    r#"[
        function outboundTransfer(address token, address to, uint256 amount, uint256 maxGas, uint256 gasPriceBid, bytes data) payable returns (bytes)
    ]"#
);

abigen!(
    L2ArbitrumGateway,
    r#"[
        event DepositFinalized(address indexed token, address indexed from, address indexed to, uint256 amount)
    ]"#
);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArbitrumConfig {
    /// L1GatewayRouter, the deposit entry point
    pub l1_gateway_router: Address,
    /// Gateway that pulls the tokens (approval spender)
    pub l1_gateway: Address,
    /// Counterpart gateway on L2, emits `DepositFinalized`
    pub l2_gateway: Address,
    #[serde(default = "default_max_gas")]
    pub max_gas: u64,
    /// L2 gas price bid in wei
    #[serde(default = "default_gas_price_bid")]
    pub gas_price_bid: u64,
    /// Retryable submission fee in wei
    #[serde(default = "default_max_submission_cost")]
    pub max_submission_cost: u64,
}

fn default_max_gas() -> u64 {
    300_000
}

fn default_gas_price_bid() -> u64 {
    300_000_000
}

fn default_max_submission_cost() -> u64 {
    1_000_000_000_000_000
}

pub struct ArbitrumAdapter {
    name: String,
    config: ArbitrumConfig,
}

impl ArbitrumAdapter {
    pub fn new(name: &str, config: ArbitrumConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    /// ETH that must accompany the deposit: submission fee plus L2 execution
    pub fn call_value(&self) -> U256 {
        U256::from(self.config.max_submission_cost)
            + U256::from(self.config.max_gas) * U256::from(self.config.gas_price_bid)
    }
}

#[async_trait]
impl BridgeAdapter for ArbitrumAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn bridge_address(&self) -> Address {
        self.config.l1_gateway
    }

    async fn deposit(&self, request: &TransferRequest) -> Result<TxRequest, ChainError> {
        // (maxSubmissionCost, callHookData)
        let data = abi::encode(&[
            Token::Uint(U256::from(self.config.max_submission_cost)),
            Token::Bytes(Vec::new()),
        ]);

        let call = OutboundTransferCall {
            token: request.token,
            to: request.recipient,
            amount: request.amount,
            max_gas: U256::from(self.config.max_gas),
            gas_price_bid: U256::from(self.config.gas_price_bid),
            data: data.into(),
        };

        Ok(TxRequest::call(self.config.l1_gateway_router, call.encode()).with_value(self.call_value()))
    }

    async fn observe_destination(
        &self,
        request: &TransferRequest,
        observation: &Observation,
        dest: &dyn ChainClient,
    ) -> Result<Option<TxRef>, ChainError> {
        let query = LogQuery::new(
            self.config.l2_gateway,
            DepositFinalizedFilter::signature(),
            observation.from_block,
        )
        .topic(1, address_topic(request.token))
        .topic(3, address_topic(request.recipient));

        first_matching_log(dest, &query, observation, |event: &DepositFinalizedFilter| {
            event.token == request.token
                && event.to == request.recipient
                && event.amount == request.amount
        })
        .await
    }
}
