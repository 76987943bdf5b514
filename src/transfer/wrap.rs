//! L1 step that turns TON (or WTON) into WSTON before it is bridged
//!
//! Two plain transactions on the L1: approve the WSTON contract, then
//! `depositWTONAndGetWSTON`. Nothing is persisted; a failed wrap leaves at
//! most an allowance behind and is simply run again.

use ethers::abi::{self, Token};
use ethers::types::{Address, U256};
use ethers::utils::id;
use serde::Deserialize;

use crate::chain::erc20::approve_call;
use crate::chain::{retry_transient, ChainClient, TxRef, TxRequest};
use crate::transfer::coordinator::BridgeCoordinator;
use crate::transfer::errors::TransferError;
use crate::transfer::types::ChainId;

const DEPOSIT_SIGNATURE: &str = "depositWTONAndGetWSTON(uint256,bool)";

/// Gas limit the WSTON deposit is sent with; estimation undershoots it
const DEPOSIT_GAS_LIMIT: u64 = 15_000_000;

/// WSTON deployment on the L1
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WstonSettings {
    pub chain_id: ChainId,
    pub ton: Address,
    pub wton: Address,
    /// WSTON proxy: approval spender and deposit target
    pub wston: Address,
}

/// Token handed to the WSTON contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapSource {
    Ton,
    Wton,
}

impl WrapSource {
    /// Token decimals (TON 18, WTON 27)
    pub fn decimals(&self) -> u32 {
        match self {
            WrapSource::Ton => 18,
            WrapSource::Wton => 27,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapReceipt {
    pub approval_tx: TxRef,
    pub deposit_tx: TxRef,
}

/// `depositWTONAndGetWSTON(amount, token)`; `token` is true for TON
pub fn deposit_call(wston: Address, amount: U256, source: WrapSource) -> TxRequest {
    let mut data = id(DEPOSIT_SIGNATURE).to_vec();
    data.extend(abi::encode(&[
        Token::Uint(amount),
        Token::Bool(source == WrapSource::Ton),
    ]));
    TxRequest::call(wston, data).with_gas_limit(U256::from(DEPOSIT_GAS_LIMIT))
}

impl BridgeCoordinator {
    /// Approve the WSTON contract and deposit `amount` of TON or WTON for WSTON.
    ///
    /// Each transaction is waited on with the usual confirmation depth and
    /// timeout before the next one is sent.
    pub async fn wrap_to_wston(
        &self,
        client: &dyn ChainClient,
        settings: &WstonSettings,
        source: WrapSource,
        amount: U256,
    ) -> Result<WrapReceipt, TransferError> {
        if amount.is_zero() {
            return Err(TransferError::InvalidRequest("amount must be greater than 0".to_string()));
        }
        if client.chain_id() != settings.chain_id {
            return Err(TransferError::InvalidRequest(format!(
                "WSTON lives on chain {}, client is on chain {}",
                settings.chain_id,
                client.chain_id()
            )));
        }

        let token = match source {
            WrapSource::Ton => settings.ton,
            WrapSource::Wton => settings.wton,
        };
        let owner = client.sender();
        let balance = retry_transient(&self.config().retry, "get_balance", move || {
            client.get_balance(owner, token)
        })
        .await
        .map_err(TransferError::approval)?;
        if balance < amount {
            return Err(TransferError::Approval(format!(
                "insufficient balance: {:?} holds {} of {:?}, needs {}",
                owner, balance, source, amount
            )));
        }

        let approval_tx = self
            .send_now(client, &approve_call(token, settings.wston, amount))
            .await
            .map_err(TransferError::approval)?;
        log::info!("wrap: approval {} sent", approval_tx);
        self.wait_for_confirmations(client, approval_tx, TransferError::approval).await?;

        let deposit_tx = self
            .send_now(client, &deposit_call(settings.wston, amount, source))
            .await
            .map_err(TransferError::deposit)?;
        log::info!("wrap: deposit {} sent", deposit_tx);
        self.wait_for_confirmations(client, deposit_tx, TransferError::deposit).await?;

        Ok(WrapReceipt {
            approval_tx,
            deposit_tx,
        })
    }
}
