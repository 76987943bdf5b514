//! JSON-RPC chain client backed by ethers
//!
//! Signs locally with a `LocalWallet` and talks to the node over HTTP.

use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider, ProviderError, RpcError},
    types::transaction::eip2718::TypedTransaction,
    utils::keccak256,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::erc20::Erc20Token;
use super::rate_limit::{RateLimitConfig, RateLimitedClient};
use super::{ChainClient, ChainError, LogQuery, ObservedLog, PendingTx, TxRef, TxRequest};
use crate::configure::ChainSettings;
use crate::transfer::types::ChainId;

/// Messages nodes return when they already hold the exact transaction
const ALREADY_KNOWN: [&str; 3] = ["already known", "known transaction", "already imported"];

pub struct EthersChainClient {
    chain_id: ChainId,
    provider: Arc<Provider<Http>>,
    wallet: LocalWallet,
    /// Next nonce to hand out; `None` forces a refresh from the node
    next_nonce: Mutex<Option<U256>>,
}

impl EthersChainClient {
    pub fn new(rpc_url: &str, chain_id: ChainId, wallet: LocalWallet) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Network(format!("Invalid RPC url {}: {}", rpc_url, e)))?;

        Ok(Self {
            chain_id,
            provider: Arc::new(provider),
            wallet: wallet.with_chain_id(chain_id.as_u64()),
            next_nonce: Mutex::new(None),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

}

/// JSON-RPC error responses are the node refusing the transaction;
/// anything else (transport, serialization) is treated as transient.
fn classify_write_error(err: ProviderError) -> ChainError {
    match RpcError::as_error_response(&err) {
        Some(rpc) => ChainError::Rejected(rpc.message.clone()),
        None => ChainError::Network(err.to_string()),
    }
}

fn read_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::Network(err.to_string())
}

fn is_already_known(message: &str) -> bool {
    let lower = message.to_lowercase();
    ALREADY_KNOWN.iter().any(|m| lower.contains(m))
}

#[async_trait]
impl ChainClient for EthersChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn sender(&self) -> Address {
        self.wallet.address()
    }

    /// Nonces are handed out from a local cache. Callers that sign several
    /// transactions for one account must broadcast each before signing the
    /// next, and call `reset_nonce` when one is dropped; otherwise a rejected
    /// nonce leaves every later one stuck behind a gap.
    async fn prepare(&self, tx: &TxRequest) -> Result<PendingTx, ChainError> {
        // Held until the nonce is consumed so concurrent transfers from the
        // same account never sign with the same nonce
        let mut next_nonce = self.next_nonce.lock().await;

        let nonce = match *next_nonce {
            Some(n) => n,
            None => self
                .provider
                .get_transaction_count(self.sender(), Some(BlockNumber::Pending.into()))
                .await
                .map_err(read_error)?,
        };

        let mut request = Eip1559TransactionRequest::new()
            .from(self.sender())
            .to(tx.to)
            .data(tx.data.clone())
            .value(tx.value)
            .nonce(nonce)
            .chain_id(self.chain_id.as_u64());
        if let Some(gas) = tx.gas_limit {
            request = request.gas(gas);
        }

        let mut typed: TypedTransaction = request.into();
        self.provider
            .fill_transaction(&mut typed, None)
            .await
            .map_err(classify_write_error)?;

        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| ChainError::Rejected(format!("Signing failed: {}", e)))?;

        let raw = typed.rlp_signed(&signature);
        let hash = TxRef(H256::from(keccak256(&raw)));
        *next_nonce = Some(nonce + 1);

        log::debug!(
            "[chain {}] prepared tx {} (nonce={}, to={:?})",
            self.chain_id,
            hash,
            nonce,
            tx.to
        );

        Ok(PendingTx { hash, raw })
    }

    async fn submit(&self, tx: &PendingTx) -> Result<TxRef, ChainError> {
        match self.provider.send_raw_transaction(tx.raw.clone()).await {
            Ok(pending) => Ok(TxRef(pending.tx_hash())),
            Err(e) => match RpcError::as_error_response(&e) {
                Some(rpc) if is_already_known(&rpc.message) => {
                    log::info!("[chain {}] tx {} already known to node", self.chain_id, tx.hash);
                    Ok(tx.hash)
                }
                Some(rpc) => {
                    let message = rpc.message.clone();
                    // Our cached nonce is no longer trustworthy
                    self.reset_nonce().await;
                    Err(ChainError::Rejected(message))
                }
                None => Err(ChainError::Network(e.to_string())),
            },
        }
    }

    async fn reset_nonce(&self) {
        *self.next_nonce.lock().await = None;
    }

    async fn get_confirmations(&self, tx: TxRef) -> Result<u64, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx.as_h256())
            .await
            .map_err(read_error)?;

        let Some(receipt) = receipt else {
            return Ok(0);
        };

        if receipt.status == Some(U64::zero()) {
            return Err(ChainError::Rejected(format!("Transaction {} reverted", tx)));
        }

        let Some(mined_at) = receipt.block_number else {
            return Ok(0);
        };

        let head = self.provider.get_block_number().await.map_err(read_error)?;
        Ok(head.as_u64().saturating_sub(mined_at.as_u64()) + 1)
    }

    async fn get_balance(&self, account: Address, token: Address) -> Result<U256, ChainError> {
        let erc20 = Erc20Token::new(token, self.provider.clone());
        erc20.balance_of(account).call().await.map_err(read_error)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(read_error)
    }

    async fn find_logs(&self, query: &LogQuery) -> Result<Vec<ObservedLog>, ChainError> {
        let mut filter = Filter::new()
            .address(query.address)
            .topic0(query.topic0)
            .from_block(query.from_block);
        if let Some(t) = query.topics[0] {
            filter = filter.topic1(t);
        }
        if let Some(t) = query.topics[1] {
            filter = filter.topic2(t);
        }
        if let Some(t) = query.topics[2] {
            filter = filter.topic3(t);
        }

        let logs = self.provider.get_logs(&filter).await.map_err(read_error)?;

        Ok(logs
            .into_iter()
            .filter(|log| log.removed != Some(true))
            .filter_map(|log| {
                Some(ObservedLog {
                    tx: TxRef(log.transaction_hash?),
                    block_number: log.block_number?.as_u64(),
                    topics: log.topics,
                    data: log.data,
                })
            })
            .collect())
    }
}

/// Connect to every configured chain with one signer, each endpoint behind
/// its own rate limiter.
pub fn connect_all(
    chains: &[ChainSettings],
    wallet: &LocalWallet,
    rate_limit: &RateLimitConfig,
) -> Result<HashMap<ChainId, Arc<dyn ChainClient>>, ChainError> {
    let mut clients: HashMap<ChainId, Arc<dyn ChainClient>> = HashMap::new();

    for chain in chains {
        let client = EthersChainClient::new(&chain.rpc_url, chain.chain_id, wallet.clone())?;
        let limited = RateLimitedClient::shared(client, chain.rate_limit.as_ref().unwrap_or(rate_limit));
        log::info!("Connected chain {} ({}) via {}", chain.name, chain.chain_id, chain.rpc_url);
        clients.insert(chain.chain_id, limited);
    }

    Ok(clients)
}
