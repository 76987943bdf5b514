use std::collections::HashMap;
use std::env;
use std::fs;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::prelude::*;
use ethers::utils::parse_units;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

use wston_bridge::chain::ethers_client::connect_all;
use wston_bridge::chain::ChainClient;
use wston_bridge::configure::{load_config_from, AppConfig, DEFAULT_CONFIG_FILE};
use wston_bridge::logger::setup_logger;
use wston_bridge::transfer::{
    build_adapter, BridgeCoordinator, ChainId, RequestId, Route, TransferDb, TransferRequest, TransferResult,
    TransferState, TransferWorker, WrapSource,
};

/// WSTON has 27 decimals
const DEFAULT_DECIMALS: u32 = 27;

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Move tokens between L1 and L2 over the configured bridges")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start one transfer and wait until it completes or fails
    Transfer {
        /// Bridge name from the config file
        #[arg(long)]
        bridge: String,
        /// Amount in whole tokens (e.g. 12.5)
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = DEFAULT_DECIMALS)]
        decimals: u32,
        /// Receiver on the destination chain, defaults to the signer
        #[arg(long)]
        recipient: Option<Address>,
    },
    /// Run every transfer listed in a JSON file concurrently
    Batch {
        #[arg(long)]
        file: String,
    },
    /// Continue unfinished transfers from their last recorded stage
    Resume {
        #[arg(long)]
        id: Option<RequestId>,
    },
    /// Print persisted transfer state
    Status {
        #[arg(long)]
        id: Option<RequestId>,
    },
    /// Look again for destination arrivals after a destination timeout
    Recheck {
        #[arg(long)]
        id: Option<RequestId>,
    },
    /// Run the background worker until Ctrl-C
    Serve,
    /// Turn L1 TON (or WTON with --wton) into WSTON ready to be bridged
    Wrap {
        /// Amount in whole tokens of the source token
        #[arg(long)]
        amount: String,
        #[arg(long)]
        wton: bool,
    },
}

/// One entry of a batch file
#[derive(Debug, Deserialize)]
struct BatchEntry {
    bridge: String,
    amount: String,
    #[serde(default)]
    decimals: Option<u32>,
    #[serde(default)]
    recipient: Option<Address>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = load_config_from(&cli.config)
        .wrap_err_with(|| format!("Failed to load configuration from {}", cli.config))?;
    setup_logger(&config.log).map_err(|e| eyre!("Failed to initialize logger: {}", e))?;

    let db = Arc::new(TransferDb::open(&config.db_path).map_err(|e| eyre!("{:#}", e))?);

    if let Commands::Status { id } = &cli.command {
        return print_status(&db, *id);
    }

    let wallet: LocalWallet = env::var("PRIVATE_KEY")
        .wrap_err("PRIVATE_KEY must be set")?
        .parse()
        .wrap_err("PRIVATE_KEY is not a valid private key")?;
    log::info!("Signer: {:?}", wallet.address());

    let clients = connect_all(&config.chains, &wallet, &config.rate_limit)?;
    let worker = Arc::new(build_worker(&config, &clients, db)?);

    match cli.command {
        Commands::Transfer {
            bridge,
            amount,
            decimals,
            recipient,
        } => {
            let request = new_request(&config, &bridge, &amount, decimals, recipient.unwrap_or(wallet.address()))?;
            let result = run_one(&worker, request).await?;
            print_result(&result);
        }
        Commands::Batch { file } => {
            let content = fs::read_to_string(&file).wrap_err_with(|| format!("Failed to read {}", file))?;
            let entries: Vec<BatchEntry> = serde_json::from_str(&content)?;

            let mut requests = Vec::with_capacity(entries.len());
            for entry in entries {
                requests.push(new_request(
                    &config,
                    &entry.bridge,
                    &entry.amount,
                    entry.decimals.unwrap_or(DEFAULT_DECIMALS),
                    entry.recipient.unwrap_or(wallet.address()),
                )?);
            }

            println!("Starting {} transfers...", requests.len());
            for result in worker.run_batch(requests).await {
                print_result(&result);
            }
        }
        Commands::Resume { id: Some(id) } => {
            let request = worker
                .coordinator()
                .db()
                .request(id)
                .map_err(|e| eyre!("{:#}", e))?
                .ok_or_else(|| eyre!("Transfer {} not found", id))?;
            let (_, task) = worker.spawn_resume(&request)?;
            print_result(&task.await??);
        }
        Commands::Resume { id: None } => {
            let results = worker.resume_unfinished().await?;
            println!("Resumed {} transfers", results.len());
            for result in results {
                print_result(&result);
            }
        }
        Commands::Recheck { id: Some(id) } => {
            let state = worker.recheck_destination(id).await?;
            print_state(&state);
        }
        Commands::Recheck { id: None } => {
            let states = worker.recheck_timed_out().await?;
            let arrived = states.iter().filter(|s| s.has_arrived()).count();
            println!("Rechecked {} transfers, {} arrived", states.len(), arrived);
            for state in states {
                print_state(&state);
            }
        }
        Commands::Serve => {
            let task = worker.clone().spawn();
            tokio::signal::ctrl_c().await?;

            // Accepted cancellations are already persisted as failed
            let accepted = worker.cancel_all();
            println!(
                "Stopping: {} transfers cancelled, {} in flight will resume on next start",
                accepted,
                worker.active_transfers().len().saturating_sub(accepted)
            );
            task.abort();
        }
        Commands::Wrap { amount, wton } => {
            let settings = config
                .wston
                .as_ref()
                .ok_or_else(|| eyre!("No wston section in {}", cli.config))?;
            let client = clients
                .get(&settings.chain_id)
                .ok_or_else(|| eyre!("chain {} is not connected", settings.chain_id))?;
            let source = if wton { WrapSource::Wton } else { WrapSource::Ton };
            let amount: U256 = parse_units(&amount, source.decimals())
                .wrap_err_with(|| format!("Invalid amount '{}'", amount))?
                .into();

            let receipt = worker
                .coordinator()
                .wrap_to_wston(client.as_ref(), settings, source, amount)
                .await?;
            println!("✅ Wrapped");
            println!("  approval:    {}", receipt.approval_tx);
            println!("  deposit:     {}", receipt.deposit_tx);
        }
        Commands::Status { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}

fn build_worker(
    config: &AppConfig,
    clients: &HashMap<ChainId, Arc<dyn ChainClient>>,
    db: Arc<TransferDb>,
) -> Result<TransferWorker> {
    let coordinator = Arc::new(BridgeCoordinator::new(db, config.coordinator_config()));
    let mut worker = TransferWorker::new(coordinator, config.worker.clone());

    for bridge in &config.bridges {
        let client = |chain: ChainId| {
            clients
                .get(&chain)
                .cloned()
                .ok_or_else(|| eyre!("bridge '{}': chain {} is not connected", bridge.name, chain))
        };
        let route = Route {
            adapter: build_adapter(bridge),
            source: client(bridge.source_chain)?,
            dest: client(bridge.dest_chain)?,
        };
        if worker.route(bridge.source_chain, bridge.dest_chain).is_ok() {
            log::warn!(
                "bridge '{}' replaces an earlier route {} -> {}",
                bridge.name,
                bridge.source_chain,
                bridge.dest_chain
            );
        }
        worker = worker.with_route(bridge.source_chain, bridge.dest_chain, route);
    }

    Ok(worker)
}

fn new_request(
    config: &AppConfig,
    bridge: &str,
    amount: &str,
    decimals: u32,
    recipient: Address,
) -> Result<TransferRequest> {
    let route = config
        .bridge(bridge)
        .ok_or_else(|| eyre!("Unknown bridge '{}'", bridge))?;
    let amount: U256 = parse_units(amount, decimals)
        .wrap_err_with(|| format!("Invalid amount '{}'", amount))?
        .into();

    Ok(TransferRequest::new(
        route.source_chain,
        route.dest_chain,
        route.token,
        amount,
        recipient,
    ))
}

/// Drive one transfer; Ctrl-C asks for cancellation, which only succeeds
/// while nothing is in flight
async fn run_one(worker: &Arc<TransferWorker>, request: TransferRequest) -> Result<TransferResult> {
    println!("Transfer {} started", request.id);
    let (handle, mut task) = worker.submit(request)?;

    let result = loop {
        tokio::select! {
            joined = &mut task => break joined?,
            _ = tokio::signal::ctrl_c() => match worker.cancel(handle.request_id()) {
                Ok(()) => println!("Cancellation accepted, stopping before the next submission"),
                Err(e) => println!("{}", e),
            },
        }
    };

    Ok(result)
}

fn print_status(db: &TransferDb, id: Option<RequestId>) -> Result<()> {
    match id {
        Some(id) => {
            let history = db.history(id).map_err(|e| eyre!("{:#}", e))?;
            if history.is_empty() {
                println!("❌ Transfer {} not found", id);
            }
            for state in history {
                print_state(&state);
            }
        }
        None => {
            let transfers = db.all().map_err(|e| eyre!("{:#}", e))?;
            println!("{} transfers", transfers.len());
            for (request, state) in transfers {
                println!(
                    "  {} chain {} -> chain {} amount={} stage={}",
                    request.id, request.source_chain, request.dest_chain, request.amount, state.stage
                );
            }
        }
    }
    Ok(())
}

fn print_result(result: &TransferResult) {
    match result {
        TransferResult::Completed(_) => println!("✅ Completed"),
        TransferResult::Failed(_) => println!("❌ Failed"),
    }
    print_state(result.state());
}

fn print_state(state: &TransferState) {
    println!("  id:          {}", state.request_id);
    println!("  stage:       {}", state.stage);
    if let Some(tx) = state.approval_ref() {
        println!("  approval:    {}", tx);
    }
    if let Some(tx) = state.deposit_ref() {
        println!("  deposit:     {}", tx);
    }
    if let Some(tx) = state.destination_tx {
        println!("  destination: {}", tx);
    }
    if let Some(failure) = &state.failure {
        println!("  failed in:   {} ({})", failure.stage, failure.kind);
        println!("  reason:      {}", failure.message);
    }
}
