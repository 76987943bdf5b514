use std::env;

use clap::Parser;
use dotenv::dotenv;
use ethers::prelude::*;
use ethers::utils::format_units;
use eyre::{eyre, Result};

use wston_bridge::chain::ethers_client::connect_all;
use wston_bridge::chain::ChainClient;
use wston_bridge::configure::{load_config_from, DEFAULT_CONFIG_FILE};
use wston_bridge::logger;

#[derive(Parser)]
#[clap(author, version, about = "Latest block and bridged token balances per configured chain", long_about = None)]
struct Args {
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// Account to report balances for, defaults to the PRIVATE_KEY signer
    #[clap(long)]
    account: Option<Address>,
    #[clap(long, default_value_t = 27)]
    decimals: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let config = load_config_from(&args.config)?;
    logger::setup_logger(&config.log).map_err(|e| eyre!("Failed to set up logger: {}", e))?;

    // Only reads happen here; without a key a throwaway signer is enough
    let wallet: LocalWallet = match env::var("PRIVATE_KEY") {
        Ok(key) => key.parse()?,
        Err(_) => LocalWallet::new(&mut ethers::core::rand::thread_rng()),
    };
    let account = args.account.unwrap_or(wallet.address());
    println!("Account: {:?}", account);

    let clients = connect_all(&config.chains, &wallet, &config.rate_limit)?;

    for chain in &config.chains {
        let Some(client) = clients.get(&chain.chain_id) else {
            continue;
        };

        println!("{} (chain {})", chain.name, chain.chain_id);
        match client.block_number().await {
            Ok(block) => println!("  Latest block number: {}", block),
            Err(e) => {
                println!("  ❌ {}", e);
                continue;
            }
        }

        for bridge in config.bridges.iter().filter(|b| b.source_chain == chain.chain_id) {
            match client.get_balance(account, bridge.token).await {
                Ok(balance) => println!(
                    "  {} token {:?}: {}",
                    bridge.name,
                    bridge.token,
                    format_units(balance, args.decimals).unwrap_or_else(|_| balance.to_string())
                ),
                Err(e) => println!("  {} token {:?}: ❌ {}", bridge.name, bridge.token, e),
            }
        }
    }

    Ok(())
}
