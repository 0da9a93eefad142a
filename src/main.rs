//! Single-process demo network.
//!
//! Funds five accounts in the genesis block, runs two miners and a posting
//! client over the simulated network, mines to the requested chain length,
//! and prints everyone's confirmed balances.
//!
//! # Usage
//! ```text
//! localnet [OPTIONS]
//! ```
//!
//! # Options
//! - `--blocks <n>`: chain length to mine to (default 8)
//! - `--zeroes <n>`: proof-of-work leading zero bits (default 15)

use goldnet::core::config::{ChainConfig, DEFAULT_POW_LEADING_ZEROES};
use goldnet::core::transaction::Output;
use goldnet::crypto::key_pair::PrivateKey;
use goldnet::network::net::Network;
use goldnet::network::simulator::SimulatedNet;
use goldnet::node::client::Client;
use goldnet::node::miner::Miner;
use goldnet::utils::log::{Level, init};
use goldnet::{info, warn};
use std::collections::HashMap;
use std::env;
use std::process;
use std::sync::Arc;

fn print_usage(program: &str) {
    eprintln!("Usage: {program} [--blocks <n>] [--zeroes <n>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --blocks <n>   chain length to mine to (default 8)");
    eprintln!("  --zeroes <n>   proof-of-work leading zero bits (default 15)");
}

#[tokio::main]
async fn main() {
    init(Level::Info);

    let args: Vec<String> = env::args().collect();
    let mut blocks: u64 = 8;
    let mut zeroes: u32 = DEFAULT_POW_LEADING_ZEROES;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            "--blocks" if i + 1 < args.len() => {
                blocks = args[i + 1].parse().unwrap_or_else(|_| {
                    eprintln!("invalid --blocks value: {}", args[i + 1]);
                    process::exit(1);
                });
                i += 2;
            }
            "--zeroes" if i + 1 < args.len() => {
                zeroes = args[i + 1].parse().unwrap_or_else(|_| {
                    eprintln!("invalid --zeroes value: {}", args[i + 1]);
                    process::exit(1);
                });
                i += 2;
            }
            other => {
                eprintln!("unknown argument: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    // One key pair per named participant
    let names = ["alice", "bob", "charlie", "minnie", "mickey"];
    let funding = [233u64, 99, 67, 400, 300];
    let keys: HashMap<&str, PrivateKey> =
        names.iter().map(|&n| (n, PrivateKey::new())).collect();

    let config = Arc::new(ChainConfig {
        pow_leading_zeroes: zeroes,
        initial_balances: names
            .iter()
            .zip(funding)
            .map(|(&n, gold)| (keys[n].public_key().address, gold))
            .collect(),
        ..ChainConfig::new()
    });

    let net = SimulatedNet::new();
    let genesis = config.make_genesis();

    let mut alice = Client::new(
        "alice",
        keys["alice"].clone(),
        genesis.clone(),
        config.clone(),
        net.clone(),
    );
    let mut alice_rx = net.register(alice.address);

    let mut minnie = Miner::new(
        "minnie",
        keys["minnie"].clone(),
        genesis.clone(),
        config.clone(),
        net.clone(),
    );
    let mut minnie_rx = net.register(minnie.client.address);

    let mut mickey = Miner::new(
        "mickey",
        keys["mickey"].clone(),
        genesis.clone(),
        config.clone(),
        net.clone(),
    );
    let mut mickey_rx = net.register(mickey.client.address);

    info!(
        "localnet: {} participants, mining to length {blocks} with {zeroes} leading zero bits",
        names.len()
    );

    // Alice pays Bob before the race starts, so the transfer lands in the
    // first mined block
    let bob_addr = keys["bob"].public_key().address;
    if let Err(e) = alice
        .post_transaction(vec![Output { amount: 40, to: bob_addr }], config.default_tx_fee)
        .await
    {
        warn!("alice cannot afford the demo transfer: {e}");
        process::exit(1);
    }

    let minnie_task = tokio::spawn(async move {
        minnie.mine_until(&mut minnie_rx, blocks).await;
        (minnie, minnie_rx)
    });
    let mickey_task = tokio::spawn(async move {
        mickey.mine_until(&mut mickey_rx, blocks).await;
        (mickey, mickey_rx)
    });

    let (mut minnie, mut minnie_rx) = minnie_task.await.expect("minnie task failed");
    let (mut mickey, mut mickey_rx) = mickey_task.await.expect("mickey task failed");

    // Let every participant finish digesting queued announcements
    loop {
        let moved = alice.drain_mailbox(&mut alice_rx).await
            + minnie.drain_mailbox(&mut minnie_rx).await
            + mickey.drain_mailbox(&mut mickey_rx).await;
        if moved == 0 {
            break;
        }
    }

    let view = &minnie.client;
    println!();
    println!(
        "chain length {} / confirmed at {}",
        view.height(),
        view.confirmed_block().chain_length
    );
    println!();
    println!("confirmed balances (minnie's view):");
    for &name in &names {
        let addr = keys[name].public_key().address;
        println!("  {:8} {:>8} gold   {}", name, view.confirmed_balance_of(addr), addr);
    }
}
