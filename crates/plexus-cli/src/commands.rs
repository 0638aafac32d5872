use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;

use plexus_crypto::{AesSealer, Sealer};
use plexus_ledger::LocalHub;
use plexus_services::{AddressRange, NodeConfig, Node, NoopInterface};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args),
        Command::Seal(args) => cmd_seal(args),
        Command::Unseal(args) => cmd_unseal(args),
        Command::Config(args) => cmd_config(args),
    }
}

fn cmd_seal(args: SealArgs) -> anyhow::Result<()> {
    let token = AesSealer::new().seal(args.message.as_bytes(), &args.key)?;
    println!("{token}");
    Ok(())
}

fn cmd_unseal(args: UnsealArgs) -> anyhow::Result<()> {
    let plaintext = AesSealer::new()
        .unseal(args.token.trim(), &args.key)
        .context("cannot unseal token")?;
    println!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = match &args.path {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let source = args
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    println!("{} {}", "#".dimmed(), source.dimmed());
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.peers >= 2, "a mesh needs at least 2 peers to allocate addresses");
    let range = AddressRange::parse(&args.address)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(simulate(args, range))
}

async fn simulate(args: SimulateArgs, range: AddressRange) -> anyhow::Result<()> {
    let hub = LocalHub::default();
    let root = tempfile::tempdir()?;
    let poll = Duration::from_millis(args.poll_ms.max(1));
    tracing::debug!(peers = args.peers, range = %range, poll_ms = args.poll_ms, "starting simulated mesh");

    println!(
        "Simulating {} peers on {}{}",
        args.peers.to_string().bold(),
        range.to_string().cyan(),
        if args.network_key.is_some() { " (sealed)" } else { "" }
    );

    let mut nodes = Vec::with_capacity(args.peers);
    for i in 1..=args.peers {
        let peer = format!("peer-{i}");
        let config = NodeConfig {
            peer_id: Some(peer.clone()),
            address: args.address.clone(),
            dhcp: true,
            lease_dir: root.path().join(&peer),
            exchange_secret: format!("{peer}-simulation"),
            network_key: args.network_key.clone(),
            healthcheck_interval: poll,
            max_interval: poll * 50,
            dhcp_max_time: poll * 50,
            dhcp_poll_interval: poll,
            sync_interval: poll * 2,
            ..NodeConfig::default()
        };
        nodes.push(Node::start(config, Arc::new(hub.transport()), Arc::new(NoopInterface))?);
    }

    let deadline = Duration::from_secs(args.timeout_secs);
    for node in &mut nodes {
        let peer = node.peer_id().clone();
        let waiter = node
            .take_lease()
            .context("node started without an allocator")?;
        let address = tokio::time::timeout(deadline, waiter.wait())
            .await
            .with_context(|| format!("{peer} got no address within {}s", args.timeout_secs))??;
        println!("  {} {} {}", "✓".green(), peer.as_str().bold(), address.to_string().yellow());
    }

    let head = nodes[0].ledger().last_block();
    println!(
        "Ledger at block {} ({}), {} entries",
        head.index.to_string().bold(),
        head.short_hash().dimmed(),
        head.len()
    );

    for node in &nodes {
        node.shutdown();
    }
    for node in nodes {
        node.join().await?;
    }
    Ok(())
}
