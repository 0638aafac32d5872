use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "plexus",
    about = "Plexus: decentralized coordination over a replicated ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run an in-process mesh and let its peers allocate addresses
    Simulate(SimulateArgs),
    /// Seal a message with a key
    Seal(SealArgs),
    /// Unseal a token with a key
    Unseal(UnsealArgs),
    /// Show the effective node configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of peers on the mesh
    #[arg(short, long, default_value_t = 3)]
    pub peers: usize,
    /// Allocator poll interval in milliseconds
    #[arg(long, default_value_t = 200)]
    pub poll_ms: u64,
    /// Range to allocate from
    #[arg(long, default_value = "10.1.0.1/24")]
    pub address: String,
    /// Seal ledger traffic with this key
    #[arg(long)]
    pub network_key: Option<String>,
    /// Give up after this many seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

#[derive(Args)]
pub struct SealArgs {
    #[arg(short, long)]
    pub key: String,
    pub message: String,
}

#[derive(Args)]
pub struct UnsealArgs {
    #[arg(short, long)]
    pub key: String,
    pub token: String,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration file; defaults apply when omitted
    #[arg(long)]
    pub path: Option<PathBuf>,
}
