//! Blockcache CLI - a small command-line front-end for the block manager.
//!
//! This binary provides commands for observing the block manager's behavior
//! without writing a test harness:
//! - `demo`: runs the canonical S1-S6 end-to-end scenarios against a real
//!   `BlockManager` and logs every match/allocation decision.

mod demo;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blockcache")]
#[command(about = "KV-cache block manager toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the S1-S6 scenarios against a real BlockManager and log the outcome of each.
    Demo {
        /// Number of physical blocks in the pool.
        #[arg(long, default_value_t = 16)]
        num_blocks: u32,
        /// Tokens held per physical block.
        #[arg(long, default_value_t = 4)]
        block_size: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { num_blocks, block_size } => {
            demo::run(num_blocks, block_size)?;
        }
    }

    Ok(())
}
