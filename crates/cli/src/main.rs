//! mse2-player: stream media through the MSE2 proxies
//!
//! Adds one buffer for the chosen type, appends a file (or synthetic bytes)
//! in chunks, optionally aborts and garbage-collects along the way, ends the
//! stream and plays it out against the simulated media source.

mod catalog;
mod config;
mod player;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio::task::LocalSet;

use mse2_infra_common::logging::{log_welcome, setup_logging, LoggingConfig};

use crate::config::{Args, PlayerConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.list {
        println!("{}", catalog::help_tables());
        return Ok(());
    }

    let config = PlayerConfig::resolve(&args)?;
    setup_logging(LoggingConfig::from_settings(&config.log, "mse2-player")?)?;
    log_welcome("mse2-player", env!("CARGO_PKG_VERSION"));

    let summary = LocalSet::new().run_until(player::run(config)).await?;

    println!("{}", "✅ Playback complete".green().bold());
    println!("   type:        {}", summary.content_type);
    println!(
        "   appends:     {} ({} bytes)",
        summary.appends, summary.bytes_appended
    );
    println!("   quota waits: {}", summary.quota_retries);
    println!("   gc passes:   {}", summary.gc_removals);
    println!("   playhead:    {:.3}s", summary.playhead);
    println!("   buffered:    {:?}", summary.buffered);
    if summary.aborted {
        println!("   {}", "buffer was aborted".yellow());
    }
    if summary.removed {
        println!("   buffer removed at end of playback");
    }
    Ok(())
}
