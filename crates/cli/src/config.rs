//! Player configuration: optional file, then command-line overrides

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use mse2_infra_common::config::load_config;
use mse2_infra_common::logging::LogSettings;
use mse2_media_core::simulated::DEFAULT_SECONDS_PER_BYTE;
use mse2_media_core::BufferOptions;

use crate::catalog;

#[derive(Parser, Debug, Default)]
#[command(name = "mse2-player")]
#[command(about = "Stream media through ContainerProxy/BufferProxy against a simulated source")]
pub struct Args {
    /// TOML or JSON configuration file
    #[arg(short, long, env = "MSE2_PLAYER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Short type key (see --list)
    #[arg(short = 't', long = "type")]
    pub type_key: Option<String>,

    /// Media file to stream; synthetic bytes are used when absent
    #[arg(short, long)]
    pub src: Option<PathBuf>,

    /// Number of synthetic bytes to stream
    #[arg(long)]
    pub bytes: Option<usize>,

    /// Bytes per append
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Abort the buffer after this many appends
    #[arg(long)]
    pub abort: Option<usize>,

    /// Keyframe distance in seconds used by garbage collection
    #[arg(long)]
    pub gc: Option<f64>,

    /// Remove the buffer once playback has ended
    #[arg(long)]
    pub remove: bool,

    /// Buffer quota in bytes
    #[arg(long)]
    pub quota: Option<usize>,

    /// Simulated event pump interval in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Media seconds played per wall-clock second
    #[arg(long)]
    pub rate: Option<f64>,

    /// Log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print the command and type tables and exit
    #[arg(long)]
    pub list: bool,
}

/// Everything the player needs to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub type_key: String,
    pub src: Option<PathBuf>,
    pub synthetic_bytes: usize,
    pub chunk_size: usize,
    pub abort_after: Option<usize>,
    pub gc_seconds: Option<f64>,
    pub remove_on_end: bool,
    pub quota_bytes: Option<usize>,
    pub tick_ms: u64,
    pub playback_rate: f64,
    pub seconds_per_byte: f64,
    /// Applied with CONFIGURE right after the buffer is created
    pub buffer: BufferOptions,
    pub log: LogSettings,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            type_key: "mp4".to_string(),
            src: None,
            synthetic_bytes: 1_000_000,
            chunk_size: 64 * 1024,
            abort_after: None,
            gc_seconds: None,
            remove_on_end: false,
            quota_bytes: None,
            tick_ms: 10,
            playback_rate: 20.0,
            seconds_per_byte: DEFAULT_SECONDS_PER_BYTE,
            buffer: BufferOptions::default(),
            log: LogSettings::default(),
        }
    }
}

impl PlayerConfig {
    /// Load the configuration file named by `args`, then apply the flags
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PlayerConfig::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(key) = &args.type_key {
            self.type_key = key.clone();
        }
        if let Some(src) = &args.src {
            self.src = Some(src.clone());
        }
        if let Some(bytes) = args.bytes {
            self.synthetic_bytes = bytes;
        }
        if let Some(chunk_size) = args.chunk_size {
            self.chunk_size = chunk_size;
        }
        if args.abort.is_some() {
            self.abort_after = args.abort;
        }
        if args.gc.is_some() {
            self.gc_seconds = args.gc;
        }
        if args.quota.is_some() {
            self.quota_bytes = args.quota;
        }
        if let Some(tick_ms) = args.tick_ms {
            self.tick_ms = tick_ms;
        }
        if let Some(rate) = args.rate {
            self.playback_rate = rate;
        }
        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }
        self.remove_on_end |= args.remove;
        self.log.json |= args.json_logs;
    }

    /// Reject settings the player cannot run with
    pub fn validate(&self) -> Result<()> {
        if catalog::content_type_for(&self.type_key).is_none() {
            bail!("No recognized type '{}' (run with --list)", self.type_key);
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if self.tick_ms == 0 || !(self.playback_rate > 0.0) || !(self.seconds_per_byte > 0.0) {
            bail!("tick_ms, playback_rate and seconds_per_byte must be positive");
        }
        if let Some(gc) = self.gc_seconds {
            if !(gc > 0.0) {
                bail!("gc must be a positive number of seconds");
            }
            // Collection only starts once twice the keyframe distance has
            // played, so the quota has to hold more than that.
            if let Some(quota) = self.quota_bytes {
                if quota as f64 * self.seconds_per_byte <= 2.0 * gc {
                    bail!(
                        "quota of {} bytes holds less than twice the gc interval of {}s",
                        quota,
                        gc
                    );
                }
            }
        }
        Ok(())
    }

    pub fn content_type(&self) -> &'static str {
        catalog::content_type_for(&self.type_key).unwrap_or_default()
    }
}
