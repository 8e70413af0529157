//! # MSE2 Infrastructure Common
//!
//! Ambient infrastructure shared by the MSE2 crates:
//!
//! - **logging**: `tracing-subscriber` setup with env filters and optional JSON output
//! - **config**: TOML/JSON configuration file loading
//! - **errors**: the infrastructure error type

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_config, parse_config, ConfigFormat};
pub use errors::{InfraError, Result};
pub use logging::{setup_logging, LoggingConfig};
