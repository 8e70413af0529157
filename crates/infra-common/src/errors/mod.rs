pub mod types;

pub use types::{InfraError, Result};
