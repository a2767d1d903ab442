pub mod config;
pub mod types;

pub use config::{Config, MIN_INTERVAL_MINUTES};
pub use types::*;
