//! Server configuration, parsed from the command line.

use crate::storage::expiry::{DEFAULT_SAMPLE_SIZE, DEFAULT_THRESHOLD};
use crate::storage::ExpiryConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug, Clone)]
#[command(name = "tinykv")]
#[command(version)]
#[command(about = "A small RESP-compatible in-memory key-value server", long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between active expiry cycles
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub expiry_interval_ms: u64,

    /// Keys sampled per active expiry pass
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub expiry_sample_size: usize,

    /// Repeat a pass while more than this fraction of the sample expired
    #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_parser = parse_fraction)]
    pub expiry_threshold: f64,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(self.expiry_interval_ms),
            sample_size: self.expiry_sample_size,
            threshold: self.expiry_threshold,
        }
    }
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0 and 1"))
    }
}
