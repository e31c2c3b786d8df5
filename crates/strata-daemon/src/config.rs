//! Node configuration from the environment.
//!
//! Three variables describe the whole cluster; all are required and
//! validated at startup, and a bad value is fatal:
//!
//! - `ADDRESS` - this node's `host:port`
//! - `VIEW` - comma-separated list of every node's `host:port`
//! - `REPL_FACTOR` - target replicas per shard, `>= 1`
//!
//! The view is static for the life of the process.

use anyhow::{bail, Context};

/// Validated startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// This node's logical id and bind address.
    pub address: String,
    /// The complete initial view, as given (the oracle sorts its own copy).
    pub view: Vec<String>,
    /// Target replicas per shard.
    pub repl_factor: usize,
}

impl NodeConfig {
    /// Read and validate `ADDRESS`, `VIEW` and `REPL_FACTOR`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or invalid variable.
    pub fn from_env() -> anyhow::Result<Self> {
        let address = std::env::var("ADDRESS").context("ADDRESS not set")?;
        let view = std::env::var("VIEW").context("VIEW not set")?;
        let repl_factor = std::env::var("REPL_FACTOR").context("REPL_FACTOR not set")?;
        Self::from_parts(&address, &view, &repl_factor)
    }

    /// Validate raw configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error when the address lacks a port, the view is empty or
    /// does not contain the address, or the replication factor is not a
    /// positive integer.
    pub fn from_parts(address: &str, view: &str, repl_factor: &str) -> anyhow::Result<Self> {
        if address.is_empty() || !address.contains(':') {
            bail!("ADDRESS must be host:port, got {address:?}");
        }

        let view: Vec<String> = view
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect();
        if view.is_empty() {
            bail!("VIEW must list at least one node");
        }
        if !view.iter().any(|member| member == address) {
            bail!("VIEW does not contain this node's ADDRESS {address:?}");
        }

        let repl_factor: usize = repl_factor
            .parse()
            .with_context(|| format!("REPL_FACTOR must be an integer, got {repl_factor:?}"))?;
        if repl_factor == 0 {
            bail!("REPL_FACTOR must be >= 1");
        }

        Ok(Self {
            address: address.to_string(),
            view,
            repl_factor,
        })
    }
}
