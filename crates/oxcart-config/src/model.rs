//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers used by the bootstrap wiring and API server.
//! - Defaults live here so the loader only has to handle overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolved service settings for one Oxcart process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// IP address (and interface) the API server should bind to.
    pub bind_addr: IpAddr,
    /// HTTP port the API server should bind to.
    pub http_port: u16,
    /// Directory holding the durable checkpoint logs.
    pub state_dir: PathBuf,
    /// Root the filesystem-backed object store writes under.
    pub target_root: PathBuf,
    /// Upper bound on concurrently running transfer tasks per instance.
    pub max_parallel_transfers: usize,
    /// Filter directive applied when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output format (`json` or `pretty`); empty means infer.
    pub log_format: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
            state_dir: PathBuf::from("data/state"),
            target_root: PathBuf::from("data/archive"),
            max_parallel_transfers: 8,
            log_level: "info".to_string(),
            log_format: None,
        }
    }
}
