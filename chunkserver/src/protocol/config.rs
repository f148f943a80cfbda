use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ip:port the QUIC listener binds
    pub addr: String,
    // name this node registers under
    pub node_name: String,
    // address other nodes reach this node at
    pub node_addr: String,
    // directory chunk payloads are stored in
    pub chunk_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: i64,
    pub etcd: EtcdConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_message_size() -> usize {
    8 * 1024 * 1024
}

fn default_heartbeat_period_secs() -> u64 {
    7
}

fn default_lease_ttl_secs() -> i64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    2
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    ensure!(
        cfg.max_message_size > cfg.chunk_size,
        "max_message_size ({}) must exceed chunk_size ({})",
        cfg.max_message_size,
        cfg.chunk_size
    );
    Ok(cfg)
}
