//! Process configuration.
//!
//! `AppConfig` is read from a JSON file once at start-up. Everything below the top-level names
//! carries defaults so a minimal file only has to name the network, the client and the gateway.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file when no CLI argument is given.
pub const CONFIG_ENV_VAR: &str = "MIRROR_SYNC_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub network_name: String,
	pub client_name: String,
	pub gateway: GatewayConfig,
	#[serde(default)]
	pub endpoints: NetworkEndpoints,
	#[serde(default)]
	pub sync: SyncConfig,
	#[serde(default)]
	pub notifications: NotificationConfig,
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	/// Journal records written before the mirror is compacted into its snapshot file
	#[serde(default = "default_compact_every")]
	pub compact_every: usize,
}

/// Ledger gateway endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
	pub http_url: String,
	pub ws_url: String,
	#[serde(default = "default_request_timeout")]
	pub request_timeout_secs: u64,
}

/// Statically configured endpoints. These take precedence over discovered ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkEndpoints {
	#[serde(default)]
	pub peers: BTreeMap<String, PeerEndpoint>,
	#[serde(default)]
	pub orderers: BTreeMap<String, OrdererEndpointConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
	pub url: String,
	#[serde(default)]
	pub event_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdererEndpointConfig {
	pub url: String,
}

/// Timings of the sync engine and its supervisor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Delay between a subscription connecting and its first backfill pass
	#[serde(deserialize_with = "duration_from_secs")]
	pub settle_delay: Duration,
	/// Delay before deferred channel, topology and chaincode refreshes run
	#[serde(deserialize_with = "duration_from_secs")]
	pub discovery_delay: Duration,
	/// Delay between engine start and the first connection check
	#[serde(deserialize_with = "duration_from_secs")]
	pub initial_check_delay: Duration,
	/// Period of the driver that backfills and reconnects channels
	#[serde(deserialize_with = "duration_from_secs")]
	pub backfill_interval: Duration,
	/// Period after which the supervisor rebuilds the whole engine
	#[serde(deserialize_with = "duration_from_secs")]
	pub rebuild_interval: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			settle_delay: Duration::from_secs(5),
			discovery_delay: Duration::from_secs(10),
			initial_check_delay: Duration::from_secs(1),
			backfill_interval: Duration::from_secs(60),
			rebuild_interval: Duration::from_secs(60 * 60),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
	#[serde(default)]
	pub webhook_url: Option<String>,
}

fn default_data_dir() -> PathBuf {
	PathBuf::from("./data")
}

fn default_compact_every() -> usize {
	10_000
}

fn default_request_timeout() -> u64 {
	30
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read config file {path:?}: {source}")]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Invalid config: {0}")]
	Parse(#[from] serde_json::Error),
}

impl AppConfig {
	/// Path of the configuration file: first CLI argument, then the environment, then the default.
	pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
		cli_arg
			.or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
			.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
			.into()
	}

	pub async fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path)
			.await
			.map_err(|source| ConfigError::Read {
				path: path.to_path_buf(),
				source,
			})?;
		Self::from_json(&content)
	}

	pub fn from_json(content: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(content)?)
	}
}
