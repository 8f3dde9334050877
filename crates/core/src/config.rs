//! Runtime configuration.
//!
//! Loaded from `<config_dir>/ember/config.json` (camelCase JSON). Every field
//! has a default, so an empty object or a missing file yields a usable config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ember_runtime::{Result, TrustPolicy};
use serde::{Deserialize, Serialize};

use crate::route::EchoPolicy;

pub const CONFIG_DIR_NAME: &str = "ember";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const ACCOUNT_FILE_NAME: &str = "account.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
	/// Name reported to the host in `pathChange` envelopes.
	pub app_name: String,
	/// Pre-supplied session identifier. Present when the host launched us (hosted mode).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	/// Origins whose envelopes are trusted. Empty allows any.
	pub trusted_origins: Vec<String>,
	/// Default scopes requested when a caller names none.
	pub scopes: Vec<String>,
	/// Tokens expiring within this window are refreshed before use.
	pub token_safety_margin_secs: u64,
	/// How long a context request waits for the host.
	pub context_timeout_ms: u64,
	pub query_ttl_secs: u64,
	/// Unobserved cache entries idle this long are collected.
	pub gc_after_secs: u64,
	pub echo_policy: EchoPolicy,
	/// Start interactive login when a token is needed and nobody is signed in.
	pub interactive_on_demand: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credentials_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			app_name: "ember".to_string(),
			session_id: None,
			trusted_origins: Vec::new(),
			scopes: Vec::new(),
			token_safety_margin_secs: 60,
			context_timeout_ms: 10_000,
			query_ttl_secs: 300,
			gc_after_secs: 300,
			echo_policy: EchoPolicy::default(),
			interactive_on_demand: true,
			credentials_path: None,
		}
	}
}

impl RuntimeConfig {
	/// Reads a config file. Missing fields take their defaults.
	pub fn load(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)?;
		let config = serde_json::from_str(&content)?;
		tracing::debug!(path = %path.display(), "Loaded runtime config");
		Ok(config)
	}

	/// Like [`load`](Self::load), but a missing file yields the defaults.
	pub fn load_or_default(path: &Path) -> Result<Self> {
		if path.exists() {
			Self::load(path)
		} else {
			tracing::debug!(path = %path.display(), "No config file, using defaults");
			Ok(Self::default())
		}
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, serde_json::to_string_pretty(self)?)?;
		Ok(())
	}

	/// `<config_dir>/ember/config.json`, if the platform has a config dir.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
	}

	/// Configured credential file, else `<config_dir>/ember/account.json`.
	pub fn credentials_path(&self) -> Option<PathBuf> {
		self.credentials_path
			.clone()
			.or_else(|| dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(ACCOUNT_FILE_NAME)))
	}

	pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
		self.app_name = app_name.into();
		self
	}

	pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.scopes = scopes.into_iter().map(Into::into).collect();
		self
	}

	pub fn is_hosted(&self) -> bool {
		self.session_id.is_some()
	}

	pub fn trust_policy(&self) -> TrustPolicy {
		TrustPolicy::from_origins(self.trusted_origins.iter().cloned())
	}

	pub fn token_safety_margin(&self) -> Duration {
		Duration::from_secs(self.token_safety_margin_secs)
	}

	pub fn context_timeout(&self) -> Duration {
		Duration::from_millis(self.context_timeout_ms)
	}

	pub fn query_ttl(&self) -> Duration {
		Duration::from_secs(self.query_ttl_secs)
	}

	pub fn gc_after(&self) -> Duration {
		Duration::from_secs(self.gc_after_secs)
	}
}
