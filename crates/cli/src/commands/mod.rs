mod config;
mod run;

use std::path::Path;

use anyhow::{Context, Result};
use ember::RuntimeConfig;

use crate::cli::{Cli, Commands, OverrideArgs};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Run(args) => {
			let config = resolve_config(cli.config.as_deref(), &args.overrides)?;
			run::execute(config, args).await
		}
		Commands::Config(overrides) => {
			let config = resolve_config(cli.config.as_deref(), &overrides)?;
			config::execute(&config)
		}
	}
}

/// Loads the config file (explicit path or the default location) and applies
/// command-line overrides on top.
pub fn resolve_config(path: Option<&Path>, overrides: &OverrideArgs) -> Result<RuntimeConfig> {
	let mut config = match path {
		Some(path) => {
			RuntimeConfig::load(path).with_context(|| format!("failed to load config from {}", path.display()))?
		}
		None => match RuntimeConfig::default_path() {
			Some(path) => RuntimeConfig::load_or_default(&path)
				.with_context(|| format!("failed to load config from {}", path.display()))?,
			None => RuntimeConfig::default(),
		},
	};

	if let Some(session_id) = &overrides.session_id {
		config.session_id = Some(session_id.clone());
	}
	if let Some(app_name) = &overrides.app_name {
		config.app_name = app_name.clone();
	}
	if !overrides.trusted_origins.is_empty() {
		config.trusted_origins = overrides.trusted_origins.clone();
	}
	if !overrides.scopes.is_empty() {
		config.scopes = overrides.scopes.clone();
	}
	Ok(config)
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn overrides_win_over_file_values() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("config.json");
		std::fs::write(&path, r#"{"appName": "from-file", "scopes": ["a"], "queryTtlSecs": 5}"#).unwrap();

		let overrides = OverrideArgs {
			session_id: Some("s-9".into()),
			app_name: Some("parks".into()),
			..Default::default()
		};
		let config = resolve_config(Some(&path), &overrides).unwrap();

		assert_eq!(config.app_name, "parks");
		assert_eq!(config.session_id.as_deref(), Some("s-9"));
		assert_eq!(config.scopes, ["a"]);
		assert_eq!(config.query_ttl_secs, 5);
	}

	#[test]
	fn explicit_missing_file_is_an_error() {
		let dir = TempDir::new().unwrap();
		let err = resolve_config(Some(&dir.path().join("absent.json")), &OverrideArgs::default()).unwrap_err();
		assert!(err.to_string().contains("absent.json"));
	}
}
