use anyhow::Result;
use ember::RuntimeConfig;

/// Prints the effective configuration to stdout.
pub fn execute(config: &RuntimeConfig) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(config)?);
	Ok(())
}
