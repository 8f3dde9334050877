use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ember_runtime::Framing;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(about = "Run the ember embedded runtime against a host on stdin/stdout")]
#[command(version)]
#[command(styles = help_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (defaults to <config dir>/ember/config.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Bridge a host speaking framed JSON envelopes on stdin/stdout
	Run(RunArgs),

	/// Print the effective configuration as JSON
	Config(OverrideArgs),
}

/// Flags that override values from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
	/// Session id supplied by the host; enables hosted mode
	#[arg(long, value_name = "ID")]
	pub session_id: Option<String>,

	/// Name reported to the host in pathChange envelopes
	#[arg(long, value_name = "NAME")]
	pub app_name: Option<String>,

	/// Origin trusted for host envelopes (repeatable)
	#[arg(long = "trust-origin", value_name = "ORIGIN")]
	pub trusted_origins: Vec<String>,

	/// Default token scope (repeatable)
	#[arg(long = "scope", value_name = "SCOPE")]
	pub scopes: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
	#[command(flatten)]
	pub overrides: OverrideArgs,

	/// Message framing on stdin/stdout
	#[arg(long, value_enum, default_value = "length-prefixed")]
	pub framing: FramingArg,

	/// Base URL of the data service queried by the cache
	#[arg(long, value_name = "URL")]
	pub data_url: Url,

	/// Bearer token presented to the data service
	#[arg(long, env = "EMBER_TOKEN", hide_env_values = true)]
	pub token: String,

	/// Account id the token belongs to
	#[arg(long, value_name = "ID", default_value = "local")]
	pub account: String,

	/// Seconds before the token must be considered expired
	#[arg(long, value_name = "SECS", default_value_t = 3600)]
	pub token_lifetime: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FramingArg {
	/// u32 little-endian length before each JSON message
	#[default]
	LengthPrefixed,
	/// One JSON message per line
	JsonLines,
}

impl From<FramingArg> for Framing {
	fn from(framing: FramingArg) -> Self {
		match framing {
			FramingArg::LengthPrefixed => Framing::LengthPrefixed,
			FramingArg::JsonLines => Framing::JsonLines,
		}
	}
}

/// Cargo-like help colors.
fn help_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}
