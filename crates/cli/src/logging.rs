use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter directives for a `-v` count. `RUST_LOG` takes precedence.
pub fn filter_for(verbosity: u8) -> &'static str {
	// stdout carries the host protocol, so logging only ever goes to stderr.
	match verbosity {
		0 => "error",
		1 => "info,ember_runtime=warn",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_ansi(false)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
