//! Stdio host bridge.
//!
//! The host writes envelopes to our stdin and reads ours from stdout, using
//! the framing chosen with `--framing`:
//!
//! ```text
//! host -> {"kind":"setContext","payload":{"id":"park-123","name":"Test Park"},"requestId":1}
//! ember -> {"kind":"requestContext","payload":null,"requestId":1}
//! host -> {"kind":"navigate","payload":"/marketing"}
//! ```
//!
//! The bridge exits when the host closes stdin or on Ctrl-C.
//!
//! Only inbound host commands are handled here. There is no embedded app
//! behind the bridge, so nothing reads through the query cache or reports
//! local navigation; the HTTP data service is wired for embedders that
//! drive [`EmbeddedRuntime::cache`] themselves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ember::{
	Account, Collaborators, CredentialStore, EmbeddedRuntime, FileCredentialStore, MemoryCredentialStore,
	RuntimeConfig, StaticIdentityProvider,
};
use ember_runtime::PipeTransport;

use crate::cli::RunArgs;
use crate::providers::{HttpDataService, TrackingNavigator};

pub async fn execute(config: RuntimeConfig, args: RunArgs) -> Result<()> {
	let collaborators = collaborators(&config, &args)?;

	let (transport, message_rx) =
		PipeTransport::with_framing(tokio::io::stdout(), tokio::io::stdin(), args.framing.into());
	let parts = transport.into_transport_parts(message_rx);

	let runtime = EmbeddedRuntime::init(config, parts, collaborators)
		.await
		.context("failed to start embedded runtime")?;
	tracing::info!(gate = %runtime.gate(), "Bridge running");

	tokio::select! {
		_ = runtime.join() => tracing::info!("Host closed the transport"),
		signal = tokio::signal::ctrl_c() => {
			signal.context("failed to listen for Ctrl-C")?;
			tracing::info!("Interrupted");
		}
	}

	runtime.dispose();
	Ok(())
}

fn collaborators(config: &RuntimeConfig, args: &RunArgs) -> Result<Collaborators> {
	let account = Account::new(args.account.clone(), args.account.clone());
	let identity = StaticIdentityProvider::new(account, args.token.clone(), Duration::from_secs(args.token_lifetime));

	let credentials: Arc<dyn CredentialStore> = match config.credentials_path() {
		Some(path) => {
			tracing::debug!(path = %path.display(), "Using file credential store");
			Arc::new(FileCredentialStore::new(path))
		}
		None => Arc::new(MemoryCredentialStore::new()),
	};

	let data = HttpDataService::new(args.data_url.clone()).context("invalid --data-url")?;

	Ok(Collaborators {
		identity: Arc::new(identity),
		credentials,
		data: Arc::new(data),
		navigator: Arc::new(TrackingNavigator::default()),
	})
}
