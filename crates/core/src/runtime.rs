//! Composition root.
//!
//! [`EmbeddedRuntime`] builds exactly one [`MessageBus`] and one
//! [`SessionCoordinator`] and hands them to every component. Nothing in the
//! crate is global; two runtimes in one process are fully independent.

use std::sync::Arc;

use ember_runtime::{MessageBus, Outbox, Result, TransportParts};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::context::{ContextMode, ContextStore};
use crate::gate::Gate;
use crate::query::{DataService, QueryCache, QueryOptions};
use crate::route::{Navigator, RouteSync};
use crate::router::{CommandRouter, RouteTargets};
use crate::session::{CredentialStore, IdentityProvider, InteractionMode, ScopeSet, SessionCoordinator, SessionOptions};

/// Host-side services the runtime depends on.
#[derive(Clone)]
pub struct Collaborators {
	pub identity: Arc<dyn IdentityProvider>,
	pub credentials: Arc<dyn CredentialStore>,
	pub data: Arc<dyn DataService>,
	pub navigator: Arc<dyn Navigator>,
}

pub struct EmbeddedRuntime {
	config: RuntimeConfig,
	bus: Arc<MessageBus>,
	session: SessionCoordinator,
	context: ContextStore,
	cache: QueryCache,
	route: RouteSync,
	router: CommandRouter,
	bus_task: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddedRuntime {
	/// Wires every component to `transport`, starts the bus loop, asks the
	/// host for context and resolves the session.
	pub async fn init(config: RuntimeConfig, transport: TransportParts, collaborators: Collaborators) -> Result<Self> {
		let bus = Arc::new(MessageBus::new(transport, config.trust_policy()));
		let runtime = Self::assemble(config, Arc::clone(&bus), collaborators);

		let task = tokio::spawn(async move {
			if let Err(e) = bus.run().await {
				tracing::error!(error = %e, "Message bus stopped");
			}
		});
		*runtime.bus_task.lock() = Some(task);

		runtime.start().await?;
		Ok(runtime)
	}

	/// Like [`init`](Self::init) without a transport: outbound envelopes land in
	/// the returned [`Outbox`] and inbound ones go through [`MessageBus::deliver`].
	pub async fn detached(config: RuntimeConfig, collaborators: Collaborators) -> Result<(Self, Outbox)> {
		let (bus, outbox) = MessageBus::detached(config.trust_policy());
		let runtime = Self::assemble(config, Arc::new(bus), collaborators);
		runtime.start().await?;
		Ok((runtime, outbox))
	}

	fn assemble(config: RuntimeConfig, bus: Arc<MessageBus>, collaborators: Collaborators) -> Self {
		let Collaborators {
			identity,
			credentials,
			data,
			navigator,
		} = collaborators;
		let session_id = config.session_id.as_deref();

		let session = SessionCoordinator::new(
			identity,
			credentials,
			SessionOptions {
				default_scopes: ScopeSet::new(&config.scopes),
				safety_margin: config.token_safety_margin(),
				mode: InteractionMode::for_session(session_id),
				interactive_on_demand: config.interactive_on_demand,
			},
		);
		let context = ContextStore::new(
			Arc::clone(&bus),
			ContextMode::for_session(session_id),
			config.context_timeout(),
		);
		let cache = QueryCache::new(
			data,
			session.clone(),
			context.clone(),
			QueryOptions {
				ttl: config.query_ttl(),
				gc_after: config.gc_after(),
			},
		);
		let route = RouteSync::new(Arc::clone(&bus), navigator, config.app_name.clone(), config.echo_policy);
		let router = CommandRouter::attach(
			&bus,
			RouteTargets {
				context: context.clone(),
				route: route.clone(),
				session: session.clone(),
			},
		);

		Self {
			config,
			bus,
			session,
			context,
			cache,
			route,
			router,
			bus_task: Mutex::new(None),
		}
	}

	async fn start(&self) -> Result<()> {
		tracing::info!(
			app = %self.config.app_name,
			hosted = self.config.is_hosted(),
			"Starting embedded runtime"
		);
		self.context.init()?;
		self.session.start().await?;
		tracing::debug!(state = self.session.state().name(), "Session resolved");
		Ok(())
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	pub fn bus(&self) -> &Arc<MessageBus> {
		&self.bus
	}

	pub fn session(&self) -> &SessionCoordinator {
		&self.session
	}

	pub fn context(&self) -> &ContextStore {
		&self.context
	}

	pub fn cache(&self) -> &QueryCache {
		&self.cache
	}

	pub fn route(&self) -> &RouteSync {
		&self.route
	}

	pub fn router(&self) -> &CommandRouter {
		&self.router
	}

	/// What the app may render given the current session and context.
	pub fn gate(&self) -> Gate {
		Gate::evaluate(&self.session.state(), &self.context)
	}

	/// Waits until the bus loop ends, which happens when the host closes the
	/// transport. Returns immediately for detached runtimes.
	pub async fn join(&self) {
		let task = self.bus_task.lock().take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				if !e.is_cancelled() {
					tracing::error!(error = %e, "Message bus task panicked");
				}
			}
		}
	}

	/// Tears the runtime down. Safe to call more than once.
	pub fn dispose(&self) {
		if self.bus.is_closed() {
			return;
		}
		self.router.detach();
		self.context.dispose();
		self.route.dispose();
		self.bus.close();
		if let Some(task) = self.bus_task.lock().take() {
			task.abort();
		}
		tracing::info!(app = %self.config.app_name, "Embedded runtime disposed");
	}
}

impl Drop for EmbeddedRuntime {
	fn drop(&mut self) {
		self.dispose();
	}
}

impl std::fmt::Debug for EmbeddedRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmbeddedRuntime")
			.field("app_name", &self.config.app_name)
			.field("session", &self.session.state().name())
			.field("context", &self.context.current().map(|entity| entity.id))
			.field("bus", &self.bus)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;
	use ember_protocol::EnvelopeKind;
	use serde_json::{Value, json};

	use super::*;
	use crate::query::QueryKey;
	use crate::session::{Account, MemoryCredentialStore, StaticIdentityProvider};

	struct EchoService;

	#[async_trait]
	impl DataService for EchoService {
		async fn fetch(&self, key: &QueryKey, _token: &str) -> Result<Value> {
			Ok(json!({ "key": key.to_string() }))
		}

		async fn mutate(&self, _key: &QueryKey, value: &Value, _token: &str) -> Result<Value> {
			Ok(value.clone())
		}
	}

	struct NoopNavigator;

	impl Navigator for NoopNavigator {
		fn navigate(&self, _url: &str) -> Result<()> {
			Ok(())
		}
	}

	fn collaborators(signed_in: bool) -> Collaborators {
		let account = Account::new("acct-1", "ranger@example.com");
		let credentials = if signed_in {
			MemoryCredentialStore::with_account(account.clone())
		} else {
			MemoryCredentialStore::new()
		};
		Collaborators {
			identity: Arc::new(StaticIdentityProvider::new(account, "token", Duration::from_secs(3600))),
			credentials: Arc::new(credentials),
			data: Arc::new(EchoService),
			navigator: Arc::new(NoopNavigator),
		}
	}

	#[tokio::test]
	async fn standalone_runtime_is_ready_once_signed_in() {
		let (runtime, mut outbox) = EmbeddedRuntime::detached(RuntimeConfig::default(), collaborators(true))
			.await
			.unwrap();

		assert_eq!(runtime.gate(), Gate::Ready);
		assert!(runtime.context.is_standalone());
		assert!(outbox.try_next().is_none());

		let value = runtime.cache().read(&["comms"]).await.unwrap();
		assert_eq!(value["key"], "standalone/comms");
	}

	#[tokio::test]
	async fn standalone_runtime_without_account_requires_login() {
		let (runtime, _outbox) = EmbeddedRuntime::detached(RuntimeConfig::default(), collaborators(false))
			.await
			.unwrap();
		assert_eq!(runtime.gate(), Gate::LoginRequired);
	}

	#[tokio::test]
	async fn hosted_runtime_requests_context() {
		let config = RuntimeConfig::default().with_session_id("s-1");
		let (runtime, mut outbox) = EmbeddedRuntime::detached(config, collaborators(true)).await.unwrap();

		let request = outbox.try_next().unwrap();
		assert_eq!(request.kind, "requestContext");
		assert!(request.request_id.is_some());
		assert_eq!(runtime.gate(), Gate::AwaitingContext);
	}

	#[tokio::test]
	async fn dispose_revokes_subscriptions_and_closes_bus() {
		let (runtime, _outbox) = EmbeddedRuntime::detached(RuntimeConfig::default(), collaborators(true))
			.await
			.unwrap();
		assert_eq!(runtime.bus().handler_count(EnvelopeKind::Navigate), 1);

		runtime.dispose();
		runtime.dispose();

		assert!(runtime.bus().is_closed());
		assert!(!runtime.router().is_attached());
		assert!(!runtime.route().is_active());
		assert!(!runtime.context().is_active());
		assert_eq!(runtime.bus().handler_count(EnvelopeKind::Navigate), 0);
	}
}
