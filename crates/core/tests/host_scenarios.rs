// End-to-end host scenarios.
//
// Each test runs a full EmbeddedRuntime over an in-process channel transport
// and plays the host side through the HostEndpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ember::{
	Account, Collaborators, DataService, EmbeddedRuntime, EntryState, Gate, MemoryCredentialStore, Navigator, QueryKey,
	Result, RuntimeConfig, StaticIdentityProvider,
};
use ember_runtime::{Error, HostEndpoint, channel_transport};
use parking_lot::Mutex;
use serde_json::{Value, json};

#[derive(Default)]
struct RecordingNavigator {
	visited: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
	fn navigate(&self, url: &str) -> Result<()> {
		self.visited.lock().push(url.to_string());
		Ok(())
	}
}

/// Fails every fetch for keys listed in `broken`.
#[derive(Default)]
struct ParkService {
	fetches: AtomicUsize,
	broken: Mutex<Vec<String>>,
}

#[async_trait]
impl DataService for ParkService {
	async fn fetch(&self, key: &QueryKey, _token: &str) -> Result<Value> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		if self.broken.lock().contains(&key.to_string()) {
			return Err(Error::Transport("502 Bad Gateway".into()));
		}
		Ok(json!({ "key": key.to_string() }))
	}

	async fn mutate(&self, _key: &QueryKey, value: &Value, _token: &str) -> Result<Value> {
		Ok(value.clone())
	}
}

struct Host {
	runtime: EmbeddedRuntime,
	endpoint: HostEndpoint,
	navigator: Arc<RecordingNavigator>,
	service: Arc<ParkService>,
}

async fn hosted() -> Host {
	let (parts, endpoint) = channel_transport();
	let navigator = Arc::new(RecordingNavigator::default());
	let service = Arc::new(ParkService::default());
	let account = Account::new("acct-1", "ranger@example.com");

	let collaborators = Collaborators {
		identity: Arc::new(StaticIdentityProvider::new(
			account.clone(),
			"token-abc",
			Duration::from_secs(3600),
		)),
		credentials: Arc::new(MemoryCredentialStore::with_account(account)),
		data: service.clone(),
		navigator: navigator.clone(),
	};
	let config = RuntimeConfig::default()
		.with_session_id("session-42")
		.with_app_name("parks");

	let runtime = EmbeddedRuntime::init(config, parts, collaborators).await.unwrap();
	Host {
		runtime,
		endpoint,
		navigator,
		service,
	}
}

/// Lets the bus task drain everything queued so far.
async fn settle() {
	for _ in 0..16 {
		tokio::task::yield_now().await;
	}
}

impl Host {
	async fn expect(&mut self, kind: &str) -> Value {
		let message = tokio::time::timeout(Duration::from_secs(1), self.endpoint.recv())
			.await
			.unwrap_or_else(|_| panic!("no {kind} envelope"))
			.unwrap();
		assert_eq!(message["kind"], kind, "unexpected envelope: {message}");
		message
	}

	async fn send_context(&mut self) {
		let request = self.expect("requestContext").await;
		self.endpoint
			.send(json!({
				"kind": "setContext",
				"payload": {"id": "park-123", "name": "Test Park"},
				"requestId": request["requestId"],
			}))
			.unwrap();
	}
}

#[tokio::test]
async fn scenario_a_set_context_resolves_waiters() {
	let mut host = hosted().await;
	assert_eq!(host.runtime.gate(), Gate::AwaitingContext);

	let context = host.runtime.context().clone();
	let waiter = tokio::spawn(async move { context.wait_for_context().await });
	settle().await;

	host.send_context().await;

	let entity = waiter.await.unwrap().unwrap();
	assert_eq!(entity.id, "park-123");
	assert_eq!(entity.name, "Test Park");
	assert_eq!(host.runtime.context().current(), Some(entity));
	assert_eq!(host.runtime.gate(), Gate::Ready);
}

#[tokio::test]
async fn scenario_b_repeated_local_navigation_reports_once() {
	let mut host = hosted().await;
	host.expect("requestContext").await;

	assert!(host.runtime.route().on_local_navigation("/essential").unwrap());
	assert!(!host.runtime.route().on_local_navigation("/essential").unwrap());
	settle().await;

	let change = host.expect("pathChange").await;
	assert_eq!(change["payload"], json!({"appName": "parks", "url": "/essential"}));
	assert!(host.endpoint.try_recv().is_none());
}

#[tokio::test]
async fn scenario_c_host_navigation_is_not_echoed() {
	let mut host = hosted().await;
	host.expect("requestContext").await;

	host.endpoint
		.send(json!({"kind": "navigate", "payload": "/marketing"}))
		.unwrap();
	settle().await;
	assert_eq!(*host.navigator.visited.lock(), vec!["/marketing".to_string()]);

	// The app's router hook fires for the navigation the host asked for.
	host.runtime.route().on_local_navigation("/marketing").unwrap();
	settle().await;

	assert!(host.endpoint.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn scenario_d_fetch_error_surfaces_after_one_retry() {
	let mut host = hosted().await;
	host.service.broken.lock().push("park-123/comms".to_string());
	host.send_context().await;
	settle().await;

	let err = host.runtime.cache().read(&["comms"]).await.unwrap_err();

	let fetch = err.fetch_error().unwrap();
	assert_eq!(fetch.key, "park-123/comms");
	assert_eq!(fetch.attempts, 2);
	assert_eq!(host.service.fetches.load(Ordering::SeqCst), 2);
	assert!(matches!(
		host.runtime.cache().snapshot(&["comms"]).unwrap().state,
		EntryState::Error(_)
	));

	let roster = host.runtime.cache().read(&["roster"]).await.unwrap();
	assert_eq!(roster["key"], "park-123/roster");
}

#[tokio::test]
async fn invalid_and_unknown_messages_are_dropped() {
	let mut host = hosted().await;
	host.expect("requestContext").await;

	host.endpoint.send(json!({"kind": "navigate", "payload": 7})).unwrap();
	host.endpoint.send(json!({"kind": "teleport", "payload": "/x"})).unwrap();
	host.endpoint.send(json!("not an envelope")).unwrap();
	host.endpoint
		.send(json!({"kind": "navigate", "payload": "/roster"}))
		.unwrap();
	settle().await;

	assert_eq!(*host.navigator.visited.lock(), vec!["/roster".to_string()]);
}

#[tokio::test]
async fn host_sign_out_requires_login() {
	let mut host = hosted().await;
	host.send_context().await;
	settle().await;
	assert_eq!(host.runtime.gate(), Gate::Ready);

	host.endpoint.send(json!({"kind": "signOut", "payload": null})).unwrap();
	settle().await;

	assert_eq!(host.runtime.gate(), Gate::LoginRequired);
}

#[tokio::test]
async fn dispose_stops_host_traffic() {
	let mut host = hosted().await;
	host.expect("requestContext").await;

	host.runtime.dispose();
	host.endpoint
		.send(json!({"kind": "navigate", "payload": "/late"}))
		.ok();
	settle().await;

	assert!(host.navigator.visited.lock().is_empty());
	assert!(host.runtime.route().on_local_navigation("/late").is_ok());
	assert!(host.endpoint.try_recv().is_none());
}
