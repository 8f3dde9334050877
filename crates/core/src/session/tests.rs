use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ember_protocol::{Envelope, EnvelopeKind, OriginTrust};
use ember_runtime::{AuthError, Error, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use super::*;

struct FakeProvider {
	silent_calls: AtomicUsize,
	interactive_calls: AtomicUsize,
	silent_ok: AtomicBool,
	interactive_ok: AtomicBool,
	handoff: Mutex<Option<Authentication>>,
	delay: Duration,
	lifetime: Duration,
}

impl FakeProvider {
	fn new() -> Self {
		Self {
			silent_calls: AtomicUsize::new(0),
			interactive_calls: AtomicUsize::new(0),
			silent_ok: AtomicBool::new(true),
			interactive_ok: AtomicBool::new(true),
			handoff: Mutex::new(None),
			delay: Duration::from_millis(20),
			lifetime: Duration::from_secs(3600),
		}
	}

	fn silent_calls(&self) -> usize {
		self.silent_calls.load(Ordering::SeqCst)
	}

	fn interactive_calls(&self) -> usize {
		self.interactive_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl IdentityProvider for FakeProvider {
	async fn acquire_silent(&self, scopes: &ScopeSet, _account: &Account) -> Result<AccessToken> {
		let n = self.silent_calls.fetch_add(1, Ordering::SeqCst) + 1;
		tokio::time::sleep(self.delay).await;
		if self.silent_ok.load(Ordering::SeqCst) {
			Ok(AccessToken::new(format!("silent-{n}"), scopes.clone(), self.lifetime))
		} else {
			Err(Error::Transport("interaction_required".into()))
		}
	}

	async fn acquire_interactive(&self, scopes: &ScopeSet, _mode: &InteractionMode) -> Result<Authentication> {
		let n = self.interactive_calls.fetch_add(1, Ordering::SeqCst) + 1;
		tokio::time::sleep(self.delay).await;
		if self.interactive_ok.load(Ordering::SeqCst) {
			Ok(Authentication {
				account: ranger(),
				token: AccessToken::new(format!("interactive-{n}"), scopes.clone(), self.lifetime),
			})
		} else {
			Err(Error::Transport("user cancelled".into()))
		}
	}

	async fn complete_handoff(&self, _session_id: &str) -> Result<Option<Authentication>> {
		tokio::time::sleep(self.delay).await;
		Ok(self.handoff.lock().take())
	}
}

fn ranger() -> Account {
	Account::new("acct-1", "ranger@example.com")
}

fn options() -> SessionOptions {
	SessionOptions {
		default_scopes: ScopeSet::new(["parks.read"]),
		..Default::default()
	}
}

fn coordinator(
	provider: &Arc<FakeProvider>,
	store: &Arc<MemoryCredentialStore>,
	options: SessionOptions,
) -> SessionCoordinator {
	SessionCoordinator::new(provider.clone(), store.clone(), options)
}

#[tokio::test(start_paused = true)]
async fn start_without_account_needs_login() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(&provider, &store, options());

	session.start().await.unwrap();

	assert_eq!(session.state(), SessionState::NoAccount);
	assert_eq!(provider.silent_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_resolves_persisted_account_silently() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());

	session.start().await.unwrap();

	assert_eq!(session.state().phase(), SessionPhase::Authenticated);
	assert_eq!(session.state().account(), Some(&ranger()));
	assert_eq!(provider.silent_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_silent_resolution_falls_back_to_no_account() {
	let provider = Arc::new(FakeProvider::new());
	provider.silent_ok.store(false, Ordering::SeqCst);
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());

	session.start().await.unwrap();
	assert_eq!(session.state(), SessionState::NoAccount);
}

#[tokio::test(start_paused = true)]
async fn handoff_completion_authenticates_and_persists() {
	let provider = Arc::new(FakeProvider::new());
	*provider.handoff.lock() = Some(Authentication {
		account: ranger(),
		token: AccessToken::new("handoff", ScopeSet::new(["parks.read"]), Duration::from_secs(3600)),
	});
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(
		&provider,
		&store,
		SessionOptions {
			mode: InteractionMode::for_session(Some("s-1")),
			..options()
		},
	);

	session.start().await.unwrap();

	assert!(session.state().is_authenticated());
	assert_eq!(store.load_account().unwrap(), Some(ranger()));
	assert_eq!(session.get_token(&[]).await.unwrap().value, "handoff");
}

#[tokio::test]
async fn start_twice_is_an_invalid_transition() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(&provider, &store, options());

	session.start().await.unwrap();
	assert!(matches!(session.start().await, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn get_token_before_start_fails() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(&provider, &store, options());

	let err = session.get_token(&[]).await.unwrap_err();
	assert!(matches!(err, Error::Auth(AuthError::NotStarted)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_get_token_coalesces_into_one_acquisition() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let calls = (0..5).map(|_| session.get_token(&["parks.read"]));
	let tokens = join_all(calls).await;

	assert_eq!(provider.interactive_calls(), 1);
	for token in tokens {
		assert_eq!(token.unwrap().value, "interactive-1");
	}
	assert_eq!(session.in_flight(), 0);
	assert_eq!(store.load_account().unwrap(), Some(ranger()));
}

#[tokio::test(start_paused = true)]
async fn scope_order_does_not_split_coalescing() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();
	assert_eq!(provider.silent_calls(), 1);

	let (a, b) = tokio::join!(
		session.get_token(&["comms.read", "parks.write"]),
		session.get_token(&["parks.write", "comms.read"]),
	);

	assert_eq!(provider.silent_calls(), 2);
	assert_eq!(a.unwrap().value, b.unwrap().value);
}

#[tokio::test(start_paused = true)]
async fn valid_token_is_served_from_cache() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let first = session.get_token(&[]).await.unwrap();
	let second = session.get_token(&["parks.read"]).await.unwrap();

	assert_eq!(first, second);
	assert_eq!(provider.silent_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn token_near_expiry_is_refreshed_silently() {
	let provider = Arc::new(FakeProvider {
		lifetime: Duration::from_secs(90),
		..FakeProvider::new()
	});
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();
	let mut states = session.watch();

	tokio::time::advance(Duration::from_secs(31)).await;
	let token = session.get_token(&[]).await.unwrap();

	assert_eq!(token.value, "silent-2");
	assert!(states.has_changed().unwrap());
	assert!(states.borrow_and_update().is_authenticated());
	assert_eq!(provider.interactive_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_falls_back_to_interactive() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	provider.silent_ok.store(false, Ordering::SeqCst);
	let token = session.get_token(&["comms.write"]).await.unwrap();

	assert_eq!(token.value, "interactive-1");
	assert!(session.state().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn failed_login_is_terminal_for_every_caller() {
	let provider = Arc::new(FakeProvider::new());
	provider.interactive_ok.store(false, Ordering::SeqCst);
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let results = join_all((0..3).map(|_| session.get_token(&[]))).await;
	for result in results {
		assert!(result.unwrap_err().is_auth_failure());
	}
	assert_eq!(session.state().phase(), SessionPhase::Failed);

	// No automatic retry.
	assert!(session.get_token(&[]).await.unwrap_err().is_auth_failure());
	assert!(session.login().await.unwrap_err().is_auth_failure());
	assert_eq!(provider.interactive_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn login_required_when_on_demand_login_is_disabled() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::new());
	let session = coordinator(
		&provider,
		&store,
		SessionOptions {
			interactive_on_demand: false,
			..options()
		},
	);
	session.start().await.unwrap();

	let err = session.get_token(&[]).await.unwrap_err();
	assert!(matches!(err, Error::Auth(AuthError::LoginRequired)));
	assert!(!err.is_auth_failure());

	let token = session.login().await.unwrap();
	assert_eq!(token.value, "interactive-1");
	assert_eq!(session.get_token(&[]).await.unwrap(), token);
}

#[tokio::test(start_paused = true)]
async fn get_token_waits_for_handoff_resolution() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());

	let waiter = session.clone();
	let (started, token) = tokio::join!(session.start(), async move {
		tokio::task::yield_now().await;
		waiter.get_token(&[]).await
	});

	started.unwrap();
	assert_eq!(token.unwrap().value, "silent-1");
	assert_eq!(provider.silent_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_account() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let verified = Envelope::inbound(EnvelopeKind::SignOut, Value::Null, OriginTrust::Verified);
	session.handle_sign_out(&verified).unwrap();

	assert_eq!(session.state(), SessionState::NoAccount);
	assert_eq!(store.load_account().unwrap(), None);

	// Signing out again is harmless.
	session.sign_out().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unverified_sign_out_is_rejected() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let spoofed = Envelope::inbound(EnvelopeKind::SignOut, Value::Null, OriginTrust::Unverified);
	let err = session.handle_sign_out(&spoofed).unwrap_err();

	assert!(matches!(err, Error::Auth(AuthError::Rejected(_))));
	assert!(session.state().is_authenticated());
	assert_eq!(store.load_account().unwrap(), Some(ranger()));
}

#[tokio::test(start_paused = true)]
async fn abandoned_acquisition_still_completes() {
	let provider = Arc::new(FakeProvider {
		delay: Duration::from_secs(5),
		..FakeProvider::new()
	});
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let abandoned = tokio::time::timeout(Duration::from_secs(1), session.get_token(&["comms.read"])).await;
	assert!(abandoned.is_err());

	let token = tokio::time::timeout(Duration::from_secs(600), session.get_token(&["parks.write"]))
		.await
		.expect("second scope set should not be blocked")
		.unwrap();

	assert_eq!(token.value, "silent-3");
	assert!(session.state().is_authenticated());
	assert_eq!(session.in_flight(), 0);

	// The abandoned token was still cached.
	assert_eq!(session.get_token(&["comms.read"]).await.unwrap().value, "silent-2");
	assert_eq!(provider.silent_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_refresh_discards_the_token() {
	let provider = Arc::new(FakeProvider::new());
	let store = Arc::new(MemoryCredentialStore::with_account(ranger()));
	let session = coordinator(&provider, &store, options());
	session.start().await.unwrap();

	let (token, signed_out) = tokio::join!(session.get_token(&["comms.read"]), async {
		tokio::time::sleep(Duration::from_millis(5)).await;
		session.sign_out()
	});

	signed_out.unwrap();
	let err = token.unwrap_err();
	assert!(matches!(err, Error::Auth(AuthError::LoginRequired)));
	assert!(!err.is_auth_failure());
	assert_eq!(session.state(), SessionState::NoAccount);
	assert_eq!(store.load_account().unwrap(), None);
	assert_eq!(session.in_flight(), 0);
}
