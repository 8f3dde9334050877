use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ember_protocol::Envelope;
use ember_runtime::{AuthError, Result};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::provider::{AccessToken, Account, Authentication, CredentialStore, IdentityProvider, InteractionMode, ScopeSet};
use super::state::SessionState;

type Acquisition = Shared<BoxFuture<'static, std::result::Result<AccessToken, AuthError>>>;

/// Construction options for a [`SessionCoordinator`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
	pub default_scopes: ScopeSet,
	pub safety_margin: Duration,
	pub mode: InteractionMode,
	/// When false, `get_token` with nobody signed in fails with
	/// [`AuthError::LoginRequired`] instead of prompting.
	pub interactive_on_demand: bool,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			default_scopes: ScopeSet::default(),
			safety_margin: Duration::from_secs(60),
			mode: InteractionMode::Overlay,
			interactive_on_demand: true,
		}
	}
}

/// Authentication state machine and token broker.
///
/// Cheap to clone; every clone shares one state machine. Concurrent
/// [`get_token`](Self::get_token) calls for the same scopes share a single
/// acquisition, and acquisitions run one at a time.
#[derive(Clone)]
pub struct SessionCoordinator {
	inner: Arc<Inner>,
}

struct Inner {
	provider: Arc<dyn IdentityProvider>,
	credentials: Arc<dyn CredentialStore>,
	options: SessionOptions,
	state: watch::Sender<SessionState>,
	tokens: Mutex<HashMap<ScopeSet, AccessToken>>,
	in_flight: Mutex<HashMap<ScopeSet, Acquisition>>,
	acquire_lock: tokio::sync::Mutex<()>,
}

impl SessionCoordinator {
	pub fn new(
		provider: Arc<dyn IdentityProvider>,
		credentials: Arc<dyn CredentialStore>,
		options: SessionOptions,
	) -> Self {
		let (state, _) = watch::channel(SessionState::Uninitialized);
		Self {
			inner: Arc::new(Inner {
				provider,
				credentials,
				options,
				state,
				tokens: Mutex::new(HashMap::new()),
				in_flight: Mutex::new(HashMap::new()),
				acquire_lock: tokio::sync::Mutex::new(()),
			}),
		}
	}

	pub fn state(&self) -> SessionState {
		self.inner.state.borrow().clone()
	}

	/// Receiver notified on every transition.
	pub fn watch(&self) -> watch::Receiver<SessionState> {
		self.inner.state.subscribe()
	}

	pub fn mode(&self) -> &InteractionMode {
		&self.inner.options.mode
	}

	/// Resolves the initial session: a pending handoff first, then the
	/// persisted account via a silent token.
	///
	/// Provider failures here are not fatal; they leave the session in
	/// `NoAccount`. Calling `start` twice is an invalid transition.
	pub async fn start(&self) -> Result<()> {
		let inner = &self.inner;
		inner.transition(SessionState::ResolvingHandoff)?;

		if let InteractionMode::Handoff { session_id } = &inner.options.mode {
			match inner.provider.complete_handoff(session_id).await {
				Ok(Some(auth)) => {
					tracing::info!(account = %auth.account.id, "Handoff completed");
					inner.authenticated(auth.account, auth.token)?;
					return Ok(());
				}
				Ok(None) => tracing::debug!(session_id = %session_id, "No pending handoff"),
				Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Handoff completion failed"),
			}
		}

		let account = match inner.credentials.load_account() {
			Ok(account) => account,
			Err(e) => {
				tracing::warn!(error = %e, "Could not read persisted account");
				None
			}
		};

		let Some(account) = account else {
			return inner.transition(SessionState::NoAccount);
		};

		match inner
			.provider
			.acquire_silent(&inner.options.default_scopes, &account)
			.await
		{
			Ok(token) => Ok(inner.authenticated(account, token)?),
			Err(e) => {
				tracing::info!(account = %account.id, error = %e, "Silent resolution failed, login required");
				inner.transition(SessionState::NoAccount)
			}
		}
	}

	/// Returns a token covering `scopes` (the default scopes when empty).
	///
	/// Suspends while the session is resolving, refreshing or prompting.
	///
	/// # Errors
	///
	/// - [`AuthError::NotStarted`] before [`start`](Self::start)
	/// - [`AuthError::LoginRequired`] with nobody signed in and on-demand login disabled
	/// - [`AuthError::Failed`] once the session has failed
	pub async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
		let scopes = self.inner.resolve_scopes(scopes);
		self.inner.settled().await;

		match self.state() {
			SessionState::Uninitialized => return Err(AuthError::NotStarted.into()),
			SessionState::Failed { reason } => return Err(AuthError::Failed(reason).into()),
			SessionState::NoAccount if !self.inner.options.interactive_on_demand => {
				return Err(AuthError::LoginRequired.into());
			}
			_ => {}
		}

		if let Some(token) = self.inner.cached_token(&scopes) {
			return Ok(token);
		}

		Ok(self.acquisition(scopes).await?)
	}

	/// Starts interactive login with the default scopes.
	pub async fn login(&self) -> Result<AccessToken> {
		self.inner.settled().await;
		match self.state() {
			SessionState::Uninitialized => Err(AuthError::NotStarted.into()),
			SessionState::Failed { reason } => Err(AuthError::Failed(reason).into()),
			_ => {
				let scopes = self.inner.options.default_scopes.clone();
				if let Some(token) = self.inner.cached_token(&scopes) {
					return Ok(token);
				}
				Ok(self.acquisition(scopes).await?)
			}
		}
	}

	/// Forgets the signed-in account and returns to `NoAccount`.
	///
	/// A no-op when nobody is signed in.
	pub fn sign_out(&self) -> Result<()> {
		let inner = &self.inner;
		if !inner.state.borrow().is_authenticated() {
			tracing::debug!(state = self.state().name(), "Sign-out ignored");
			return Ok(());
		}

		inner.tokens.lock().clear();
		if let Err(e) = inner.credentials.clear() {
			tracing::warn!(error = %e, "Could not clear persisted account");
		}
		inner.transition(SessionState::NoAccount)?;
		tracing::info!("Signed out");
		Ok(())
	}

	/// Applies a host `signOut` envelope. Unverified origins are rejected.
	pub fn handle_sign_out(&self, envelope: &Envelope) -> Result<()> {
		if !envelope.is_verified() {
			tracing::warn!(kind = %envelope.kind, "Rejecting sign-out from unverified origin");
			return Err(AuthError::Rejected(envelope.kind.to_string()).into());
		}
		self.sign_out()
	}

	/// Number of acquisitions currently running.
	pub fn in_flight(&self) -> usize {
		self.inner.in_flight.lock().len()
	}

	/// Joins or starts the acquisition for `scopes`.
	///
	/// The acquisition runs on its own task so it completes, and releases the
	/// acquire lock, even when every caller gives up on it.
	fn acquisition(&self, scopes: ScopeSet) -> Acquisition {
		let mut in_flight = self.inner.in_flight.lock();
		if let Some(existing) = in_flight.get(&scopes) {
			tracing::debug!(scopes = %scopes, "Joining in-flight token acquisition");
			return existing.clone();
		}

		let inner = Arc::clone(&self.inner);
		let key = scopes.clone();
		let task = tokio::spawn(async move {
			let result = inner.acquire(&key).await;
			inner.in_flight.lock().remove(&key);
			result
		});

		let inner = Arc::clone(&self.inner);
		let key = scopes.clone();
		let acquisition = task
			.map(move |joined| {
				joined.unwrap_or_else(|e| {
					inner.in_flight.lock().remove(&key);
					Err(inner.fail(format!("token acquisition aborted: {e}")))
				})
			})
			.boxed()
			.shared();

		in_flight.insert(scopes, acquisition.clone());
		acquisition
	}
}

impl Inner {
	fn transition(&self, next: SessionState) -> Result<()> {
		let mut result = Ok(());
		self.state.send_if_modified(|state| {
			match state.phase().check_transition(next.phase()) {
				Ok(()) => {
					tracing::debug!(from = state.name(), to = next.name(), "Session transition");
					*state = next;
					true
				}
				Err(e) => {
					result = Err(e);
					false
				}
			}
		});
		result
	}

	/// Enters `Authenticated`, then caches the token and persists the account.
	///
	/// A sign-out that landed while the token was being acquired wins: the
	/// token is discarded and the caller sees `LoginRequired`.
	fn authenticated(&self, account: Account, token: AccessToken) -> std::result::Result<(), AuthError> {
		let next = SessionState::Authenticated {
			account: account.clone(),
			token: token.clone(),
		};
		if let Err(e) = self.transition(next) {
			if matches!(*self.state.borrow(), SessionState::NoAccount) {
				tracing::info!(account = %account.id, "Signed out during acquisition, discarding token");
				return Err(AuthError::LoginRequired);
			}
			return Err(AuthError::Failed(e.to_string()));
		}

		self.tokens.lock().insert(token.scopes.clone(), token);
		if let Err(e) = self.credentials.save_account(&account) {
			tracing::warn!(account = %account.id, error = %e, "Could not persist account");
		}
		Ok(())
	}

	fn fail(&self, reason: String) -> AuthError {
		tracing::error!(reason = %reason, "Session failed");
		if let Err(e) = self.transition(SessionState::Failed { reason: reason.clone() }) {
			tracing::debug!(error = %e, "Session already terminal");
		}
		AuthError::Failed(reason)
	}

	fn resolve_scopes(&self, scopes: &[&str]) -> ScopeSet {
		let scopes = ScopeSet::new(scopes);
		if scopes.is_empty() {
			self.options.default_scopes.clone()
		} else {
			scopes
		}
	}

	/// Waits until the session has left `ResolvingHandoff`.
	async fn settled(&self) {
		let mut rx = self.state.subscribe();
		let _ = rx
			.wait_for(|state| !matches!(state, SessionState::ResolvingHandoff))
			.await;
	}

	fn cached_token(&self, scopes: &ScopeSet) -> Option<AccessToken> {
		if !self.state.borrow().is_authenticated() {
			return None;
		}
		let margin = self.options.safety_margin;
		self.tokens
			.lock()
			.values()
			.find(|token| token.covers(scopes) && token.is_valid_for(margin))
			.cloned()
	}

	async fn acquire(&self, scopes: &ScopeSet) -> std::result::Result<AccessToken, AuthError> {
		let _serial = self.acquire_lock.lock().await;

		// An acquisition that finished while we queued may already cover us.
		if let Some(token) = self.cached_token(scopes) {
			return Ok(token);
		}

		let state = self.state.borrow().clone();
		match state {
			SessionState::Authenticated { account, .. } => self.refresh(scopes, account).await,
			SessionState::NoAccount => self.interactive(scopes).await,
			SessionState::Uninitialized => Err(AuthError::NotStarted),
			SessionState::Failed { reason } => Err(AuthError::Failed(reason)),
			other => Err(AuthError::Failed(format!("token requested during {}", other.name()))),
		}
	}

	async fn refresh(&self, scopes: &ScopeSet, account: Account) -> std::result::Result<AccessToken, AuthError> {
		self.transition(SessionState::SilentRefreshing {
			account: account.clone(),
		})
		.map_err(|e| AuthError::Failed(e.to_string()))?;

		match self.provider.acquire_silent(scopes, &account).await {
			Ok(token) => {
				tracing::debug!(scopes = %scopes, "Silent refresh succeeded");
				self.authenticated(account, token.clone())?;
				Ok(token)
			}
			Err(e) => {
				tracing::info!(scopes = %scopes, error = %e, "Silent refresh failed, falling back to interactive");
				self.interactive(scopes).await
			}
		}
	}

	async fn interactive(&self, scopes: &ScopeSet) -> std::result::Result<AccessToken, AuthError> {
		self.transition(SessionState::AcquiringInteractive)
			.map_err(|e| AuthError::Failed(e.to_string()))?;
		tracing::info!(scopes = %scopes, mode = ?self.options.mode, "Interactive login");

		match self.provider.acquire_interactive(scopes, &self.options.mode).await {
			Ok(Authentication { account, token }) => {
				self.authenticated(account, token.clone())?;
				Ok(token)
			}
			Err(e) => Err(self.fail(e.to_string())),
		}
	}
}

impl std::fmt::Debug for SessionCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionCoordinator")
			.field("state", &self.state().name())
			.field("mode", &self.inner.options.mode)
			.finish()
	}
}
