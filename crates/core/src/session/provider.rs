//! Identity collaborators: token types, the identity provider seam, and
//! durable account storage.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ember_runtime::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A signed-in account, as persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
	pub id: String,
	pub username: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tenant: Option<String>,
}

impl Account {
	pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			username: username.into(),
			tenant: None,
		}
	}
}

/// Normalized scope set: trimmed, deduplicated, sorted.
///
/// Two requests for the same scopes in different order share one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
	pub fn new<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self(
			scopes
				.into_iter()
				.map(|s| s.as_ref().trim().to_string())
				.filter(|s| !s.is_empty())
				.collect(),
		)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn is_subset(&self, other: &ScopeSet) -> bool {
		self.0.is_subset(&other.0)
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}
}

impl fmt::Display for ScopeSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let joined: Vec<&str> = self.iter().collect();
		f.write_str(&joined.join(" "))
	}
}

/// Bearer token with its granted scopes and expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
	pub value: String,
	pub scopes: ScopeSet,
	pub expires_at: Instant,
}

impl AccessToken {
	pub fn new(value: impl Into<String>, scopes: ScopeSet, lifetime: Duration) -> Self {
		Self {
			value: value.into(),
			scopes,
			expires_at: Instant::now() + lifetime,
		}
	}

	/// True if the token is still valid `margin` from now.
	pub fn is_valid_for(&self, margin: Duration) -> bool {
		Instant::now() + margin < self.expires_at
	}

	pub fn covers(&self, scopes: &ScopeSet) -> bool {
		scopes.is_subset(&self.scopes)
	}
}

impl fmt::Debug for AccessToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AccessToken")
			.field("value", &"<redacted>")
			.field("scopes", &self.scopes)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Result of an interactive login or a completed handoff.
#[derive(Debug, Clone)]
pub struct Authentication {
	pub account: Account,
	pub token: AccessToken,
}

/// How an interactive login is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionMode {
	/// In-place overlay inside the embedded context.
	Overlay,
	/// Full handoff to the identity provider, returning with `session_id`.
	Handoff { session_id: String },
}

impl InteractionMode {
	pub fn for_session(session_id: Option<&str>) -> Self {
		match session_id {
			Some(id) => InteractionMode::Handoff {
				session_id: id.to_string(),
			},
			None => InteractionMode::Overlay,
		}
	}
}

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
	/// Obtains a token without user interaction.
	async fn acquire_silent(&self, scopes: &ScopeSet, account: &Account) -> Result<AccessToken>;

	/// Prompts the user to sign in.
	async fn acquire_interactive(&self, scopes: &ScopeSet, mode: &InteractionMode) -> Result<Authentication>;

	/// Completes a handoff started by a previous run. `Ok(None)` when nothing is pending.
	async fn complete_handoff(&self, session_id: &str) -> Result<Option<Authentication>>;
}

/// Durable storage for the signed-in account.
pub trait CredentialStore: Send + Sync {
	fn load_account(&self) -> Result<Option<Account>>;
	fn save_account(&self, account: &Account) -> Result<()>;
	fn clear(&self) -> Result<()>;
}

/// Account stored as a JSON file, readable only by the owner on unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
	path: PathBuf,
}

impl FileCredentialStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl CredentialStore for FileCredentialStore {
	fn load_account(&self) -> Result<Option<Account>> {
		if !self.path.exists() {
			return Ok(None);
		}
		let content = fs::read_to_string(&self.path)?;
		Ok(Some(serde_json::from_str(&content)?))
	}

	fn save_account(&self, account: &Account) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&self.path, serde_json::to_string_pretty(account)?)?;
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
		}
		Ok(())
	}

	fn clear(&self) -> Result<()> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
	account: Mutex<Option<Account>>,
}

impl MemoryCredentialStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_account(account: Account) -> Self {
		Self {
			account: Mutex::new(Some(account)),
		}
	}
}

impl CredentialStore for MemoryCredentialStore {
	fn load_account(&self) -> Result<Option<Account>> {
		Ok(self.account.lock().clone())
	}

	fn save_account(&self, account: &Account) -> Result<()> {
		*self.account.lock() = Some(account.clone());
		Ok(())
	}

	fn clear(&self) -> Result<()> {
		self.account.lock().take();
		Ok(())
	}
}

/// Provider that hands out a fixed token for one account.
///
/// Backs the stdio bridge when the host injects a token out of band.
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
	account: Account,
	token: String,
	lifetime: Duration,
}

impl StaticIdentityProvider {
	pub fn new(account: Account, token: impl Into<String>, lifetime: Duration) -> Self {
		Self {
			account,
			token: token.into(),
			lifetime,
		}
	}
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
	async fn acquire_silent(&self, scopes: &ScopeSet, _account: &Account) -> Result<AccessToken> {
		Ok(AccessToken::new(self.token.clone(), scopes.clone(), self.lifetime))
	}

	async fn acquire_interactive(&self, scopes: &ScopeSet, _mode: &InteractionMode) -> Result<Authentication> {
		Ok(Authentication {
			account: self.account.clone(),
			token: AccessToken::new(self.token.clone(), scopes.clone(), self.lifetime),
		})
	}

	async fn complete_handoff(&self, _session_id: &str) -> Result<Option<Authentication>> {
		Ok(None)
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn scope_set_normalizes_order_and_duplicates() {
		let a = ScopeSet::new(["parks.write", " parks.read", "parks.read", ""]);
		let b = ScopeSet::new(["parks.read", "parks.write"]);
		assert_eq!(a, b);
		assert_eq!(a.to_string(), "parks.read parks.write");
	}

	#[tokio::test(start_paused = true)]
	async fn token_validity_respects_margin() {
		let token = AccessToken::new("t", ScopeSet::new(["a", "b"]), Duration::from_secs(120));
		assert!(token.is_valid_for(Duration::from_secs(60)));
		assert!(token.covers(&ScopeSet::new(["a"])));
		assert!(!token.covers(&ScopeSet::new(["c"])));

		tokio::time::advance(Duration::from_secs(61)).await;
		assert!(!token.is_valid_for(Duration::from_secs(60)));
	}

	#[test]
	fn token_debug_hides_value() {
		let token = AccessToken::new("secret-value", ScopeSet::default(), Duration::from_secs(1));
		assert!(!format!("{token:?}").contains("secret-value"));
	}

	#[test]
	fn file_store_round_trips_and_clears() {
		let tmp = TempDir::new().unwrap();
		let store = FileCredentialStore::new(tmp.path().join("ember").join("account.json"));

		assert_eq!(store.load_account().unwrap(), None);
		let account = Account::new("acct-1", "ranger@example.com");
		store.save_account(&account).unwrap();
		assert_eq!(store.load_account().unwrap(), Some(account));

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let mode = fs::metadata(store.path()).unwrap().permissions().mode();
			assert_eq!(mode & 0o777, 0o600);
		}

		store.clear().unwrap();
		store.clear().unwrap();
		assert_eq!(store.load_account().unwrap(), None);
	}

	#[test]
	fn interaction_mode_follows_session_id() {
		assert_eq!(InteractionMode::for_session(None), InteractionMode::Overlay);
		assert_eq!(
			InteractionMode::for_session(Some("s-1")),
			InteractionMode::Handoff {
				session_id: "s-1".into()
			}
		);
	}
}
