//! Context-scoped query cache.
//!
//! Every key is `[context scope, segments..]`, so switching context isolates
//! entries without flushing anything. Per key:
//!
//! ```text
//! Idle -> Fetching -> Fresh -> (ttl) Stale -> Fetching -> Fresh | Error
//! ```
//!
//! At most one fetch per key is in flight; concurrent readers attach to it.
//! A fetch is retried once before the entry moves to `Error`.

mod entry;
mod key;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ember_runtime::{Error, FetchError, Result};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

pub use entry::{EntrySnapshot, EntryState};
use entry::{Entry, SharedFetch};
pub use key::QueryKey;

use crate::context::ContextStore;
use crate::session::SessionCoordinator;

/// Attempts per fetch: the first try plus one automatic retry.
pub const MAX_FETCH_ATTEMPTS: u32 = 2;

/// Remote data source behind the cache.
#[async_trait]
pub trait DataService: Send + Sync {
	async fn fetch(&self, key: &QueryKey, token: &str) -> Result<Value>;

	/// Applies `value` remotely and returns the server's response.
	async fn mutate(&self, key: &QueryKey, value: &Value, token: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
	pub ttl: Duration,
	pub gc_after: Duration,
}

impl Default for QueryOptions {
	fn default() -> Self {
		Self {
			ttl: Duration::from_secs(300),
			gc_after: Duration::from_secs(300),
		}
	}
}

/// Live view of one cache entry. Keeps the entry alive while held.
pub struct QueryObserver {
	key: QueryKey,
	rx: watch::Receiver<EntrySnapshot>,
}

impl QueryObserver {
	pub fn key(&self) -> &QueryKey {
		&self.key
	}

	pub fn current(&self) -> EntrySnapshot {
		self.rx.borrow().clone()
	}

	/// Waits for the next change and returns it.
	pub async fn changed(&mut self) -> Result<EntrySnapshot> {
		self.rx.changed().await.map_err(|_| Error::ChannelClosed)?;
		Ok(self.rx.borrow_and_update().clone())
	}
}

#[derive(Clone)]
pub struct QueryCache {
	inner: Arc<Inner>,
}

struct Inner {
	service: Arc<dyn DataService>,
	session: SessionCoordinator,
	context: ContextStore,
	options: QueryOptions,
	entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl QueryCache {
	pub fn new(
		service: Arc<dyn DataService>,
		session: SessionCoordinator,
		context: ContextStore,
		options: QueryOptions,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				service,
				session,
				context,
				options,
				entries: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Reads `segments` under the current context, fetching if needed.
	///
	/// In hosted mode this waits for the host context first.
	pub async fn read(&self, segments: &[&str]) -> Result<Value> {
		let key = self.scoped_key(segments).await?;
		self.read_key(key).await
	}

	pub async fn read_as<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
		let value = self.read(segments).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// Reads a fully scoped key.
	pub async fn read_key(&self, key: QueryKey) -> Result<Value> {
		self.collect_garbage();

		let fetch = {
			let now = Instant::now();
			let mut entries = self.inner.entries.lock();
			let entry = entries
				.entry(key.clone())
				.or_insert_with(|| Entry::new(self.inner.options.ttl));
			entry.last_access = now;
			entry.expire(now);

			if let Some(data) = entry.fresh_data() {
				tracing::trace!(key = %key, "Cache hit");
				return Ok(data.clone());
			}

			match &entry.in_flight {
				Some(fetch) => {
					tracing::debug!(key = %key, "Joining in-flight fetch");
					fetch.clone()
				}
				None => {
					let fetch = self.start_fetch(key.clone(), entry.generation);
					entry.state = EntryState::Fetching;
					entry.in_flight = Some(fetch.clone());
					entry.publish();
					fetch
				}
			}
		};

		Ok(fetch.await?)
	}

	/// Optimistically writes `value` under `segments`, then applies it remotely.
	///
	/// On success every entry under the `invalidate` prefixes (scoped like
	/// `segments`) is marked stale. On failure the entry is restored.
	pub async fn mutate(&self, segments: &[&str], value: Value, invalidate: &[&[&str]]) -> Result<Value> {
		let scope = self.scope().await?;
		let key = QueryKey::scoped(scope.clone(), segments);

		let (snapshot, generation) = {
			let now = Instant::now();
			let mut entries = self.inner.entries.lock();
			let entry = entries
				.entry(key.clone())
				.or_insert_with(|| Entry::new(self.inner.options.ttl));
			let snapshot = entry.snapshot();
			entry.generation += 1;
			entry.state = EntryState::Fresh;
			entry.data = Some(value.clone());
			entry.fetched_at = Some(now);
			entry.last_access = now;
			entry.publish();
			(snapshot, entry.generation)
		};

		let outcome = match self.inner.session.get_token(&[]).await {
			Ok(token) => self.inner.service.mutate(&key, &value, &token.value).await,
			Err(e) => Err(e),
		};

		match outcome {
			Ok(response) => {
				tracing::debug!(key = %key, "Mutation applied");
				for prefix in invalidate {
					self.invalidate_key_prefix(&QueryKey::scoped(scope.clone(), prefix));
				}
				Ok(response)
			}
			Err(e) => {
				tracing::warn!(key = %key, error = %e, "Mutation failed, rolling back");
				if let Some(entry) = self.inner.entries.lock().get_mut(&key) {
					if entry.generation == generation {
						entry.restore(snapshot);
					}
				}
				Err(match e {
					Error::Auth(_) => e,
					other => FetchError::new(key.to_string(), other.to_string(), 1).into(),
				})
			}
		}
	}

	/// Marks every entry under `prefix` in the current context stale.
	pub fn invalidate(&self, prefix: &[&str]) -> usize {
		match self.inner.context.scope() {
			Some(scope) => self.invalidate_key_prefix(&QueryKey::scoped(scope, prefix)),
			None => 0,
		}
	}

	/// Marks every entry whose key starts with `prefix` stale.
	///
	/// Fetches already in flight for those keys land `Stale`.
	pub fn invalidate_key_prefix(&self, prefix: &QueryKey) -> usize {
		let mut entries = self.inner.entries.lock();
		let mut count = 0;
		for (_, entry) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
			entry.generation += 1;
			if entry.state == EntryState::Fresh {
				entry.state = EntryState::Stale;
				entry.publish();
			}
			count += 1;
		}
		tracing::debug!(prefix = %prefix, count, "Invalidated");
		count
	}

	/// Subscribes to an entry's snapshots, creating it `Idle` if absent.
	pub async fn observe(&self, segments: &[&str]) -> Result<QueryObserver> {
		let key = self.scoped_key(segments).await?;
		let mut entries = self.inner.entries.lock();
		let entry = entries
			.entry(key.clone())
			.or_insert_with(|| Entry::new(self.inner.options.ttl));
		entry.last_access = Instant::now();
		let rx = entry.tx.subscribe();
		Ok(QueryObserver { key, rx })
	}

	/// Entry state under the current context, without touching it.
	pub fn snapshot(&self, segments: &[&str]) -> Option<EntrySnapshot> {
		let scope = self.inner.context.scope()?;
		self.snapshot_key(&QueryKey::scoped(scope, segments))
	}

	pub fn snapshot_key(&self, key: &QueryKey) -> Option<EntrySnapshot> {
		let mut entries = self.inner.entries.lock();
		let entry = entries.get_mut(key)?;
		entry.expire(Instant::now());
		Some(entry.snapshot())
	}

	/// Drops entries nobody observes that have been idle for `gc_after`.
	pub fn collect_garbage(&self) -> usize {
		let now = Instant::now();
		let gc_after = self.inner.options.gc_after;
		let mut entries = self.inner.entries.lock();
		let before = entries.len();
		entries.retain(|key, entry| {
			let keep =
				entry.is_observed() || entry.in_flight.is_some() || now.duration_since(entry.last_access) < gc_after;
			if !keep {
				tracing::trace!(key = %key, "Collected cache entry");
			}
			keep
		});
		before - entries.len()
	}

	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	async fn scope(&self) -> Result<String> {
		match self.inner.context.scope() {
			Some(scope) => Ok(scope),
			None => Ok(self.inner.context.wait_for_context().await?.id),
		}
	}

	async fn scoped_key(&self, segments: &[&str]) -> Result<QueryKey> {
		Ok(QueryKey::scoped(self.scope().await?, segments))
	}

	fn start_fetch(&self, key: QueryKey, generation: u64) -> SharedFetch {
		let inner = Arc::clone(&self.inner);
		async move {
			let result = inner.fetch_with_retry(&key).await;
			inner.complete_fetch(&key, generation, &result);
			result
		}
		.boxed()
		.shared()
	}
}

impl Inner {
	async fn fetch_with_retry(&self, key: &QueryKey) -> std::result::Result<Value, FetchError> {
		let mut last_error = String::new();
		for attempt in 1..=MAX_FETCH_ATTEMPTS {
			let token = self
				.session
				.get_token(&[])
				.await
				.map_err(|e| FetchError::new(key.to_string(), e.to_string(), attempt))?;

			match self.service.fetch(key, &token.value).await {
				Ok(value) => {
					tracing::debug!(key = %key, attempt, "Fetched");
					return Ok(value);
				}
				Err(e) => {
					tracing::warn!(key = %key, attempt, error = %e, "Fetch attempt failed");
					last_error = e.to_string();
				}
			}
		}
		Err(FetchError::new(key.to_string(), last_error, MAX_FETCH_ATTEMPTS))
	}

	fn complete_fetch(&self, key: &QueryKey, generation: u64, result: &std::result::Result<Value, FetchError>) {
		let mut entries = self.entries.lock();
		let Some(entry) = entries.get_mut(key) else {
			return;
		};

		entry.in_flight = None;
		let current = entry.generation == generation;
		match result {
			Ok(value) => {
				entry.data = Some(value.clone());
				entry.fetched_at = Some(Instant::now());
				entry.state = if current { EntryState::Fresh } else { EntryState::Stale };
			}
			Err(e) => {
				entry.state = EntryState::Error(e.message.clone());
			}
		}
		entry.publish();
	}
}

impl std::fmt::Debug for QueryCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueryCache")
			.field("entries", &self.len())
			.field("options", &self.inner.options)
			.finish()
	}
}
