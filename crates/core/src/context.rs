//! Host-provided scoping context.
//!
//! In hosted mode the host owns the current [`ContextEntity`]; the store asks
//! for it with `requestContext` and holds whatever the host last sent with
//! `setContext`. Standalone mode has no host, so "no context" is a valid
//! steady state and keys are scoped by [`STANDALONE_SCOPE`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ember_protocol::{ContextEntity, EnvelopeKind};
use ember_runtime::{Error, MessageBus, PendingRequests, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

/// Scope segment used for cache keys when running without a host.
pub const STANDALONE_SCOPE: &str = "standalone";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextMode {
	Hosted { session_id: String },
	Standalone,
}

impl ContextMode {
	pub fn for_session(session_id: Option<&str>) -> Self {
		match session_id {
			Some(id) => ContextMode::Hosted {
				session_id: id.to_string(),
			},
			None => ContextMode::Standalone,
		}
	}
}

/// Holds the current context entity and gates consumers until it arrives.
#[derive(Clone)]
pub struct ContextStore {
	inner: Arc<Inner>,
}

struct Inner {
	bus: Arc<MessageBus>,
	mode: ContextMode,
	timeout: Duration,
	current: watch::Sender<Option<ContextEntity>>,
	waiters: PendingRequests<ContextEntity>,
	outstanding: Mutex<Option<Outstanding>>,
	active: AtomicBool,
}

/// The `requestContext` currently awaiting an answer.
#[derive(Debug, Clone, Copy)]
struct Outstanding {
	id: u64,
	sent_at: Instant,
}

impl ContextStore {
	pub fn new(bus: Arc<MessageBus>, mode: ContextMode, timeout: Duration) -> Self {
		let (current, _) = watch::channel(None);
		Self {
			inner: Arc::new(Inner {
				bus,
				mode,
				timeout,
				current,
				waiters: PendingRequests::new(),
				outstanding: Mutex::new(None),
				active: AtomicBool::new(true),
			}),
		}
	}

	/// Asks the host for the current context. A no-op in standalone mode.
	pub fn init(&self) -> Result<()> {
		match &self.inner.mode {
			ContextMode::Standalone => {
				tracing::debug!("Standalone mode, no host context to request");
				Ok(())
			}
			ContextMode::Hosted { session_id } => {
				tracing::info!(session_id = %session_id, "Requesting host context");
				self.request()
			}
		}
	}

	/// Resolves with the held entity, or with the next non-null one the host sends.
	///
	/// # Errors
	///
	/// - [`Error::Standalone`] in standalone mode with nothing held
	/// - [`Error::Timeout`] if the host does not answer in time; the next call asks again
	/// - [`Error::Disposed`] if the store is disposed first
	pub async fn wait_for_context(&self) -> Result<ContextEntity> {
		if !self.is_active() {
			return Err(Error::Disposed("ContextStore"));
		}
		if let Some(entity) = self.current() {
			return Ok(entity);
		}
		if self.is_standalone() {
			return Err(Error::Standalone);
		}

		let waiter = self.inner.waiters.register();
		if let Some(entity) = self.current() {
			return Ok(entity);
		}
		self.request()?;

		let result = waiter.wait(self.inner.timeout).await;
		if let Err(e) = &result {
			if e.is_timeout() {
				tracing::warn!(timeout_ms = self.inner.timeout.as_millis() as u64, "Host did not send context");
				self.inner.outstanding.lock().take();
			}
		}
		result
	}

	/// Replaces the held entity with `entity` (or clears it) and wakes waiters.
	///
	/// Updates are wholesale; no field of the previous entity survives.
	/// Ignored once the store is disposed.
	pub fn apply_set_context(&self, entity: Option<ContextEntity>, request_id: Option<u64>) -> Result<()> {
		if !self.is_active() {
			tracing::debug!("Ignoring setContext after dispose");
			return Ok(());
		}

		{
			let mut outstanding = self.inner.outstanding.lock();
			if let Some(id) = request_id {
				if outstanding.as_ref().map(|o| o.id) != Some(id) {
					tracing::debug!(request_id = id, "setContext for unknown or superseded request");
				}
			}
			if entity.is_some() {
				*outstanding = None;
			}
		}

		self.inner.current.send_replace(entity.clone());
		match entity {
			Some(entity) => {
				let context_id = entity.id.clone();
				let resolved = self.inner.waiters.resolve_all(entity);
				tracing::info!(context_id = %context_id, waiters = resolved, "Context set");
			}
			None => tracing::info!("Context cleared by host"),
		}
		Ok(())
	}

	pub fn current(&self) -> Option<ContextEntity> {
		self.inner.current.borrow().clone()
	}

	/// Receiver notified on every `setContext`.
	pub fn watch(&self) -> watch::Receiver<Option<ContextEntity>> {
		self.inner.current.subscribe()
	}

	/// Leading cache-key segment: the context id, or [`STANDALONE_SCOPE`].
	///
	/// [`None`] in hosted mode until the host has sent a context.
	pub fn scope(&self) -> Option<String> {
		match self.current() {
			Some(entity) => Some(entity.id),
			None if self.is_standalone() => Some(STANDALONE_SCOPE.to_string()),
			None => None,
		}
	}

	pub fn mode(&self) -> &ContextMode {
		&self.inner.mode
	}

	pub fn is_standalone(&self) -> bool {
		self.inner.mode == ContextMode::Standalone
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::SeqCst)
	}

	/// Number of callers suspended in [`wait_for_context`](Self::wait_for_context).
	pub fn pending_waiters(&self) -> usize {
		self.inner.waiters.len()
	}

	/// Stops accepting host messages and fails every suspended waiter.
	pub fn dispose(&self) {
		if !self.inner.active.swap(false, Ordering::SeqCst) {
			return;
		}
		self.inner.outstanding.lock().take();
		let failed = self.inner.waiters.fail_all(|| Error::Disposed("ContextStore"));
		tracing::debug!(waiters = failed, "Context store disposed");
	}

	/// Publishes `requestContext` unless a recent one is still unanswered.
	fn request(&self) -> Result<()> {
		let mut outstanding = self.inner.outstanding.lock();
		if let Some(pending) = *outstanding {
			if pending.sent_at.elapsed() < self.inner.timeout {
				return Ok(());
			}
			tracing::debug!(request_id = pending.id, "Previous context request expired, asking again");
		}

		let id = self.inner.waiters.allocate_id();
		self.inner
			.bus
			.publish_request(EnvelopeKind::RequestContext, Value::Null, id)?;
		*outstanding = Some(Outstanding {
			id,
			sent_at: Instant::now(),
		});
		Ok(())
	}
}

impl std::fmt::Debug for ContextStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ContextStore")
			.field("mode", &self.inner.mode)
			.field("current", &self.current().map(|e| e.id))
			.field("active", &self.is_active())
			.finish()
	}
}
