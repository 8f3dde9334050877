//! Navigation sync between the embedded app and the host.
//!
//! Local navigations are reported with `pathChange` (and `paramChange` when
//! the query changed). Host `navigate` commands are applied locally after
//! recording the target as already emitted, so the router hook that fires for
//! the host's own navigation does not bounce back as a `pathChange`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_protocol::{OutboundMessage, PathChange};
use ember_runtime::{MessageBus, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// What to do after applying a host-initiated navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EchoPolicy {
	/// Emit nothing; the host already knows where it sent us.
	#[default]
	Suppress,
	/// Emit one `pathChange` confirming the navigation.
	Confirm,
}

/// Performs navigation inside the embedded app.
pub trait Navigator: Send + Sync {
	fn navigate(&self, url: &str) -> Result<()>;
}

/// Path plus normalized query.
///
/// Query pairs are decoded and sorted by name, so `?b=2&a=1` and `?a=1&b=2`
/// compare equal. Fragments are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
	pub path: String,
	pub query: Vec<(String, String)>,
}

impl Location {
	pub fn parse(url: &str) -> Self {
		let url = url.split('#').next().unwrap_or_default();
		let (path, query) = match url.split_once('?') {
			Some((path, query)) => (path, query),
			None => (url, ""),
		};

		let path = path.trim();
		let path = if path.is_empty() {
			"/".to_string()
		} else if path.starts_with('/') {
			path.to_string()
		} else {
			format!("/{path}")
		};

		let mut query: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
		query.sort_by(|a, b| a.0.cmp(&b.0));

		Self { path, query }
	}

	/// Serialized query without the leading `?`.
	pub fn query_string(&self) -> String {
		form_urlencoded::Serializer::new(String::new())
			.extend_pairs(self.query.iter())
			.finish()
	}

	pub fn to_url(&self) -> String {
		if self.query.is_empty() {
			self.path.clone()
		} else {
			format!("{}?{}", self.path, self.query_string())
		}
	}
}

/// Bidirectional navigation sync with dedupe and echo suppression.
#[derive(Clone)]
pub struct RouteSync {
	inner: Arc<Inner>,
}

struct Inner {
	bus: Arc<MessageBus>,
	navigator: Arc<dyn Navigator>,
	app_name: String,
	echo: EchoPolicy,
	last_emitted: Mutex<Option<Location>>,
	active: AtomicBool,
}

impl RouteSync {
	pub fn new(
		bus: Arc<MessageBus>,
		navigator: Arc<dyn Navigator>,
		app_name: impl Into<String>,
		echo: EchoPolicy,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				bus,
				navigator,
				app_name: app_name.into(),
				echo,
				last_emitted: Mutex::new(None),
				active: AtomicBool::new(true),
			}),
		}
	}

	/// Router hook: the embedded app navigated to `url`.
	///
	/// Returns whether anything was published.
	pub fn on_local_navigation(&self, url: &str) -> Result<bool> {
		if !self.is_active() {
			return Ok(false);
		}

		let next = Location::parse(url);
		let previous = {
			let mut last = self.inner.last_emitted.lock();
			if last.as_ref() == Some(&next) {
				tracing::trace!(url = %next.to_url(), "Navigation already reported");
				return Ok(false);
			}
			last.replace(next.clone())
		};

		self.publish_path(&next)?;

		let query_changed = previous.map_or(!next.query.is_empty(), |prev| prev.query != next.query);
		if query_changed {
			self.inner
				.bus
				.send(OutboundMessage::ParamChange(next.query_string()).into_envelope())?;
		}
		Ok(true)
	}

	/// Host command: navigate locally to `target` without echoing it back.
	pub fn handle_navigate(&self, target: &str) -> Result<()> {
		if !self.is_active() {
			tracing::debug!(url = %target, "Ignoring navigate after dispose");
			return Ok(());
		}

		let location = Location::parse(target);
		let url = location.to_url();
		let previous = self.inner.last_emitted.lock().replace(location.clone());

		tracing::debug!(url = %url, "Host navigation");
		if let Err(e) = self.inner.navigator.navigate(&url) {
			tracing::warn!(url = %url, error = %e, "Host navigation failed");
			*self.inner.last_emitted.lock() = previous;
			return Err(e);
		}

		if self.inner.echo == EchoPolicy::Confirm {
			self.publish_path(&location)?;
		}
		Ok(())
	}

	pub fn last_emitted(&self) -> Option<Location> {
		self.inner.last_emitted.lock().clone()
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::SeqCst)
	}

	/// Stops reacting to both local and host navigation.
	pub fn dispose(&self) {
		self.inner.active.store(false, Ordering::SeqCst);
	}

	fn publish_path(&self, location: &Location) -> Result<()> {
		let change = PathChange {
			app_name: self.inner.app_name.clone(),
			url: location.to_url(),
		};
		self.inner
			.bus
			.send(OutboundMessage::PathChange(change).into_envelope())
	}
}
