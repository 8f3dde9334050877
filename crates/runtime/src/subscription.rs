//! Handler registrations on a [`MessageBus`](crate::MessageBus).
//!
//! [`MessageBus::subscribe`](crate::MessageBus::subscribe) hands back a
//! [`Subscription`]. The handler stays registered until the subscription is
//! dropped or [`unsubscribe`](Subscription::unsubscribe)d.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ember_protocol::EnvelopeKind;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Identifies one handler registration, unique within the process.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Handler table that a subscription can remove itself from.
pub(crate) trait Registry: Send + Sync {
	fn remove(&self, id: HandlerId);
}

impl<H: Send> Registry for Mutex<IndexMap<HandlerId, H>> {
	fn remove(&self, id: HandlerId) {
		self.lock().shift_remove(&id);
	}
}

/// Live handler registration for one envelope kind.
///
/// Only a weak reference to the bus's handler table is held, so a
/// subscription that outlives its bus is inert.
pub struct Subscription {
	id: HandlerId,
	kind: EnvelopeKind,
	registry: Option<Weak<dyn Registry>>,
}

impl Subscription {
	pub(crate) fn new<H>(id: HandlerId, kind: EnvelopeKind, handlers: &Arc<Mutex<IndexMap<HandlerId, H>>>) -> Self
	where
		H: Send + 'static,
	{
		let registry: Weak<Mutex<IndexMap<HandlerId, H>>> = Arc::downgrade(handlers);
		let registry: Weak<dyn Registry> = registry;
		Self {
			id,
			kind,
			registry: Some(registry),
		}
	}

	pub fn id(&self) -> HandlerId {
		self.id
	}

	pub fn kind(&self) -> EnvelopeKind {
		self.kind
	}

	/// False once revoked or once the bus is gone.
	pub fn is_active(&self) -> bool {
		self.registry.as_ref().is_some_and(|weak| weak.strong_count() > 0)
	}

	/// Removes the handler now. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		self.revoke();
	}

	fn revoke(&mut self) {
		let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) else {
			return;
		};
		registry.remove(self.id);
		tracing::debug!(kind = %self.kind, handler_id = self.id, "Unsubscribed");
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.revoke();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("active", &self.is_active())
			.finish()
	}
}
