//! Inbound command dispatch.
//!
//! The router is the only bus subscriber for host commands. Each envelope is
//! validated against its kind's schema and handed to exactly one component:
//!
//! | kind         | handler                         |
//! |--------------|---------------------------------|
//! | `setContext` | [`ContextStore`]                |
//! | `navigate`   | [`RouteSync`]                   |
//! | `signOut`    | [`SessionCoordinator`]          |
//!
//! Invalid payloads are logged and dropped; they never reach a component.

use std::sync::Arc;

use ember_protocol::{Envelope, EnvelopeKind, InboundCommand};
use ember_runtime::{MessageBus, Result, Subscription};
use parking_lot::Mutex;

use crate::context::ContextStore;
use crate::route::RouteSync;
use crate::session::SessionCoordinator;

/// Kinds the router subscribes to.
pub const ROUTED_KINDS: [EnvelopeKind; 3] = [EnvelopeKind::SetContext, EnvelopeKind::Navigate, EnvelopeKind::SignOut];

/// Where an envelope went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
	Context,
	Navigation,
	Session,
	/// Payload failed validation.
	Dropped(String),
}

/// Components commands are routed to.
#[derive(Clone)]
pub struct RouteTargets {
	pub context: ContextStore,
	pub route: RouteSync,
	pub session: SessionCoordinator,
}

pub struct CommandRouter {
	targets: Arc<RouteTargets>,
	subscriptions: Mutex<Vec<Subscription>>,
}

impl CommandRouter {
	/// Creates a router without subscribing; see [`attach`](Self::attach).
	pub fn new(targets: RouteTargets) -> Self {
		Self {
			targets: Arc::new(targets),
			subscriptions: Mutex::new(Vec::new()),
		}
	}

	/// Creates a router subscribed to every routed kind on `bus`.
	pub fn attach(bus: &MessageBus, targets: RouteTargets) -> Self {
		let router = Self::new(targets);
		let subscriptions = ROUTED_KINDS
			.into_iter()
			.map(|kind| {
				let targets = Arc::clone(&router.targets);
				bus.subscribe(kind, move |envelope| route(&targets, envelope).map(|_| ()))
			})
			.collect();
		*router.subscriptions.lock() = subscriptions;
		router
	}

	/// Validates and dispatches one envelope.
	pub fn route(&self, envelope: &Envelope) -> Result<Routed> {
		route(&self.targets, envelope)
	}

	pub fn is_attached(&self) -> bool {
		!self.subscriptions.lock().is_empty()
	}

	/// Revokes every bus subscription.
	pub fn detach(&self) {
		let revoked = std::mem::take(&mut *self.subscriptions.lock());
		tracing::debug!(subscriptions = revoked.len(), "Command router detached");
	}
}

fn route(targets: &RouteTargets, envelope: &Envelope) -> Result<Routed> {
	let command = match InboundCommand::parse(envelope) {
		Ok(command) => command,
		Err(e) => {
			tracing::warn!(kind = %envelope.kind, error = %e, "Dropping invalid command");
			return Ok(Routed::Dropped(e.reason));
		}
	};

	tracing::debug!(kind = %command.kind(), trust = ?envelope.origin_trust, "Routing command");
	match command {
		InboundCommand::SetContext { entity, request_id } => {
			targets.context.apply_set_context(entity, request_id)?;
			Ok(Routed::Context)
		}
		InboundCommand::Navigate { target } => {
			targets.route.handle_navigate(&target)?;
			Ok(Routed::Navigation)
		}
		InboundCommand::SignOut => {
			targets.session.handle_sign_out(envelope)?;
			Ok(Routed::Session)
		}
	}
}

impl std::fmt::Debug for CommandRouter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandRouter")
			.field("attached", &self.is_attached())
			.finish()
	}
}
