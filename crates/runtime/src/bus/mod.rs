//! Envelope pub/sub over the host boundary.
//!
//! The [`MessageBus`] is the only component that touches the transport:
//!
//! - [`publish`](MessageBus::publish) queues an outbound envelope (fire-and-forget)
//! - [`subscribe`](MessageBus::subscribe) registers a handler for one inbound kind
//! - [`deliver`](MessageBus::deliver) decodes one raw inbound message and dispatches it
//! - [`run`](MessageBus::run) drives a transport: reader, writer and inbound loop
//!
//! # Message Flow
//!
//! 1. Transport reader forwards decoded JSON into the inbound channel
//! 2. The inbound loop decodes a [`WireEnvelope`]; unknown kinds are dropped
//! 3. The declared origin is assessed against the [`TrustPolicy`]
//! 4. Handlers for the kind run in registration order, each isolated from the others
//!
//! Handlers are synchronous and run to completion before the next envelope is
//! taken, so envelopes of one kind are seen in send order.


use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_protocol::{Direction, Envelope, EnvelopeKind, OriginTrust, PROTOCOL_VERSION, WireEnvelope};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::error::{Error, Result};
use crate::subscription::{HandlerId, Subscription, next_handler_id};
use crate::transport::TransportParts;
use crate::trust::TrustPolicy;

/// Callback invoked for each matching inbound envelope.
pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
	kind: EnvelopeKind,
	handler: EnvelopeHandler,
}

/// Direct access to the outbound queue of a bus without a transport.
///
/// Used when the embedding layer forwards envelopes itself, and by tests that
/// need to inspect exactly what was published.
pub struct Outbox {
	rx: mpsc::UnboundedReceiver<WireEnvelope>,
}

impl Outbox {
	/// Next queued envelope, if any.
	pub fn try_next(&mut self) -> Option<WireEnvelope> {
		self.rx.try_recv().ok()
	}

	/// Waits for the next envelope. Returns [`None`] once the bus is closed.
	pub async fn next(&mut self) -> Option<WireEnvelope> {
		self.rx.recv().await
	}

	/// Takes everything queued so far.
	pub fn drain(&mut self) -> Vec<WireEnvelope> {
		std::iter::from_fn(|| self.try_next()).collect()
	}
}

/// Typed envelope transport with per-kind dispatch.
pub struct MessageBus {
	trust: TrustPolicy,
	/// Origin stamped on outbound envelopes.
	origin: Option<String>,
	outbound_tx: Mutex<Option<mpsc::UnboundedSender<WireEnvelope>>>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<WireEnvelope>>>,
	transport: Mutex<Option<TransportParts>>,
	handlers: Arc<Mutex<IndexMap<HandlerId, HandlerEntry>>>,
	closed: AtomicBool,
	shutdown: Notify,
}

impl MessageBus {
	/// Creates a bus that will drive `parts` once [`run`](Self::run) is called.
	pub fn new(parts: TransportParts, trust: TrustPolicy) -> Self {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		Self {
			trust,
			origin: None,
			outbound_tx: Mutex::new(Some(outbound_tx)),
			outbound_rx: Mutex::new(Some(outbound_rx)),
			transport: Mutex::new(Some(parts)),
			handlers: Arc::new(Mutex::new(IndexMap::new())),
			closed: AtomicBool::new(false),
			shutdown: Notify::new(),
		}
	}

	/// Creates a bus with no transport; outbound envelopes go to the returned [`Outbox`]
	/// and inbound messages are fed through [`deliver`](Self::deliver).
	pub fn detached(trust: TrustPolicy) -> (Self, Outbox) {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let bus = Self {
			trust,
			origin: None,
			outbound_tx: Mutex::new(Some(outbound_tx)),
			outbound_rx: Mutex::new(None),
			transport: Mutex::new(None),
			handlers: Arc::new(Mutex::new(IndexMap::new())),
			closed: AtomicBool::new(false),
			shutdown: Notify::new(),
		};
		(bus, Outbox { rx: outbound_rx })
	}

	pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
		self.origin = Some(origin.into());
		self
	}

	/// Sends one envelope toward the host. No retry: delivery is the host's business.
	pub fn publish(&self, kind: EnvelopeKind, payload: Value) -> Result<()> {
		self.send(Envelope::outbound(kind, payload))
	}

	/// Like [`publish`](Self::publish), stamping a correlation id.
	pub fn publish_request(&self, kind: EnvelopeKind, payload: Value, request_id: u64) -> Result<()> {
		self.send(Envelope::outbound(kind, payload).with_request_id(request_id))
	}

	pub fn send(&self, envelope: Envelope) -> Result<()> {
		if envelope.kind.direction() != Direction::Outbound {
			tracing::warn!(kind = %envelope.kind, "Refusing to publish inbound-only kind");
			return Err(Error::Transport(format!("{} is not an outbound kind", envelope.kind)));
		}

		let wire = envelope.to_wire(self.origin.as_deref());
		let guard = self.outbound_tx.lock();
		let Some(tx) = guard.as_ref() else {
			tracing::debug!(kind = %envelope.kind, "Publish after close dropped");
			return Err(Error::ChannelClosed);
		};

		tracing::debug!(kind = %envelope.kind, request_id = ?envelope.request_id, "Publishing envelope");
		tx.send(wire).map_err(|_| Error::ChannelClosed)
	}

	/// Registers `handler` for inbound envelopes of `kind`.
	///
	/// The handler stays registered until the returned [`Subscription`] is dropped.
	pub fn subscribe<F>(&self, kind: EnvelopeKind, handler: F) -> Subscription
	where
		F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
	{
		let id: HandlerId = next_handler_id();
		self.handlers.lock().insert(
			id,
			HandlerEntry {
				kind,
				handler: Arc::new(handler),
			},
		);
		tracing::debug!(kind = %kind, handler_id = id, "Subscribed");
		Subscription::new(id, kind, &self.handlers)
	}

	/// Number of live handlers for `kind`.
	pub fn handler_count(&self, kind: EnvelopeKind) -> usize {
		self.handlers.lock().values().filter(|entry| entry.kind == kind).count()
	}

	/// Decodes one raw inbound message and dispatches it.
	///
	/// Malformed messages, unknown kinds and outbound-only kinds are logged and
	/// dropped. Returns the number of handlers that ran.
	pub fn deliver(&self, message: Value) -> usize {
		let wire: WireEnvelope = match serde_json::from_value(message) {
			Ok(wire) => wire,
			Err(e) => {
				tracing::warn!(error = %e, "Dropping malformed envelope");
				return 0;
			}
		};

		let Some(kind) = EnvelopeKind::parse(&wire.kind) else {
			tracing::debug!(kind = %wire.kind, "Unknown envelope kind (forward-compatible, ignored)");
			return 0;
		};

		if kind.direction() != Direction::Inbound {
			tracing::warn!(kind = %kind, "Dropping outbound-only kind received from host");
			return 0;
		}

		if let Some(version) = wire.version.filter(|v| *v > PROTOCOL_VERSION) {
			tracing::debug!(kind = %kind, version, "Envelope from newer protocol version");
		}

		let origin_trust = self.trust.assess(wire.origin.as_deref());
		if origin_trust == OriginTrust::Unverified {
			tracing::debug!(kind = %kind, origin = ?wire.origin, "Envelope origin not verified");
		}

		let envelope = Envelope {
			kind,
			payload: wire.payload,
			request_id: wire.request_id,
			origin_trust,
		};
		self.dispatch(&envelope)
	}

	/// Runs every handler registered for `envelope.kind`.
	///
	/// A handler that errors or panics is logged; the remaining handlers still run.
	pub fn dispatch(&self, envelope: &Envelope) -> usize {
		if self.is_closed() {
			return 0;
		}

		let handlers: Vec<(HandlerId, EnvelopeHandler)> = self
			.handlers
			.lock()
			.iter()
			.filter(|(_, entry)| entry.kind == envelope.kind)
			.map(|(id, entry)| (*id, Arc::clone(&entry.handler)))
			.collect();

		for (id, handler) in &handlers {
			match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					tracing::warn!(kind = %envelope.kind, handler_id = id, error = %e, "Envelope handler failed");
				}
				Err(_) => {
					tracing::error!(kind = %envelope.kind, handler_id = id, "Envelope handler panicked");
				}
			}
		}

		handlers.len()
	}

	/// Runs the transport until the host side closes.
	///
	/// Spawns the transport reader and an outbound writer task, then processes
	/// inbound messages one at a time on the calling task.
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let parts = self
			.transport
			.lock()
			.take()
			.ok_or_else(|| Error::Transport("bus has no transport or is already running".to_string()))?;
		let mut outbound_rx = self
			.outbound_rx
			.lock()
			.take()
			.ok_or_else(|| Error::Transport("outbound queue already taken".to_string()))?;

		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!(error = %e, "Transport read error");
			}
		});

		tokio::spawn(async move {
			while let Some(wire) = outbound_rx.recv().await {
				let message = match serde_json::to_value(&wire) {
					Ok(message) => message,
					Err(e) => {
						tracing::error!(kind = %wire.kind, error = %e, "Failed to encode envelope");
						continue;
					}
				};
				if let Err(e) = sender.send(message).await {
					tracing::error!(error = %e, "Transport write error");
					break;
				}
			}
		});

		loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(message) => {
						self.deliver(message);
					}
					None => {
						tracing::debug!("Inbound channel closed");
						break;
					}
				},
				_ = self.shutdown.notified() => {
					tracing::debug!("Bus closed, leaving inbound loop");
					reader_handle.abort();
					return Ok(());
				}
			}
		}

		let _ = reader_handle.await;
		Ok(())
	}

	/// Stops publishing and drops every handler. Queued outbound envelopes are still flushed.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.outbound_tx.lock().take();
		self.handlers.lock().clear();
		self.shutdown.notify_one();
		tracing::debug!("Message bus closed");
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

impl std::fmt::Debug for MessageBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageBus")
			.field("trust", &self.trust)
			.field("origin", &self.origin)
			.field("handlers", &self.handlers.lock().len())
			.field("closed", &self.is_closed())
			.finish()
	}
}
