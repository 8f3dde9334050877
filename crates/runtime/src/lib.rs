//! ember-runtime: host boundary plumbing for the ember embedded client.
//!
//! - [`transport`]: framed JSON over byte streams or in-process channels
//! - [`MessageBus`]: typed envelope publish/subscribe with origin trust
//! - [`PendingRequests`]: correlation of requests over the fire-and-forget boundary
//! - [`Subscription`]: RAII handler registration

pub mod bus;
pub mod error;
pub mod pending;
pub mod subscription;
pub mod transport;
pub mod trust;

pub use bus::{EnvelopeHandler, MessageBus, Outbox};
pub use error::{AuthError, Error, FetchError, Result};
pub use pending::{PendingRequests, PendingResponse};
pub use subscription::{HandlerId, Subscription};
pub use transport::{Framing, HostEndpoint, PipeTransport, TransportParts, channel_transport};
pub use trust::TrustPolicy;
