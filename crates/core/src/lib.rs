//! ember: client runtime for apps embedded in a host shell.
//!
//! The host and the embedded app talk through typed envelopes carried by an
//! [`ember_runtime::MessageBus`]. On top of the bus this crate provides:
//!
//! - **Session**: authentication state machine with coalesced token acquisition
//! - **Context**: the host-provided scoping entity, requested and awaited
//! - **Query cache**: context-scoped, single-flight fetches with optimistic mutation
//! - **Route sync**: navigation reporting with dedupe and echo suppression
//! - **Command router**: validated dispatch of host commands
//!
//! # Architecture
//!
//! ```text
//!            host
//!             │ envelopes
//!      ┌──────▼──────┐
//!      │ MessageBus  │
//!      └──────┬──────┘
//!             │ navigate / setContext / signOut
//!      ┌──────▼──────┐
//!      │CommandRouter│
//!      └─┬────┬────┬─┘
//!        │    │    │
//!  RouteSync  │  SessionCoordinator
//!        ContextStore      │
//!             │            │
//!             └─QueryCache─┘
//! ```
//!
//! [`EmbeddedRuntime`] wires all of it together from a [`RuntimeConfig`].

pub mod config;
pub mod context;
pub mod gate;
pub mod query;
pub mod route;
pub mod router;
pub mod runtime;
pub mod session;

pub use config::RuntimeConfig;
pub use context::{ContextMode, ContextStore, STANDALONE_SCOPE};
pub use ember_protocol::{ContextEntity, Envelope, EnvelopeKind, OriginTrust};
pub use ember_runtime::{AuthError, Error, FetchError, MessageBus, Outbox, Result, TrustPolicy};
pub use gate::Gate;
pub use query::{DataService, EntrySnapshot, EntryState, QueryCache, QueryKey, QueryObserver, QueryOptions};
pub use route::{EchoPolicy, Location, Navigator, RouteSync};
pub use router::{CommandRouter, RouteTargets, Routed};
pub use runtime::{Collaborators, EmbeddedRuntime};
pub use session::{
	AccessToken, Account, Authentication, CredentialStore, FileCredentialStore, IdentityProvider, InteractionMode,
	MemoryCredentialStore, ScopeSet, SessionCoordinator, SessionOptions, SessionPhase, SessionState,
	StaticIdentityProvider,
};
