//! Wire types for the host/embedded envelope protocol.
//!
//! This crate contains the serde-serializable types exchanged with the host
//! page across the embedding boundary. These types represent the "protocol
//! layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and payload validation
//! - **Closed**: Envelope kinds form a fixed enumeration tied to [`PROTOCOL_VERSION`]
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Dispatch, trust assessment and transport live in `ember-runtime`.

pub mod command;
pub mod context;
pub mod envelope;

pub use command::*;
pub use context::*;
pub use envelope::*;
