//! Envelope framing shared by both directions of the boundary.
//!
//! Every message crossing the boundary is a [`WireEnvelope`]: a `kind` tag, a
//! kind-specific `payload`, and optional correlation/origin metadata. The
//! runtime lifts recognized wire envelopes into typed [`Envelope`]s; anything
//! whose `kind` is not in [`EnvelopeKind`] is dropped before dispatch.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the envelope kind enumeration understood by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Closed set of envelope kinds for [`PROTOCOL_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
	/// Embedded → host: query string changed.
	ParamChange,
	/// Embedded → host: path changed.
	PathChange,
	/// Embedded → host: ask the host for the current context entity.
	RequestContext,
	/// Host → embedded: navigate to a path.
	Navigate,
	/// Host → embedded: replace the current context entity.
	SetContext,
	/// Host → embedded: end the authenticated session.
	SignOut,
}

/// Which way an envelope kind travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// Embedded runtime toward the host.
	Outbound,
	/// Host toward the embedded runtime.
	Inbound,
}

impl EnvelopeKind {
	/// Every kind known to this protocol version.
	pub const ALL: [EnvelopeKind; 6] = [
		EnvelopeKind::ParamChange,
		EnvelopeKind::PathChange,
		EnvelopeKind::RequestContext,
		EnvelopeKind::Navigate,
		EnvelopeKind::SetContext,
		EnvelopeKind::SignOut,
	];

	/// Wire tag for this kind.
	pub fn as_str(self) -> &'static str {
		match self {
			EnvelopeKind::ParamChange => "paramChange",
			EnvelopeKind::PathChange => "pathChange",
			EnvelopeKind::RequestContext => "requestContext",
			EnvelopeKind::Navigate => "navigate",
			EnvelopeKind::SetContext => "setContext",
			EnvelopeKind::SignOut => "signOut",
		}
	}

	/// Looks up a wire tag. Returns [`None`] for kinds from newer protocol versions.
	pub fn parse(tag: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
	}

	pub fn direction(self) -> Direction {
		match self {
			EnvelopeKind::ParamChange | EnvelopeKind::PathChange | EnvelopeKind::RequestContext => {
				Direction::Outbound
			}
			EnvelopeKind::Navigate | EnvelopeKind::SetContext | EnvelopeKind::SignOut => Direction::Inbound,
		}
	}
}

impl fmt::Display for EnvelopeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Whether an inbound envelope's declared origin matched the trust policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginTrust {
	Verified,
	Unverified,
}

/// Envelope as it appears on the wire.
///
/// `kind` is kept as a raw string so envelopes from newer hosts still parse
/// and can be recognized as unknown rather than failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
	pub kind: String,
	#[serde(default)]
	pub payload: Value,
	/// Correlation id for request/response pairs (`requestContext` → `setContext`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub request_id: Option<u64>,
	/// Origin declared by the sender, checked against the trust policy.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<u32>,
}

/// Typed envelope after kind recognition and trust assessment.
///
/// Immutable once built; handlers receive it by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	pub kind: EnvelopeKind,
	pub payload: Value,
	pub request_id: Option<u64>,
	pub origin_trust: OriginTrust,
}

impl Envelope {
	/// Builds an envelope originating from this runtime.
	pub fn outbound(kind: EnvelopeKind, payload: Value) -> Self {
		Self {
			kind,
			payload,
			request_id: None,
			origin_trust: OriginTrust::Verified,
		}
	}

	/// Builds an inbound envelope with an explicit trust verdict.
	pub fn inbound(kind: EnvelopeKind, payload: Value, origin_trust: OriginTrust) -> Self {
		Self {
			kind,
			payload,
			request_id: None,
			origin_trust,
		}
	}

	pub fn with_request_id(mut self, request_id: u64) -> Self {
		self.request_id = Some(request_id);
		self
	}

	pub fn is_verified(&self) -> bool {
		self.origin_trust == OriginTrust::Verified
	}

	/// Converts to wire form, stamping the sender origin and protocol version.
	pub fn to_wire(&self, origin: Option<&str>) -> WireEnvelope {
		WireEnvelope {
			kind: self.kind.as_str().to_string(),
			payload: self.payload.clone(),
			request_id: self.request_id,
			origin: origin.map(str::to_string),
			version: Some(PROTOCOL_VERSION),
		}
	}
}
