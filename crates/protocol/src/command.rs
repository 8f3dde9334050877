//! Kind-specific payload schemas.
//!
//! - [`InboundCommand`] - validated host → embedded messages
//! - [`OutboundMessage`] - embedded → host messages and their payload shapes
//! - [`PayloadError`] - a payload that does not match its kind's schema

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::ContextEntity;
use crate::envelope::{Envelope, EnvelopeKind};

/// Payload of a `pathChange` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathChange {
	pub app_name: String,
	pub url: String,
}

/// Payload did not match the schema for its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} payload: {reason}")]
pub struct PayloadError {
	pub kind: EnvelopeKind,
	pub reason: String,
}

impl PayloadError {
	fn new(kind: EnvelopeKind, reason: impl Into<String>) -> Self {
		Self {
			kind,
			reason: reason.into(),
		}
	}
}

/// Host → embedded message whose payload passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
	Navigate {
		target: String,
	},
	SetContext {
		entity: Option<ContextEntity>,
		request_id: Option<u64>,
	},
	SignOut,
}

impl InboundCommand {
	/// Validates `envelope.payload` against the schema of `envelope.kind`.
	///
	/// Outbound kinds are rejected: the host never legitimately sends them.
	pub fn parse(envelope: &Envelope) -> Result<Self, PayloadError> {
		let kind = envelope.kind;
		match kind {
			EnvelopeKind::Navigate => match &envelope.payload {
				Value::String(target) if !target.trim().is_empty() => Ok(InboundCommand::Navigate {
					target: target.clone(),
				}),
				Value::String(_) => Err(PayloadError::new(kind, "target path is empty")),
				other => Err(PayloadError::new(
					kind,
					format!("expected path string, got {}", json_type(other)),
				)),
			},
			EnvelopeKind::SetContext => {
				let entity = match &envelope.payload {
					Value::Null => None,
					Value::Object(_) => {
						let entity: ContextEntity = serde_json::from_value(envelope.payload.clone())
							.map_err(|e| PayloadError::new(kind, e.to_string()))?;
						if entity.id.is_empty() {
							return Err(PayloadError::new(kind, "context id is empty"));
						}
						Some(entity)
					}
					other => {
						return Err(PayloadError::new(
							kind,
							format!("expected object or null, got {}", json_type(other)),
						));
					}
				};
				Ok(InboundCommand::SetContext {
					entity,
					request_id: envelope.request_id,
				})
			}
			EnvelopeKind::SignOut => match &envelope.payload {
				Value::Null => Ok(InboundCommand::SignOut),
				Value::Object(map) if map.is_empty() => Ok(InboundCommand::SignOut),
				other => Err(PayloadError::new(
					kind,
					format!("expected no payload, got {}", json_type(other)),
				)),
			},
			EnvelopeKind::ParamChange | EnvelopeKind::PathChange | EnvelopeKind::RequestContext => {
				Err(PayloadError::new(kind, "outbound kind received from host"))
			}
		}
	}

	pub fn kind(&self) -> EnvelopeKind {
		match self {
			InboundCommand::Navigate { .. } => EnvelopeKind::Navigate,
			InboundCommand::SetContext { .. } => EnvelopeKind::SetContext,
			InboundCommand::SignOut => EnvelopeKind::SignOut,
		}
	}
}

/// Embedded → host message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
	/// Serialized query string, without the leading `?`.
	ParamChange(String),
	PathChange(PathChange),
	RequestContext,
}

impl OutboundMessage {
	pub fn kind(&self) -> EnvelopeKind {
		match self {
			OutboundMessage::ParamChange(_) => EnvelopeKind::ParamChange,
			OutboundMessage::PathChange(_) => EnvelopeKind::PathChange,
			OutboundMessage::RequestContext => EnvelopeKind::RequestContext,
		}
	}

	pub fn payload(&self) -> Value {
		match self {
			OutboundMessage::ParamChange(query) => Value::String(query.clone()),
			OutboundMessage::PathChange(change) => serde_json::json!({
				"appName": change.app_name,
				"url": change.url,
			}),
			OutboundMessage::RequestContext => Value::Null,
		}
	}

	pub fn into_envelope(self) -> Envelope {
		Envelope::outbound(self.kind(), self.payload())
	}
}

fn json_type(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
