//! Host-owned scoping entity ("current park").

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scoping object owned by the host.
///
/// Only `id` and `name` are interpreted; every other field is carried in
/// [`attributes`](Self::attributes) untouched. Updates always replace the
/// whole entity, so there is no merge helper here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntity {
	pub id: String,
	pub name: String,
	#[serde(flatten)]
	pub attributes: Map<String, Value>,
}

impl ContextEntity {
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			attributes: Map::new(),
		}
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn attribute(&self, key: &str) -> Option<&Value> {
		self.attributes.get(key)
	}
}
