use std::fmt;

/// Ordered tuple of key segments. The first segment is the context scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
	pub fn new<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(segments.into_iter().map(Into::into).collect())
	}

	/// Key `[scope, segments..]`.
	pub fn scoped(scope: impl Into<String>, segments: &[&str]) -> Self {
		let mut key = Vec::with_capacity(segments.len() + 1);
		key.push(scope.into());
		key.extend(segments.iter().map(|s| s.to_string()));
		Self(key)
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}

	/// Context scope this key belongs to.
	pub fn scope(&self) -> Option<&str> {
		self.0.first().map(String::as_str)
	}

	/// Segment-wise prefix match; `["p", "comms"]` matches `["p", "comms", "7"]`
	/// but not `["p", "commsx"]`.
	pub fn starts_with(&self, prefix: &QueryKey) -> bool {
		self.0.starts_with(&prefix.0)
	}
}

impl fmt::Display for QueryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0.join("/"))
	}
}
