//! Origin trust policy for inbound envelopes.

use ember_protocol::OriginTrust;

/// Decides whether an envelope's declared origin is trusted.
///
/// Untrusted envelopes are still delivered; they are only flagged
/// [`OriginTrust::Unverified`] so strict consumers can refuse them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustPolicy {
	/// Every envelope is verified (local development, stdio hosts).
	#[default]
	AllowAny,
	/// Only envelopes declaring one of these origins are verified.
	AllowList(Vec<String>),
}

impl TrustPolicy {
	/// Builds a policy from configured origins; an empty list allows any.
	pub fn from_origins(origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
		let origins: Vec<String> = origins.into_iter().map(|o| normalize(&o.into())).collect();
		if origins.is_empty() {
			TrustPolicy::AllowAny
		} else {
			TrustPolicy::AllowList(origins)
		}
	}

	pub fn assess(&self, origin: Option<&str>) -> OriginTrust {
		match self {
			TrustPolicy::AllowAny => OriginTrust::Verified,
			TrustPolicy::AllowList(allowed) => match origin {
				Some(origin) if allowed.iter().any(|a| *a == normalize(origin)) => OriginTrust::Verified,
				_ => OriginTrust::Unverified,
			},
		}
	}
}

fn normalize(origin: &str) -> String {
	origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_origin_list_allows_any() {
		let policy = TrustPolicy::from_origins(Vec::<String>::new());
		assert_eq!(policy, TrustPolicy::AllowAny);
		assert_eq!(policy.assess(None), OriginTrust::Verified);
	}

	#[test]
	fn allow_list_normalizes_case_and_trailing_slash() {
		let policy = TrustPolicy::from_origins(["https://Host.example.com/"]);
		assert_eq!(policy.assess(Some("https://host.example.com")), OriginTrust::Verified);
		assert_eq!(policy.assess(Some("https://evil.example.com")), OriginTrust::Unverified);
		assert_eq!(policy.assess(None), OriginTrust::Unverified);
	}
}
