//! Collaborators used by the stdio bridge.

use std::time::Duration;

use async_trait::async_trait;
use ember::{DataService, Navigator, QueryKey};
use ember_runtime::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

/// Per-request timeout against the data service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Data service over HTTP: `GET <base>/<scope>/<segments..>` to fetch and
/// `PUT` with a JSON body to mutate, both with a bearer token.
pub struct HttpDataService {
	client: reqwest::Client,
	base: Url,
}

impl HttpDataService {
	pub fn new(base: Url) -> Result<Self> {
		if base.cannot_be_a_base() {
			return Err(Error::Transport(format!("{base} cannot be used as a base URL")));
		}
		let client = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|e| Error::Transport(format!("failed to create HTTP client: {e}")))?;
		Ok(Self { client, base })
	}

	/// URL for `key`, one path segment per key segment.
	pub fn endpoint(&self, key: &QueryKey) -> Url {
		let mut url = self.base.clone();
		if let Ok(mut path) = url.path_segments_mut() {
			path.pop_if_empty().extend(key.segments());
		}
		url
	}

	async fn read_response(key: &QueryKey, response: reqwest::Response) -> Result<Value> {
		let status = response.status();
		if !status.is_success() {
			return Err(Error::Transport(format!("{key}: unexpected status {status}")));
		}
		response
			.json()
			.await
			.map_err(|e| Error::Transport(format!("{key}: invalid response body: {e}")))
	}
}

#[async_trait]
impl DataService for HttpDataService {
	async fn fetch(&self, key: &QueryKey, token: &str) -> Result<Value> {
		let url = self.endpoint(key);
		tracing::debug!(key = %key, url = %url, "GET");
		let response = self
			.client
			.get(url)
			.bearer_auth(token)
			.send()
			.await
			.map_err(|e| Error::Transport(format!("{key}: {e}")))?;
		Self::read_response(key, response).await
	}

	async fn mutate(&self, key: &QueryKey, value: &Value, token: &str) -> Result<Value> {
		let url = self.endpoint(key);
		tracing::debug!(key = %key, url = %url, "PUT");
		let response = self
			.client
			.put(url)
			.bearer_auth(token)
			.json(value)
			.send()
			.await
			.map_err(|e| Error::Transport(format!("{key}: {e}")))?;
		Self::read_response(key, response).await
	}
}

/// The bridge has no UI; host navigations just move a recorded location.
#[derive(Debug, Default)]
pub struct TrackingNavigator {
	current: Mutex<Option<String>>,
}

impl TrackingNavigator {
	pub fn current(&self) -> Option<String> {
		self.current.lock().clone()
	}
}

impl Navigator for TrackingNavigator {
	fn navigate(&self, url: &str) -> Result<()> {
		tracing::info!(url = %url, "Navigated");
		*self.current.lock() = Some(url.to_string());
		Ok(())
	}
}
