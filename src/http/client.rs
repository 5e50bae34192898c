//! Transport wrapper issuing conditional GETs and running work under a retry policy.

// std
use std::collections::HashMap;
// crates.io
use http::{
	HeaderMap, HeaderValue,
	header::{ACCEPT, IF_MODIFIED_SINCE, LAST_MODIFIED},
};
use reqwest::{Client, Response, redirect::Policy};
use tokio::sync::RwLock;
use url::Url;
// self
use crate::{
	_prelude::*,
	http::retry::{RetryExecutor, RetryPolicy},
};

/// Maximum redirect depth followed for datafile requests.
pub const MAX_REDIRECTS: usize = 10;

/// HTTP client that remembers `Last-Modified` per URL.
///
/// Cloning is cheap and clones share the validator map.
#[derive(Clone, Debug)]
pub struct HttpClient {
	client: Client,
	last_modified: Arc<RwLock<HashMap<Url, String>>>,
}
impl HttpClient {
	/// Build a client with the default reqwest configuration.
	pub fn new(connect_timeout: Duration) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(MAX_REDIRECTS))
			.user_agent(format!("datafile-cache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(connect_timeout)
			.build()?;

		Ok(Self::with_client(client))
	}

	/// Wrap an existing reqwest client.
	pub fn with_client(client: Client) -> Self {
		Self { client, last_modified: Default::default() }
	}

	/// Issue a GET for `url`, attaching `If-Modified-Since` when a validator is known.
	///
	/// The returned response owns the connection; dropping it releases the connection on every
	/// path.
	pub async fn open(&self, url: &Url, timeout: Duration) -> Result<Response> {
		let mut builder =
			self.client.get(url.clone()).header(ACCEPT, "application/json").timeout(timeout);

		if let Some(value) = self.last_modified(url).await {
			match HeaderValue::from_str(&value) {
				Ok(value) => builder = builder.header(IF_MODIFIED_SINCE, value),
				Err(err) => tracing::warn!(%url, error = %err, "discarding invalid validator"),
			}
		}

		Ok(builder.send().await?)
	}

	/// Record the validator advertised by a successful response for `url`.
	///
	/// Falls back to the current time when the origin omits `Last-Modified`.
	pub async fn record_last_modified(&self, url: &Url, headers: &HeaderMap) {
		let value = headers
			.get(LAST_MODIFIED)
			.and_then(|value| value.to_str().ok())
			.filter(|raw| httpdate::parse_http_date(raw).is_ok())
			.map(str::to_owned)
			.unwrap_or_else(|| httpdate::fmt_http_date(SystemTime::now()));

		tracing::debug!(%url, last_modified = %value, "recorded validator");

		self.last_modified.write().await.insert(url.clone(), value);
	}

	/// Validator currently recorded for `url`.
	pub async fn last_modified(&self, url: &Url) -> Option<String> {
		self.last_modified.read().await.get(url).cloned()
	}

	/// Forget the validator for `url` so the next request is unconditional.
	pub async fn forget(&self, url: &Url) {
		self.last_modified.write().await.remove(url);
	}

	/// Run `work` under `policy`, returning `None` once every attempt has failed.
	pub async fn execute<T, F, Fut>(&self, policy: &RetryPolicy, work: F) -> Option<T>
	where
		F: FnMut(Duration) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		RetryExecutor::new(policy).run(work).await
	}
}
