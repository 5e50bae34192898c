//! Remote datafile retrieval from the CDN.

// crates.io
use http::StatusCode;
use url::Url;
// self
use crate::{
	_prelude::*,
	http::{client::HttpClient, retry::RetryPolicy},
	settings::LoaderSettings,
};

/// Successful outcome of a datafile request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetch {
	/// The origin returned a body; it is handed over verbatim.
	Modified(String),
	/// The origin answered 304; the cached copy is still current.
	NotModified,
}

/// Source of remote datafiles consumed by the loader.
///
/// `None` means every attempt failed; the cause has already been logged.
pub trait DatafileSource: Send + Sync + 'static {
	/// Request the datafile served at `url`.
	fn request(&self, url: &Url) -> impl Future<Output = Option<Fetch>> + Send;

	/// Drop any validator held for `url` so the next request is unconditional.
	fn invalidate(&self, _url: &Url) -> impl Future<Output = ()> + Send {
		async {}
	}
}

/// CDN client with conditional requests and retry.
#[derive(Clone, Debug)]
pub struct DatafileClient {
	http: HttpClient,
	retry_policy: RetryPolicy,
	max_response_bytes: u64,
}
impl DatafileClient {
	/// Build a client from loader settings.
	pub fn new(settings: &LoaderSettings) -> Result<Self> {
		let http = HttpClient::new(settings.connect_timeout)?;

		Ok(Self::with_http(http, settings.retry_policy.clone(), settings.max_response_bytes))
	}

	/// Build a client around an existing transport (primarily for tests).
	pub fn with_http(http: HttpClient, retry_policy: RetryPolicy, max_response_bytes: u64) -> Self {
		Self { http, retry_policy, max_response_bytes }
	}

	/// Underlying transport.
	pub fn http(&self) -> &HttpClient {
		&self.http
	}

	async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Fetch> {
		let response = match self.http.open(url, timeout).await {
			Ok(response) => response,
			Err(err) => {
				tracing::error!(%url, error = %err, "datafile request failed");

				return Err(err);
			},
		};
		let status = response.status();

		if status == StatusCode::NOT_MODIFIED {
			tracing::debug!(%url, "datafile not modified");

			return Ok(Fetch::NotModified);
		}
		if !status.is_success() {
			tracing::error!(%url, %status, "unexpected status while fetching datafile");

			return Err(Error::HttpStatus { status, url: url.clone() });
		}

		let headers = response.headers().clone();
		let bytes = response.bytes().await?;

		if bytes.len() as u64 > self.max_response_bytes {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: format!(
					"Response size {size} bytes exceeds the configured guard of {limit} bytes.",
					size = bytes.len(),
					limit = self.max_response_bytes
				),
			});
		}

		let body = String::from_utf8(bytes.to_vec()).map_err(|err| Error::Validation {
			field: "datafile",
			reason: format!("Body is not valid UTF-8: {err}."),
		})?;

		self.http.record_last_modified(url, &headers).await;

		tracing::debug!(%url, %status, bytes = body.len(), "datafile fetched");

		Ok(Fetch::Modified(body))
	}
}
impl DatafileSource for DatafileClient {
	async fn request(&self, url: &Url) -> Option<Fetch> {
		let fetch =
			self.http.execute(&self.retry_policy, move |timeout| self.attempt(url, timeout)).await;

		if fetch.is_none() {
			tracing::error!(
				%url,
				retries = self.retry_policy.max_retries,
				"giving up on datafile download"
			);
		}

		fetch
	}

	async fn invalidate(&self, url: &Url) {
		self.http.forget(url).await;
	}
}
