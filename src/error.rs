//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the datafile cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Upstream HTTP status {status} from {url}.")]
	HttpStatus { status: http::StatusCode, url: url::Url },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Unrecognised identity '{0}'.")]
	UnknownIdentity(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether repeating the operation could produce a different outcome.
	///
	/// Transport failures and upstream statuses are transient; rejected payloads and local
	/// validation failures are not.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Io(_) | Self::Reqwest(_) | Self::HttpStatus { .. })
	}
}
