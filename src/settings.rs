//! Loader configuration and validation.

// std
use std::path::PathBuf;
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, http::retry::RetryPolicy};

/// Default CDN serving datafiles.
pub const DEFAULT_CDN_BASE_URL: &str = "https://cdn.optimizely.com/";
/// Default cache file prefix.
pub const DEFAULT_FILE_PREFIX: &str = "datafile";
/// Default minimum spacing between two downloads of one identity.
pub const DEFAULT_MIN_DOWNLOAD_INTERVAL: Duration = Duration::from_secs(60);
/// Default background watch interval.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default jitter subtracted from each background wake-up.
pub const DEFAULT_WATCH_JITTER: Duration = Duration::from_secs(30);
/// Default per-connection connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default size guard (4 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 4 * 1_048_576;
/// Shortest accepted background watch interval.
pub const MIN_WATCH_INTERVAL: Duration = Duration::from_secs(60);

/// Settings shared by every component of the datafile subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoaderSettings {
	/// Base URL identity paths are resolved against.
	#[serde(default = "default_cdn_base_url")]
	pub cdn_base_url: Url,
	/// Directory holding cache files and the watch registry.
	pub cache_dir: PathBuf,
	/// Prefix of every cache file name.
	#[serde(default = "default_file_prefix")]
	pub file_prefix: String,
	/// Minimum spacing between two download attempts for one identity.
	#[serde(default = "default_min_download_interval")]
	pub min_download_interval: Duration,
	/// Interval between background refreshes of watched identities.
	#[serde(default = "default_watch_interval")]
	pub watch_interval: Duration,
	/// Upper bound of the random jitter subtracted from each background wake-up.
	#[serde(default = "default_watch_jitter")]
	pub watch_jitter: Duration,
	/// Connect timeout for each HTTP connection.
	#[serde(default = "default_connect_timeout")]
	pub connect_timeout: Duration,
	/// Maximum accepted datafile size in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Retry policy applied to every datafile download.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl LoaderSettings {
	/// Settings with defaults, storing files under `cache_dir`.
	pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
		Self {
			cdn_base_url: default_cdn_base_url(),
			cache_dir: cache_dir.into(),
			file_prefix: DEFAULT_FILE_PREFIX.into(),
			min_download_interval: DEFAULT_MIN_DOWNLOAD_INTERVAL,
			watch_interval: DEFAULT_WATCH_INTERVAL,
			watch_jitter: DEFAULT_WATCH_JITTER,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			retry_policy: RetryPolicy::default(),
		}
	}

	/// Point identity URLs at a different CDN.
	pub fn with_cdn_base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
		self.cdn_base_url = Url::parse(url.as_ref())?;

		Ok(self)
	}

	/// Override the minimum download spacing.
	pub fn with_min_download_interval(mut self, interval: Duration) -> Self {
		self.min_download_interval = interval;

		self
	}

	/// Override the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Validate the settings against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.cdn_base_url.cannot_be_a_base() {
			return Err(Error::Validation {
				field: "cdn_base_url",
				reason: "Must be usable as a base URL.".into(),
			});
		}
		if !matches!(self.cdn_base_url.scheme(), "http" | "https") {
			return Err(Error::Validation {
				field: "cdn_base_url",
				reason: "Scheme must be http or https.".into(),
			});
		}
		if self.cache_dir.as_os_str().is_empty() {
			return Err(Error::Validation {
				field: "cache_dir",
				reason: "Must not be empty.".into(),
			});
		}
		if self.file_prefix.is_empty()
			|| !self
				.file_prefix
				.bytes()
				.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
		{
			return Err(Error::Validation {
				field: "file_prefix",
				reason: "May only contain ASCII letters, numbers, '-', '_', or '.'.".into(),
			});
		}
		if self.watch_interval < MIN_WATCH_INTERVAL {
			return Err(Error::Validation {
				field: "watch_interval",
				reason: format!("Must be at least {MIN_WATCH_INTERVAL:?}."),
			});
		}
		if self.watch_jitter >= self.watch_interval {
			return Err(Error::Validation {
				field: "watch_jitter",
				reason: "Must be less than watch_interval.".into(),
			});
		}
		if self.connect_timeout.is_zero() {
			return Err(Error::Validation {
				field: "connect_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.retry_policy.validate()
	}
}

fn default_cdn_base_url() -> Url {
	Url::parse(DEFAULT_CDN_BASE_URL).expect("default CDN URL is valid")
}

fn default_file_prefix() -> String {
	DEFAULT_FILE_PREFIX.into()
}

fn default_min_download_interval() -> Duration {
	DEFAULT_MIN_DOWNLOAD_INTERVAL
}

fn default_watch_interval() -> Duration {
	DEFAULT_WATCH_INTERVAL
}

fn default_watch_jitter() -> Duration {
	DEFAULT_WATCH_JITTER
}

fn default_connect_timeout() -> Duration {
	DEFAULT_CONNECT_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
