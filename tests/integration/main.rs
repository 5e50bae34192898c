//! Integration tests driving the datafile subsystem against a mock CDN.

mod datafile_refresh;
mod watching;

// std
use std::time::Duration;
// crates.io
use datafile_cache::{JitterStrategy, LoaderSettings, RetryPolicy};
use wiremock::MockServer;

pub(crate) fn fast_retry_policy() -> RetryPolicy {
	RetryPolicy {
		max_retries: 2,
		attempt_timeout: Duration::from_secs(2),
		initial_backoff: Duration::from_millis(10),
		max_backoff: Duration::from_millis(40),
		deadline: Duration::from_secs(10),
		jitter: JitterStrategy::None,
	}
}

pub(crate) fn settings_for(server: &MockServer, dir: &tempfile::TempDir) -> LoaderSettings {
	LoaderSettings::new(dir.path())
		.with_cdn_base_url(server.uri())
		.expect("mock server URL")
		.with_retry_policy(fast_retry_policy())
}
