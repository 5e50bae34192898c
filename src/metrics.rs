//! Metrics helpers and per-loader telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::{_prelude::*, identity::DatafileIdentity};

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_REQUESTS_TOTAL: &str = "datafile_requests_total";
const METRIC_CACHE_HITS_TOTAL: &str = "datafile_cache_hits_total";
const METRIC_CACHE_MISSES_TOTAL: &str = "datafile_cache_misses_total";
const METRIC_THROTTLED_TOTAL: &str = "datafile_throttled_total";
const METRIC_DEDUPLICATED_TOTAL: &str = "datafile_deduplicated_total";
const METRIC_DOWNLOADS_TOTAL: &str = "datafile_downloads_total";
const METRIC_DOWNLOAD_DURATION: &str = "datafile_download_duration_seconds";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Outcome of one remote download attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadStatus {
	/// New content was received.
	Updated,
	/// The origin confirmed the cached copy is current.
	NotModified,
	/// Every attempt failed.
	Failed,
}
impl DownloadStatus {
	fn as_label(self) -> &'static str {
		match self {
			Self::Updated => "updated",
			Self::NotModified => "not_modified",
			Self::Failed => "failed",
		}
	}
}

/// Thread-safe metrics accumulator for a loader.
#[derive(Debug, Default)]
pub struct LoaderMetrics {
	requests: AtomicU64,
	cache_hits: AtomicU64,
	throttled: AtomicU64,
	deduplicated: AtomicU64,
	downloads_updated: AtomicU64,
	downloads_not_modified: AtomicU64,
	downloads_failed: AtomicU64,
	last_download_micros: AtomicU64,
}
impl LoaderMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record an incoming `get_datafile` call.
	pub fn record_request(&self, identity: &DatafileIdentity) {
		self.requests.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_REQUESTS_TOTAL, base_labels(identity).iter()).increment(1);
	}

	/// Record whether the cache held a datafile when consulted.
	pub fn record_cache_lookup(&self, identity: &DatafileIdentity, hit: bool) {
		let labels = base_labels(identity);

		if hit {
			self.cache_hits.fetch_add(1, Ordering::Relaxed);

			metrics::counter!(METRIC_CACHE_HITS_TOTAL, labels.iter()).increment(1);
		} else {
			metrics::counter!(METRIC_CACHE_MISSES_TOTAL, labels.iter()).increment(1);
		}
	}

	/// Record a request served from cache because of the download throttle.
	pub fn record_throttled(&self, identity: &DatafileIdentity) {
		self.throttled.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_THROTTLED_TOTAL, base_labels(identity).iter()).increment(1);
	}

	/// Record a request that joined an in-flight download.
	pub fn record_deduplicated(&self, identity: &DatafileIdentity) {
		self.deduplicated.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(METRIC_DEDUPLICATED_TOTAL, base_labels(identity).iter()).increment(1);
	}

	/// Record a finished download and its latency.
	pub fn record_download(
		&self,
		identity: &DatafileIdentity,
		status: DownloadStatus,
		duration: Duration,
	) {
		let counter = match status {
			DownloadStatus::Updated => &self.downloads_updated,
			DownloadStatus::NotModified => &self.downloads_not_modified,
			DownloadStatus::Failed => &self.downloads_failed,
		};

		counter.fetch_add(1, Ordering::Relaxed);
		self.last_download_micros.store(duration.as_micros() as u64, Ordering::Relaxed);

		let mut labels = base_labels(identity);

		metrics::histogram!(METRIC_DOWNLOAD_DURATION, labels.iter())
			.record(duration.as_secs_f64());

		labels.push(Label::new("status", status.as_label()));

		metrics::counter!(METRIC_DOWNLOADS_TOTAL, labels.iter()).increment(1);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> LoaderMetricsSnapshot {
		LoaderMetricsSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			throttled: self.throttled.load(Ordering::Relaxed),
			deduplicated: self.deduplicated.load(Ordering::Relaxed),
			downloads_updated: self.downloads_updated.load(Ordering::Relaxed),
			downloads_not_modified: self.downloads_not_modified.load(Ordering::Relaxed),
			downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
			last_download_micros: match self.last_download_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of loader counters.
#[derive(Clone, Debug)]
pub struct LoaderMetricsSnapshot {
	/// `get_datafile` calls observed.
	pub requests: u64,
	/// Cache lookups that found a datafile.
	pub cache_hits: u64,
	/// Requests answered from cache because of the throttle.
	pub throttled: u64,
	/// Requests that joined an in-flight download.
	pub deduplicated: u64,
	/// Downloads that produced new content.
	pub downloads_updated: u64,
	/// Downloads answered with 304.
	pub downloads_not_modified: u64,
	/// Downloads that exhausted their retries.
	pub downloads_failed: u64,
	/// Microsecond latency of the most recent download.
	pub last_download_micros: Option<u64>,
}
impl LoaderMetricsSnapshot {
	/// Total remote round trips, whatever their outcome.
	pub fn downloads(&self) -> u64 {
		self.downloads_updated + self.downloads_not_modified + self.downloads_failed
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

fn base_labels(identity: &DatafileIdentity) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("identity", identity.to_string()));

	labels
}
