//! Datafile load orchestration: cache fast path, throttled refresh, and request deduplication.
//!
//! A single loader serves any number of identities. Per-identity state (the in-flight waiters
//! and the last download mark) lives behind one mutex, so concurrent callers for the same
//! identity share one network round trip.

// std
use std::collections::HashMap;
// crates.io
use tokio::{
	runtime::Handle,
	sync::{Mutex, mpsc},
};
use url::Url;
// self
use crate::{
	_prelude::*,
	datafile::{
		cache::DatafileCache,
		remote::{DatafileClient, DatafileSource, Fetch},
	},
	identity::DatafileIdentity,
	metrics::{DownloadStatus, LoaderMetrics},
	service::Lifecycle,
	settings::LoaderSettings,
	storage::Storage,
};

/// Upper bound of events delivered for one request: a cache hit, then the network result.
pub const MAX_EVENTS: usize = 2;

/// One delivery to a datafile subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatafileEvent {
	/// Copy read from the local cache.
	Cached(Arc<str>),
	/// Newly downloaded content.
	Downloaded(Arc<str>),
	/// Neither the cache nor the network produced a datafile.
	Unavailable,
}
impl DatafileEvent {
	/// Datafile content carried by the event.
	pub fn content(&self) -> Option<&Arc<str>> {
		match self {
			Self::Cached(content) | Self::Downloaded(content) => Some(content),
			Self::Unavailable => None,
		}
	}
}

/// Stream of at most [`MAX_EVENTS`] deliveries for one `get_datafile` call.
///
/// The stream ends once the loader has nothing more to say about the request.
#[derive(Debug)]
pub struct DatafileReceiver {
	events: mpsc::Receiver<DatafileEvent>,
}
impl DatafileReceiver {
	fn new(events: mpsc::Receiver<DatafileEvent>) -> Self {
		Self { events }
	}

	/// Next delivery, or `None` once the stream has ended.
	pub async fn next(&mut self) -> Option<DatafileEvent> {
		self.events.recv().await
	}

	/// Wait for the stream to end and return every delivery in order.
	pub async fn collect(mut self) -> Vec<DatafileEvent> {
		let mut events = Vec::with_capacity(MAX_EVENTS);

		while let Some(event) = self.events.recv().await {
			events.push(event);
		}

		events
	}

	/// Wait for the stream to end and return the freshest content delivered.
	pub async fn latest(self) -> Option<Arc<str>> {
		self.collect().await.iter().rev().find_map(DatafileEvent::content).cloned()
	}
}

/// Point-in-time view of one identity's loader state.
#[derive(Clone, Debug)]
pub struct DatafileStatus {
	/// Identity the status describes.
	pub identity: DatafileIdentity,
	/// Whether a download is currently running.
	pub downloading: bool,
	/// Wall-clock time of the most recent download attempt.
	pub last_download_at: Option<DateTime<Utc>>,
	/// Whether a cached datafile is present.
	pub cached: bool,
}

/// Loads datafiles from cache and CDN for any number of identities.
#[derive(Debug)]
pub struct DatafileLoader<S = DatafileClient> {
	inner: Arc<LoaderInner<S>>,
}
impl DatafileLoader<DatafileClient> {
	/// Build a loader backed by the CDN client.
	pub fn new(settings: LoaderSettings) -> Result<Self> {
		settings.validate()?;

		let source = DatafileClient::new(&settings)?;

		Ok(Self::with_parts(settings, source, None))
	}
}
impl<S> DatafileLoader<S>
where
	S: DatafileSource,
{
	/// Build a loader around a custom datafile source.
	pub fn with_source(settings: LoaderSettings, source: S) -> Result<Self> {
		settings.validate()?;

		Ok(Self::with_parts(settings, source, None))
	}

	pub(crate) fn with_parts(
		settings: LoaderSettings,
		source: S,
		lifecycle: Option<Lifecycle>,
	) -> Self {
		let storage = Storage::new(settings.cache_dir.clone());

		Self {
			inner: Arc::new(LoaderInner {
				source,
				storage,
				settings,
				state: Mutex::new(LoaderState::default()),
				metrics: LoaderMetrics::new(),
				lifecycle,
			}),
		}
	}

	/// Settings the loader was built with.
	pub fn settings(&self) -> &LoaderSettings {
		&self.inner.settings
	}

	/// Datafile source used for downloads.
	pub fn source(&self) -> &S {
		&self.inner.source
	}

	/// Loader telemetry.
	pub fn metrics(&self) -> Arc<LoaderMetrics> {
		self.inner.metrics.clone()
	}

	/// Datafile cache for `identity`.
	pub fn cache(&self, identity: &DatafileIdentity) -> DatafileCache {
		self.inner.cache(identity)
	}

	/// Request the datafile for `identity`.
	///
	/// Returns immediately with a stream that yields the cached copy (if any) and the outcome
	/// of the refresh. A request that joins an in-flight download, or that falls inside the
	/// throttle window while a cached copy exists, never touches the network.
	#[tracing::instrument(skip_all, fields(identity = %identity))]
	pub async fn get_datafile(&self, identity: DatafileIdentity) -> Result<DatafileReceiver> {
		if let Err(err) = identity.validate() {
			tracing::error!(error = %err, "rejecting datafile request");

			return Err(err);
		}

		let url = identity.datafile_url(&self.inner.settings.cdn_base_url)?;
		let cache = self.inner.cache(&identity);
		let (mut sender, receiver) = mpsc::channel(MAX_EVENTS);
		let receiver = DatafileReceiver::new(receiver);
		let mut throttle = Some(self.inner.settings.min_download_interval);

		self.inner.metrics.record_request(&identity);

		loop {
			let claim = self.inner.state.lock().await.claim(&identity, sender, throttle);

			match claim {
				Claim::Joined => {
					tracing::debug!("download already in flight; waiting for its outcome");

					self.inner.metrics.record_deduplicated(&identity);

					return Ok(receiver);
				},
				Claim::Started(sender) => {
					tokio::spawn(self.inner.clone().download(identity, url, cache, sender));

					return Ok(receiver);
				},
				Claim::Throttled(returned) => {
					if let Some(content) = self.inner.load_cached(&cache).await {
						tracing::debug!("download throttled; serving cached datafile");

						self.inner.metrics.record_throttled(&identity);

						let _ = returned.try_send(DatafileEvent::Cached(content));

						return Ok(receiver);
					}

					tracing::debug!("download throttled but nothing is cached; downloading");

					sender = returned;
					throttle = None;
				},
			}
		}
	}

	/// Refresh `identity` without waiting for, or observing, the outcome.
	pub async fn refresh(&self, identity: DatafileIdentity) -> Result<()> {
		self.get_datafile(identity).await.map(drop)
	}

	/// Current state for `identity`.
	pub async fn status(&self, identity: &DatafileIdentity) -> DatafileStatus {
		let (downloading, last_download_at) = {
			let state = self.inner.state.lock().await;

			(
				state.in_flight.contains_key(identity),
				state.downloads.get(identity).map(|mark| mark.wallclock),
			)
		};
		let cached = self.inner.cache(identity).exists().await;

		DatafileStatus { identity: identity.clone(), downloading, last_download_at, cached }
	}
}
impl<S> Clone for DatafileLoader<S> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

#[derive(Debug)]
struct LoaderInner<S> {
	source: S,
	storage: Storage,
	settings: LoaderSettings,
	state: Mutex<LoaderState>,
	metrics: Arc<LoaderMetrics>,
	lifecycle: Option<Lifecycle>,
}
impl<S> LoaderInner<S>
where
	S: DatafileSource,
{
	fn cache(&self, identity: &DatafileIdentity) -> DatafileCache {
		DatafileCache::new(self.storage.clone(), identity.clone(), &self.settings.file_prefix)
	}

	async fn load_cached(&self, cache: &DatafileCache) -> Option<Arc<str>> {
		let cached = cache.load().await.map(|value| Arc::from(value.to_string()));

		self.metrics.record_cache_lookup(cache.identity(), cached.is_some());

		cached
	}

	async fn download(
		self: Arc<Self>,
		identity: DatafileIdentity,
		url: Url,
		cache: DatafileCache,
		sender: mpsc::Sender<DatafileEvent>,
	) {
		let started = Instant::now();
		let guard = InFlightGuard {
			inner: self.clone(),
			identity: identity.clone(),
			sender: Some(sender.clone()),
		};
		let cached = self.load_cached(&cache).await;

		match &cached {
			Some(content) => {
				let _ = sender.try_send(DatafileEvent::Cached(content.clone()));
			},
			// Missing or unreadable: ask for the full body.
			None => self.source.invalidate(&url).await,
		}

		let (status, settled) = match self.source.request(&url).await {
			Some(Fetch::Modified(content)) if !content.is_empty() => {
				if !cache.save(&content).await {
					tracing::warn!(%identity, "serving downloaded datafile without persisting it");
				}

				let content = Arc::<str>::from(content);
				let event = DatafileEvent::Downloaded(content);
				let _ = sender.try_send(event.clone());

				(DownloadStatus::Updated, event)
			},
			fetch => {
				let status = if fetch.is_some() {
					tracing::debug!(%identity, "remote datafile unchanged");

					DownloadStatus::NotModified
				} else {
					DownloadStatus::Failed
				};

				if cached.is_none() {
					let _ = sender.try_send(DatafileEvent::Unavailable);
				}

				(status, settled_from_cache(cached))
			},
		};

		self.metrics.record_download(&identity, status, started.elapsed());

		let waiters = self.state.lock().await.in_flight.remove(&identity).unwrap_or_default();

		guard.disarm();

		for waiter in &waiters {
			let _ = waiter.try_send(settled.clone());
		}

		let unobserved = sender.is_closed() && waiters.iter().all(mpsc::Sender::is_closed);

		tracing::debug!(%identity, ?status, waiters = waiters.len(), "download finished");

		if unobserved && let Some(lifecycle) = &self.lifecycle {
			lifecycle.background_work_finished();
		}
	}
}

/// Releases an identity's in-flight slot when its download task ends early (panic or abort).
struct InFlightGuard<S>
where
	S: DatafileSource,
{
	inner: Arc<LoaderInner<S>>,
	identity: DatafileIdentity,
	sender: Option<mpsc::Sender<DatafileEvent>>,
}
impl<S> InFlightGuard<S>
where
	S: DatafileSource,
{
	fn disarm(mut self) {
		self.sender = None;
	}
}
impl<S> Drop for InFlightGuard<S>
where
	S: DatafileSource,
{
	fn drop(&mut self) {
		let Some(sender) = self.sender.take() else {
			return;
		};
		let Ok(runtime) = Handle::try_current() else {
			return;
		};
		let inner = self.inner.clone();
		let identity = self.identity.clone();

		tracing::error!(%identity, "datafile download ended before settling; releasing waiters");

		runtime.spawn(async move {
			let waiters = inner.state.lock().await.in_flight.remove(&identity).unwrap_or_default();

			inner.metrics.record_download(&identity, DownloadStatus::Failed, Duration::ZERO);

			for waiter in waiters.iter().chain([&sender]) {
				let _ = waiter.try_send(DatafileEvent::Unavailable);
			}
		});
	}
}

#[derive(Debug, Default)]
struct LoaderState {
	in_flight: HashMap<DatafileIdentity, Vec<mpsc::Sender<DatafileEvent>>>,
	downloads: HashMap<DatafileIdentity, DownloadMark>,
}
impl LoaderState {
	fn claim(
		&mut self,
		identity: &DatafileIdentity,
		sender: mpsc::Sender<DatafileEvent>,
		throttle: Option<Duration>,
	) -> Claim {
		if let Some(waiters) = self.in_flight.get_mut(identity) {
			waiters.push(sender);

			return Claim::Joined;
		}
		if let Some(interval) = throttle
			&& let Some(mark) = self.downloads.get(identity)
			&& mark.at.elapsed() < interval
		{
			return Claim::Throttled(sender);
		}

		self.in_flight.insert(identity.clone(), Vec::new());
		self.downloads.insert(identity.clone(), DownloadMark::now());

		Claim::Started(sender)
	}
}

#[derive(Clone, Copy, Debug)]
struct DownloadMark {
	at: Instant,
	wallclock: DateTime<Utc>,
}
impl DownloadMark {
	fn now() -> Self {
		Self { at: Instant::now(), wallclock: Utc::now() }
	}
}

#[derive(Debug)]
enum Claim {
	Joined,
	Started(mpsc::Sender<DatafileEvent>),
	Throttled(mpsc::Sender<DatafileEvent>),
}

fn settled_from_cache(cached: Option<Arc<str>>) -> DatafileEvent {
	cached.map(DatafileEvent::Cached).unwrap_or(DatafileEvent::Unavailable)
}
