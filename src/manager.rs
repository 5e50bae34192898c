//! Datafile manager owning the decision engine handle.
//!
//! The engine is an opaque consumer of datafile content. The manager builds it from the first
//! datafile the loader delivers and, when asked to, rebuilds it whenever newer content arrives.

// std
use std::path::PathBuf;
// crates.io
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	datafile::{
		loader::{DatafileEvent, DatafileReceiver},
		remote::{DatafileClient, DatafileSource},
	},
	http::retry::RetryPolicy,
	identity::DatafileIdentity,
	service::DatafileService,
	settings::LoaderSettings,
};

/// Engine that can be built from datafile content.
pub trait DatafileConsumer: Sized + Send + Sync + 'static {
	/// Build the engine from raw datafile JSON.
	fn from_datafile(datafile: &str) -> Result<Self>;
}

/// Explicitly owned engine slot.
#[derive(Debug)]
pub enum EngineHandle<E> {
	/// No datafile has produced an engine yet.
	NotReady,
	/// Engine built from the most recent usable datafile.
	Ready(Arc<E>),
}
impl<E> EngineHandle<E> {
	/// Whether an engine is available.
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready(_))
	}

	/// The engine, when available.
	pub fn engine(&self) -> Option<&Arc<E>> {
		match self {
			Self::Ready(engine) => Some(engine),
			Self::NotReady => None,
		}
	}
}
impl<E> Clone for EngineHandle<E> {
	fn clone(&self) -> Self {
		match self {
			Self::NotReady => Self::NotReady,
			Self::Ready(engine) => Self::Ready(engine.clone()),
		}
	}
}
impl<E> Default for EngineHandle<E> {
	fn default() -> Self {
		Self::NotReady
	}
}

/// Fluent assembly of a [`DatafileManager`].
#[derive(Clone, Debug)]
pub struct ManagerBuilder {
	identity: DatafileIdentity,
	settings: LoaderSettings,
	cdn_base_url: Option<String>,
	update_on_new_datafile: bool,
}
impl ManagerBuilder {
	/// Builder for `identity`, caching under `cache_dir`.
	pub fn new(identity: DatafileIdentity, cache_dir: impl Into<PathBuf>) -> Self {
		Self {
			identity,
			settings: LoaderSettings::new(cache_dir),
			cdn_base_url: None,
			update_on_new_datafile: false,
		}
	}

	/// Replace every loader setting at once.
	pub fn settings(mut self, settings: LoaderSettings) -> Self {
		self.settings = settings;

		self
	}

	/// Resolve datafile URLs against `url`.
	pub fn cdn_base_url(mut self, url: impl Into<String>) -> Self {
		self.cdn_base_url = Some(url.into());

		self
	}

	/// Minimum spacing between two downloads.
	pub fn min_download_interval(mut self, interval: Duration) -> Self {
		self.settings.min_download_interval = interval;

		self
	}

	/// Interval of the background refresh cycle.
	pub fn watch_interval(mut self, interval: Duration) -> Self {
		self.settings.watch_interval = interval;

		self
	}

	/// Retry policy for downloads.
	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.settings.retry_policy = policy;

		self
	}

	/// Rebuild the engine whenever a newer datafile is downloaded.
	pub fn update_on_new_datafile(mut self, enabled: bool) -> Self {
		self.update_on_new_datafile = enabled;

		self
	}

	/// Build a manager backed by the CDN client.
	pub fn build<E>(self) -> Result<DatafileManager<E>>
	where
		E: DatafileConsumer,
	{
		let (identity, settings, update) = self.finish()?;
		let service = DatafileService::new(settings)?;

		Ok(DatafileManager::assemble(identity, service, update))
	}

	/// Build a manager around a custom datafile source.
	pub fn build_with_source<E, S>(self, source: S) -> Result<DatafileManager<E, S>>
	where
		E: DatafileConsumer,
		S: DatafileSource,
	{
		let (identity, settings, update) = self.finish()?;
		let service = DatafileService::with_source(settings, source)?;

		Ok(DatafileManager::assemble(identity, service, update))
	}

	fn finish(self) -> Result<(DatafileIdentity, LoaderSettings, bool)> {
		self.identity.validate()?;

		let settings = match self.cdn_base_url {
			Some(url) => self.settings.with_cdn_base_url(url)?,
			None => self.settings,
		};

		Ok((self.identity, settings, self.update_on_new_datafile))
	}
}

/// Owns the engine for one identity and keeps it fed with datafiles.
#[derive(Debug)]
pub struct DatafileManager<E, S = DatafileClient> {
	identity: DatafileIdentity,
	service: Arc<DatafileService<S>>,
	engine: Arc<RwLock<EngineHandle<E>>>,
	update_on_new_datafile: bool,
}
impl<E, S> DatafileManager<E, S>
where
	E: DatafileConsumer,
	S: DatafileSource,
{
	fn assemble(identity: DatafileIdentity, service: DatafileService<S>, update: bool) -> Self {
		Self {
			identity,
			service: Arc::new(service),
			engine: Arc::new(RwLock::new(EngineHandle::NotReady)),
			update_on_new_datafile: update,
		}
	}

	/// Identity the manager serves.
	pub fn identity(&self) -> &DatafileIdentity {
		&self.identity
	}

	/// Hosting service behind the manager.
	pub fn service(&self) -> &Arc<DatafileService<S>> {
		&self.service
	}

	/// Current engine slot.
	pub async fn engine(&self) -> EngineHandle<E> {
		self.engine.read().await.clone()
	}

	/// Whether an engine is available.
	pub async fn is_ready(&self) -> bool {
		self.engine.read().await.is_ready()
	}

	/// Load the datafile and build the engine from the first usable copy.
	///
	/// Returns `Ok(false)` when neither the cache nor the CDN produced a usable datafile.
	#[tracing::instrument(skip_all, fields(identity = %self.identity))]
	pub async fn initialize(&self) -> Result<bool> {
		let mut receiver = self.service.get_datafile(self.identity.clone()).await?;

		while let Some(event) = receiver.next().await {
			let Some(content) = event.content() else {
				break;
			};

			if install(&self.engine, &self.identity, content).await {
				if self.update_on_new_datafile {
					tokio::spawn(follow_updates(
						self.engine.clone(),
						self.identity.clone(),
						receiver,
					));
				}

				return Ok(true);
			}
		}

		tracing::warn!("no usable datafile; engine not ready");

		Ok(false)
	}

	/// Build the engine from a datafile supplied by the caller.
	pub async fn initialize_with(&self, datafile: &str) -> Result<()> {
		let engine = E::from_datafile(datafile)?;

		*self.engine.write().await = EngineHandle::Ready(Arc::new(engine));

		Ok(())
	}

	/// Refresh the datafile; returns whether the engine was rebuilt.
	///
	/// The engine is only rebuilt from newly downloaded content, and only when updates are
	/// enabled or no engine exists yet.
	pub async fn refresh(&self) -> Result<bool> {
		let receiver = self.service.get_datafile(self.identity.clone()).await?;
		let ready = self.is_ready().await;
		let mut rebuilt = false;

		for event in receiver.collect().await {
			if let DatafileEvent::Downloaded(content) = event
				&& (self.update_on_new_datafile || !ready)
			{
				rebuilt |= install(&self.engine, &self.identity, &content).await;
			}
		}

		Ok(rebuilt)
	}

	/// Run `f` against the engine; `None` with a warning when not ready.
	pub async fn with_engine<T, F>(&self, f: F) -> Option<T>
	where
		F: FnOnce(&E) -> T,
	{
		match &*self.engine.read().await {
			EngineHandle::Ready(engine) => Some(f(engine)),
			EngineHandle::NotReady => {
				tracing::warn!(identity = %self.identity, "engine not ready; ignoring call");

				None
			},
		}
	}

	/// Keep the identity refreshed in the background.
	pub async fn start_watching(&self) -> Result<()> {
		self.service.start_watching(self.identity.clone()).await
	}

	/// Stop the background refresh of the identity.
	pub async fn stop_watching(&self) -> bool {
		self.service.stop_watching(&self.identity).await
	}
}

async fn install<E>(
	engine: &RwLock<EngineHandle<E>>,
	identity: &DatafileIdentity,
	content: &str,
) -> bool
where
	E: DatafileConsumer,
{
	match E::from_datafile(content) {
		Ok(built) => {
			*engine.write().await = EngineHandle::Ready(Arc::new(built));

			tracing::debug!(%identity, "engine built from datafile");

			true
		},
		Err(err) => {
			tracing::error!(%identity, error = %err, "datafile rejected by engine");

			false
		},
	}
}

async fn follow_updates<E>(
	engine: Arc<RwLock<EngineHandle<E>>>,
	identity: DatafileIdentity,
	mut receiver: DatafileReceiver,
) where
	E: DatafileConsumer,
{
	while let Some(event) = receiver.next().await {
		if let DatafileEvent::Downloaded(content) = event {
			install(&engine, &identity, &content).await;
		}
	}
}
