//! Hosting service: explicit lifecycle plus background watching of identities.
//!
//! A host either binds to the service (`start()` / `stop()`) or runs it headless. When
//! unbound, a download that nobody observes requests termination once it settles, which a
//! headless host waits on through [`DatafileService::stop_requested`].

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::sync::Notify;
// self
use crate::{
	_prelude::*,
	datafile::{
		loader::{DatafileLoader, DatafileReceiver, DatafileStatus},
		remote::{DatafileClient, DatafileSource},
	},
	identity::DatafileIdentity,
	rescheduler::DatafileRescheduler,
	scheduler::PeriodicScheduler,
	settings::LoaderSettings,
	storage::Storage,
	watch::WatchRegistry,
};

/// Shared bind/stop state of the hosting context.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
	state: Arc<LifecycleState>,
}
impl Lifecycle {
	/// Fresh, unbound lifecycle.
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether a foreground consumer is attached.
	pub fn is_bound(&self) -> bool {
		self.state.bound.load(Ordering::Acquire)
	}

	/// Whether termination has been requested.
	pub fn is_stop_requested(&self) -> bool {
		self.state.stop_requested.load(Ordering::Acquire)
	}

	/// Ask the hosting context to terminate.
	pub fn request_stop(&self) {
		self.state.stop_requested.store(true, Ordering::Release);
		self.state.notify.notify_waiters();
	}

	/// Resolve once termination has been requested.
	pub async fn stopped(&self) {
		loop {
			let notified = self.state.notify.notified();

			tokio::pin!(notified);

			notified.as_mut().enable();

			if self.is_stop_requested() {
				return;
			}

			notified.await;
		}
	}

	fn bind(&self) {
		self.state.stop_requested.store(false, Ordering::Release);
		self.state.bound.store(true, Ordering::Release);
	}

	fn unbind(&self) {
		self.state.bound.store(false, Ordering::Release);
	}

	pub(crate) fn background_work_finished(&self) {
		if !self.is_bound() {
			tracing::debug!("background download settled while unbound; requesting stop");

			self.request_stop();
		}
	}
}

#[derive(Debug, Default)]
struct LifecycleState {
	bound: AtomicBool,
	stop_requested: AtomicBool,
	notify: Notify,
}

/// Long-lived host for the datafile loader and its background refresh.
#[derive(Debug)]
pub struct DatafileService<S = DatafileClient> {
	loader: DatafileLoader<S>,
	watch: WatchRegistry,
	scheduler: Arc<PeriodicScheduler<S>>,
	lifecycle: Lifecycle,
}
impl DatafileService<DatafileClient> {
	/// Service backed by the CDN client.
	pub fn new(settings: LoaderSettings) -> Result<Self> {
		settings.validate()?;

		let source = DatafileClient::new(&settings)?;

		Ok(Self::assemble(settings, source))
	}
}
impl<S> DatafileService<S>
where
	S: DatafileSource,
{
	/// Service around a custom datafile source.
	pub fn with_source(settings: LoaderSettings, source: S) -> Result<Self> {
		settings.validate()?;

		Ok(Self::assemble(settings, source))
	}

	fn assemble(settings: LoaderSettings, source: S) -> Self {
		let lifecycle = Lifecycle::new();
		let watch = WatchRegistry::new(Storage::new(settings.cache_dir.clone()));
		let loader = DatafileLoader::with_parts(settings, source, Some(lifecycle.clone()));
		let scheduler = Arc::new(PeriodicScheduler::new(loader.clone()));

		Self { loader, watch, scheduler, lifecycle }
	}

	/// Loader hosted by the service.
	pub fn loader(&self) -> &DatafileLoader<S> {
		&self.loader
	}

	/// Persistent watch flags.
	pub fn watch_registry(&self) -> &WatchRegistry {
		&self.watch
	}

	/// Scheduler driving background refreshes.
	pub fn scheduler(&self) -> &Arc<PeriodicScheduler<S>> {
		&self.scheduler
	}

	/// Lifecycle shared with the loader.
	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	/// Rescheduler restoring watched identities from the registry.
	pub fn rescheduler(&self) -> DatafileRescheduler<S> {
		DatafileRescheduler::new(self.watch.clone(), self.scheduler.clone())
	}

	/// Attach a foreground consumer.
	pub fn start(&self) {
		self.lifecycle.bind();

		tracing::info!("datafile service started");
	}

	/// Detach the foreground consumer and stop every refresh cycle.
	///
	/// Watch flags stay persisted, so a later reschedule restores the cycles.
	pub async fn stop(&self) {
		self.lifecycle.unbind();
		self.scheduler.cancel_all().await;
		self.lifecycle.request_stop();

		tracing::info!("datafile service stopped");
	}

	/// Resolve once the service should terminate.
	pub async fn stop_requested(&self) {
		self.lifecycle.stopped().await;
	}

	/// Request the datafile for `identity`; see [`DatafileLoader::get_datafile`].
	pub async fn get_datafile(&self, identity: DatafileIdentity) -> Result<DatafileReceiver> {
		self.loader.get_datafile(identity).await
	}

	/// Current loader state for `identity`.
	pub async fn status(&self, identity: &DatafileIdentity) -> DatafileStatus {
		self.loader.status(identity).await
	}

	/// Persist the watch flag for `identity` and start its refresh cycle.
	pub async fn start_watching(&self, identity: DatafileIdentity) -> Result<()> {
		identity.validate()?;

		if !self.watch.set_is_watching(&identity, true).await {
			tracing::warn!(%identity, "watch flag not persisted; cycle will not survive a restart");
		}

		self.scheduler.schedule(identity).await
	}

	/// Clear the watch flag for `identity` and cancel its refresh cycle.
	pub async fn stop_watching(&self, identity: &DatafileIdentity) -> bool {
		self.scheduler.cancel(identity).await;

		self.watch.set_is_watching(identity, false).await
	}
}
