//! Recurring background refresh of individual identities.

// std
use std::collections::HashMap;
// crates.io
use tokio::{sync::Mutex, task::JoinHandle, time};
// self
use crate::{
	_prelude::*,
	datafile::{
		loader::DatafileLoader,
		remote::{DatafileClient, DatafileSource},
	},
	http::retry,
	identity::DatafileIdentity,
};

/// Periodic refresh scheduler with one task per identity.
#[derive(Debug)]
pub struct PeriodicScheduler<S = DatafileClient> {
	loader: DatafileLoader<S>,
	interval: Duration,
	jitter: Duration,
	tasks: Mutex<HashMap<DatafileIdentity, JoinHandle<()>>>,
}
impl<S> PeriodicScheduler<S>
where
	S: DatafileSource,
{
	/// Scheduler using the loader's watch interval and jitter.
	pub fn new(loader: DatafileLoader<S>) -> Self {
		let settings = loader.settings();
		let (interval, jitter) = (settings.watch_interval, settings.watch_jitter);

		Self::with_interval(loader, interval, jitter)
	}

	/// Scheduler firing every `interval` minus up to `jitter`.
	pub fn with_interval(loader: DatafileLoader<S>, interval: Duration, jitter: Duration) -> Self {
		Self { loader, interval, jitter, tasks: Mutex::new(HashMap::new()) }
	}

	/// Base wake-up interval.
	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Start, or restart, the refresh cycle for `identity`.
	pub async fn schedule(&self, identity: DatafileIdentity) -> Result<()> {
		identity.validate()?;

		let task =
			tokio::spawn(run(self.loader.clone(), identity.clone(), self.interval, self.jitter));

		if let Some(previous) = self.tasks.lock().await.insert(identity.clone(), task) {
			previous.abort();
		}

		tracing::info!(%identity, interval = ?self.interval, "periodic datafile refresh scheduled");

		Ok(())
	}

	/// Stop the refresh cycle for `identity`; `false` when none was running.
	pub async fn cancel(&self, identity: &DatafileIdentity) -> bool {
		let Some(task) = self.tasks.lock().await.remove(identity) else {
			return false;
		};

		task.abort();

		tracing::info!(%identity, "periodic datafile refresh cancelled");

		true
	}

	/// Stop every refresh cycle.
	pub async fn cancel_all(&self) {
		for (_, task) in self.tasks.lock().await.drain() {
			task.abort();
		}
	}

	/// Whether a refresh cycle is running for `identity`.
	pub async fn is_scheduled(&self, identity: &DatafileIdentity) -> bool {
		self.tasks.lock().await.get(identity).is_some_and(|task| !task.is_finished())
	}

	/// Identities with a running refresh cycle.
	pub async fn scheduled(&self) -> Vec<DatafileIdentity> {
		self.tasks
			.lock()
			.await
			.iter()
			.filter(|(_, task)| !task.is_finished())
			.map(|(identity, _)| identity.clone())
			.collect()
	}
}
impl<S> Drop for PeriodicScheduler<S> {
	fn drop(&mut self) {
		for (_, task) in self.tasks.get_mut().drain() {
			task.abort();
		}
	}
}

async fn run<S>(
	loader: DatafileLoader<S>,
	identity: DatafileIdentity,
	interval: Duration,
	jitter: Duration,
) where
	S: DatafileSource,
{
	loop {
		time::sleep(next_wake(interval, jitter)).await;

		tracing::debug!(%identity, "periodic datafile refresh");

		if let Err(err) = loader.refresh(identity.clone()).await {
			tracing::error!(%identity, error = %err, "periodic datafile refresh failed");
		}
	}
}

/// Subtract a random share of `jitter` from `interval`.
fn next_wake(interval: Duration, jitter: Duration) -> Duration {
	interval.saturating_sub(retry::random_within(Duration::ZERO, jitter))
}
