//! Restores background refresh cycles after the host restarts or is reinstalled.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// self
use crate::{
	_prelude::*,
	datafile::remote::{DatafileClient, DatafileSource},
	scheduler::PeriodicScheduler,
	watch::WatchRegistry,
};

/// Platform signal delivered to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformSignal {
	/// The device or host process finished booting.
	BootCompleted,
	/// The application package was replaced by an update.
	PackageReplaced,
	/// Any other signal; ignored.
	Other(String),
}
impl Display for PlatformSignal {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::BootCompleted => f.write_str("boot_completed"),
			Self::PackageReplaced => f.write_str("package_replaced"),
			Self::Other(name) => f.write_str(name),
		}
	}
}

/// Re-arms the refresh cycle of every watched identity.
#[derive(Debug)]
pub struct DatafileRescheduler<S = DatafileClient> {
	watch: WatchRegistry,
	scheduler: Arc<PeriodicScheduler<S>>,
}
impl<S> DatafileRescheduler<S>
where
	S: DatafileSource,
{
	/// Rescheduler reading `watch` and driving `scheduler`.
	pub fn new(watch: WatchRegistry, scheduler: Arc<PeriodicScheduler<S>>) -> Self {
		Self { watch, scheduler }
	}

	/// Handle `signal`; returns how many identities were rescheduled.
	pub async fn on_signal(&self, signal: PlatformSignal) -> usize {
		match signal {
			PlatformSignal::BootCompleted | PlatformSignal::PackageReplaced => {},
			PlatformSignal::Other(_) => {
				tracing::warn!(%signal, "ignoring unexpected platform signal");

				return 0;
			},
		}

		let mut rescheduled = 0;

		for identity in self.watch.watching_identities().await {
			match self.scheduler.schedule(identity.clone()).await {
				Ok(()) => rescheduled += 1,
				Err(err) => {
					tracing::error!(%identity, error = %err, "failed to reschedule watched identity");
				},
			}
		}

		tracing::info!(%signal, rescheduled, "watched identities rescheduled");

		rescheduled
	}
}
