//! Datafile acquisition and caching for feature-flag SDKs: cache-first delivery, conditional
//! CDN refresh with retry, per-identity throttling and request deduplication, and persistent
//! background watching.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod datafile;
pub mod http;
pub mod identity;
pub mod manager;
pub mod metrics;
pub mod rescheduler;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod storage;
pub mod watch;

mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	datafile::{
		cache::DatafileCache,
		loader::{DatafileEvent, DatafileLoader, DatafileReceiver, DatafileStatus},
		remote::{DatafileClient, DatafileSource, Fetch},
	},
	error::{Error, Result},
	http::retry::{JitterStrategy, RetryPolicy},
	identity::{DatafileIdentity, KeyKind},
	manager::{DatafileConsumer, DatafileManager, EngineHandle, ManagerBuilder},
	metrics::{LoaderMetrics, LoaderMetricsSnapshot},
	rescheduler::{DatafileRescheduler, PlatformSignal},
	scheduler::PeriodicScheduler,
	service::{DatafileService, Lifecycle},
	settings::LoaderSettings,
	storage::Storage,
	watch::WatchRegistry,
};
