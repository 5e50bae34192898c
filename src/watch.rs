//! Persistent registry of identities refreshed in the background.
//!
//! The registry is a single JSON object mapping identity strings to a watch flag. Entries are
//! flipped, never removed, so a reschedule after restart sees every identity ever watched.

// std
use std::collections::BTreeMap;
// crates.io
use tokio::sync::Mutex;
// self
use crate::{_prelude::*, identity::DatafileIdentity, storage::Storage};

/// File holding the watch flags.
///
/// Cache files are always named `<prefix>-<suffix>.json`; this name has no `-`.
pub const WATCH_FILE_NAME: &str = "datafile_watchers.json";

type Entries = BTreeMap<String, bool>;

/// Persistent set of identities watched in the background.
#[derive(Clone, Debug)]
pub struct WatchRegistry {
	storage: Storage,
	write_lock: Arc<Mutex<()>>,
}
impl WatchRegistry {
	/// Registry persisted in `storage`.
	pub fn new(storage: Storage) -> Self {
		Self { storage, write_lock: Arc::new(Mutex::new(())) }
	}

	/// Record whether `identity` is watched; `false` when the flag could not be persisted.
	pub async fn set_is_watching(&self, identity: &DatafileIdentity, watching: bool) -> bool {
		if let Err(err) = identity.validate() {
			tracing::error!(%identity, error = %err, "refusing to update watch flag");

			return false;
		}

		let _guard = self.write_lock.lock().await;
		let mut entries = match self.read().await {
			Ok(entries) => entries,
			Err(Error::Serde(err)) => {
				tracing::warn!(error = %err, "discarding unreadable watch registry");

				Entries::new()
			},
			Err(err) => {
				tracing::error!(error = %err, "failed to read watch registry");

				return false;
			},
		};

		entries.insert(identity.to_string(), watching);

		match self.write(&entries).await {
			Ok(()) => {
				tracing::debug!(%identity, watching, "watch flag updated");

				true
			},
			Err(err) => {
				tracing::error!(%identity, error = %err, "failed to persist watch registry");

				false
			},
		}
	}

	/// Whether `identity` is currently watched.
	pub async fn is_watching(&self, identity: &DatafileIdentity) -> bool {
		if let Err(err) = identity.validate() {
			tracing::error!(%identity, error = %err, "cannot look up watch flag");

			return false;
		}

		match self.read().await {
			Ok(entries) => entries.get(&identity.to_string()).copied().unwrap_or(false),
			Err(Error::Serde(err)) => {
				tracing::error!(%identity, error = %err, "watch registry is not valid JSON");

				false
			},
			Err(err) => {
				tracing::error!(%identity, error = %err, "failed to read watch registry");

				false
			},
		}
	}

	/// Every identity whose flag is `true`.
	pub async fn watching_identities(&self) -> Vec<DatafileIdentity> {
		let entries = match self.read().await {
			Ok(entries) => entries,
			Err(err) => {
				tracing::error!(error = %err, "failed to list watched identities");

				return Vec::new();
			},
		};

		entries
			.into_iter()
			.filter(|(_, watching)| *watching)
			.filter_map(|(key, _)| match key.parse::<DatafileIdentity>() {
				Ok(identity) => Some(identity),
				Err(err) => {
					tracing::warn!(%key, error = %err, "skipping unrecognised watch entry");

					None
				},
			})
			.collect()
	}

	/// Delete the registry file; `true` when nothing remains on disk.
	pub async fn clear(&self) -> bool {
		let _guard = self.write_lock.lock().await;

		match self.storage.delete(WATCH_FILE_NAME).await {
			Ok(()) => true,
			Err(err) => {
				tracing::warn!(error = %err, "failed to delete watch registry");

				false
			},
		}
	}

	async fn read(&self) -> Result<Entries> {
		match self.storage.load(WATCH_FILE_NAME).await? {
			Some(raw) => Ok(serde_json::from_str(&raw)?),
			None => Ok(Entries::new()),
		}
	}

	async fn write(&self, entries: &Entries) -> Result<()> {
		let raw = serde_json::to_string(entries)?;

		self.storage.save(WATCH_FILE_NAME, &raw).await
	}
}
