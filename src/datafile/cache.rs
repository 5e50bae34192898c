//! Typed datafile cache scoped to one identity.

// crates.io
use serde_json::Value;
// self
use crate::{identity::DatafileIdentity, storage::Storage};

/// Durable copy of one identity's datafile.
#[derive(Clone, Debug)]
pub struct DatafileCache {
	storage: Storage,
	identity: DatafileIdentity,
	file_name: String,
}
impl DatafileCache {
	/// Cache for `identity` stored in `storage` as `<prefix>-<suffix>.json`.
	pub fn new(storage: Storage, identity: DatafileIdentity, prefix: &str) -> Self {
		let file_name = identity.file_name(prefix);

		Self { storage, identity, file_name }
	}

	/// Identity this cache serves.
	pub fn identity(&self) -> &DatafileIdentity {
		&self.identity
	}

	/// Name of the backing file.
	pub fn file_name(&self) -> &str {
		&self.file_name
	}

	/// Parsed cached datafile, or `None` when absent or unreadable.
	pub async fn load(&self) -> Option<Value> {
		if !self.usable() {
			return None;
		}

		let raw = match self.storage.load(&self.file_name).await {
			Ok(Some(raw)) => raw,
			Ok(None) => {
				tracing::info!(identity = %self.identity, file = %self.file_name, "no cached datafile");

				return None;
			},
			Err(err) => {
				tracing::error!(
					identity = %self.identity,
					file = %self.file_name,
					error = %err,
					"failed to read cached datafile"
				);

				return None;
			},
		};

		match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(err) => {
				tracing::error!(
					identity = %self.identity,
					file = %self.file_name,
					error = %err,
					"cached datafile is not valid JSON"
				);

				None
			},
		}
	}

	/// Replace the cached datafile with `content`.
	pub async fn save(&self, content: &str) -> bool {
		if !self.usable() {
			return false;
		}

		match self.storage.save(&self.file_name, content).await {
			Ok(()) => true,
			Err(err) => {
				tracing::warn!(identity = %self.identity, error = %err, "failed to save datafile");

				false
			},
		}
	}

	/// Remove the cached datafile; `true` when nothing remains on disk.
	pub async fn delete(&self) -> bool {
		if !self.usable() {
			return false;
		}

		match self.storage.delete(&self.file_name).await {
			Ok(()) => true,
			Err(err) => {
				tracing::warn!(identity = %self.identity, error = %err, "failed to delete datafile");

				false
			},
		}
	}

	/// Whether a cached datafile is present.
	pub async fn exists(&self) -> bool {
		self.usable() && self.storage.exists(&self.file_name).await
	}

	fn usable(&self) -> bool {
		match self.identity.validate() {
			Ok(()) => true,
			Err(err) => {
				tracing::error!(identity = %self.identity, error = %err, "invalid datafile identity");

				false
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn cache_in(dir: &tempfile::TempDir, identity: DatafileIdentity) -> DatafileCache {
		DatafileCache::new(Storage::new(dir.path()), identity, "datafile")
	}

	#[tokio::test]
	async fn round_trips_json_and_forgets_after_delete() {
		let dir = tempfile::tempdir().expect("tempdir");
		let cache = cache_in(&dir, DatafileIdentity::project("1"));

		assert_eq!(cache.file_name(), "datafile-1.json");
		assert!(cache.load().await.is_none());
		assert!(cache.save(r#"{ "version": "4", "experiments": [] }"#).await);
		assert!(cache.exists().await);
		assert_eq!(
			cache.load().await,
			Some(serde_json::json!({ "version": "4", "experiments": [] }))
		);
		assert!(cache.delete().await);
		assert!(!cache.exists().await);
		assert!(cache.load().await.is_none());
	}

	#[tokio::test]
	async fn empty_object_renders_compactly() {
		let dir = tempfile::tempdir().expect("tempdir");
		let cache = cache_in(&dir, DatafileIdentity::project("1"));

		assert!(cache.save("{}").await);
		assert_eq!(cache.load().await.map(|value| value.to_string()).as_deref(), Some("{}"));
	}

	#[tokio::test]
	async fn corrupt_file_loads_as_none() {
		let dir = tempfile::tempdir().expect("tempdir");
		let cache = cache_in(&dir, DatafileIdentity::sdk_key("abc"));

		assert!(cache.save("{ not json").await);
		assert!(cache.exists().await);
		assert!(cache.load().await.is_none());
	}

	#[tokio::test]
	async fn empty_identity_fails_every_operation() {
		let dir = tempfile::tempdir().expect("tempdir");
		let cache = cache_in(&dir, DatafileIdentity::project(""));

		assert!(!cache.save("{}").await);
		assert!(!cache.exists().await);
		assert!(!cache.delete().await);
		assert!(cache.load().await.is_none());
	}

	#[tokio::test]
	async fn identities_use_separate_files() {
		let dir = tempfile::tempdir().expect("tempdir");
		let first = cache_in(&dir, DatafileIdentity::sdk_key("abc"));
		let second = cache_in(&dir, DatafileIdentity::sdk_key_with_environment("abc", "dev"));

		assert!(first.save(r#"{"a":1}"#).await);
		assert!(second.save(r#"{"b":2}"#).await);
		assert_eq!(first.load().await, Some(serde_json::json!({ "a": 1 })));
		assert_eq!(second.load().await, Some(serde_json::json!({ "b": 2 })));
	}
}
