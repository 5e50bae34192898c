//! Filesystem-backed key/file store.
//!
//! Writes go to a sibling temporary file that is renamed over the target, so a reader never
//! observes a partially written file and a failed write leaves the previous content intact.

// std
use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};
// crates.io
use tokio::fs;
// self
use crate::_prelude::*;

const TMP_EXTENSION: &str = "tmp";

/// Directory-scoped file store.
#[derive(Clone, Debug)]
pub struct Storage {
	dir: Arc<PathBuf>,
}
impl Storage {
	/// Store files under `dir`, creating it on first write.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: Arc::new(dir.into()) }
	}

	/// Root directory of the store.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Absolute path for `file_name`.
	pub fn path(&self, file_name: &str) -> PathBuf {
		self.dir.join(file_name)
	}

	/// Atomically replace `file_name` with `content`.
	pub async fn save(&self, file_name: &str, content: &str) -> Result<()> {
		let path = self.path(file_name);
		let tmp = path.with_extension(TMP_EXTENSION);

		fs::create_dir_all(self.dir.as_path()).await?;

		if let Err(err) = fs::write(&tmp, content).await {
			let _ = fs::remove_file(&tmp).await;

			return Err(err.into());
		}
		if let Err(err) = fs::rename(&tmp, &path).await {
			let _ = fs::remove_file(&tmp).await;

			return Err(err.into());
		}

		Ok(())
	}

	/// Read `file_name`; `Ok(None)` when it does not exist.
	pub async fn load(&self, file_name: &str) -> Result<Option<String>> {
		match fs::read_to_string(self.path(file_name)).await {
			Ok(content) => Ok(Some(content)),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err.into()),
		}
	}

	/// Whether `file_name` exists.
	pub async fn exists(&self, file_name: &str) -> bool {
		fs::try_exists(self.path(file_name)).await.unwrap_or(false)
	}

	/// Remove `file_name`; succeeds when the file is absent afterwards.
	pub async fn delete(&self, file_name: &str) -> Result<()> {
		match fs::remove_file(self.path(file_name)).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}
}
