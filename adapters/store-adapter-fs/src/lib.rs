//! Durable tier on the local filesystem.
//!
//! Every key maps to one file holding the raw document. Keys can be bound to
//! an explicit path (the blacklist file); other keys live as `<key>.json`
//! under the base directory. Writes go to a temp file that is synced and then
//! renamed over the target, under a guard shared by all writers of the store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{create_dir_all, read_to_string, remove_file, rename, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use gatekeeper_types::durable_store::DurableStore;
use gatekeeper_types::prelude::*;

/// File name for a key without an explicit binding
fn key_file_name(key: &str) -> String {
	let name: String = key
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
		.collect();
	format!("{}.json", name)
}

fn tmp_path(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(format!(".tmp-{}", std::process::id()));
	path.with_file_name(name)
}

#[derive(Debug)]
pub struct DurableStoreFs {
	base_dir: Box<Path>,
	files: HashMap<Box<str>, PathBuf>,
	write_guard: Mutex<()>,
}

impl DurableStoreFs {
	pub async fn new(base_dir: impl Into<PathBuf>) -> ClResult<Self> {
		let base_dir = base_dir.into();
		create_dir_all(&base_dir).await?;
		Ok(Self {
			base_dir: base_dir.into_boxed_path(),
			files: HashMap::new(),
			write_guard: Mutex::new(()),
		})
	}

	/// Store a key in the given file instead of under the base directory
	pub fn with_file(mut self, key: &str, path: impl Into<PathBuf>) -> Self {
		self.files.insert(key.into(), path.into());
		self
	}

	pub fn path_for(&self, key: &str) -> PathBuf {
		match self.files.get(key) {
			Some(path) => path.clone(),
			None => self.base_dir.join(key_file_name(key)),
		}
	}

	async fn write_file(path: &Path, document: &str) -> ClResult<()> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			create_dir_all(parent).await?;
		}

		let tmp = tmp_path(path);
		let res = async {
			let mut file = File::create(&tmp).await?;
			file.write_all(document.as_bytes()).await?;
			file.sync_all().await?;
			rename(&tmp, path).await?;
			Ok::<(), Error>(())
		}
		.await;

		if res.is_err() {
			warn!("Durable write of {:?} failed, removing temp file", path);
			if let Err(e) = remove_file(&tmp).await {
				debug!("Temp file {:?} not removed: {}", tmp, e);
			}
		}
		res
	}
}

#[async_trait]
impl DurableStore for DurableStoreFs {
	async fn load(&self, key: &str) -> ClResult<Option<Box<str>>> {
		let path = self.path_for(key);
		match read_to_string(&path).await {
			Ok(document) if document.trim().is_empty() => {
				warn!("Durable file {:?} is empty", path);
				Ok(None)
			}
			Ok(document) => Ok(Some(document.into_boxed_str())),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn persist(&self, key: &str, document: &str) -> ClResult<()> {
		let path = self.path_for(key);
		let _guard = self.write_guard.lock().await;
		Self::write_file(&path, document).await?;
		debug!("Persisted {} to {:?} ({} bytes)", key, path, document.len());
		Ok(())
	}
}


// vim: ts=4
