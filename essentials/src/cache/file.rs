// Copyright 2025 Lumos Contributors.
// This file is part of lumos-sync.
//
// lumos-sync is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// lumos-sync is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with lumos-sync.  If not, see <http://www.gnu.org/licenses/>.

use super::store::{CacheError, KeyValueStore, changed_keys};
use log::{debug, warn};
use std::{
	collections::BTreeMap,
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
	time::SystemTime,
};

/// Store persisted as a single JSON object, rewritten atomically on every write.
///
/// Several processes may share one file. Every write re-reads the file and applies only its own key, so keys
/// written by the others survive. Their writes are reported by [`KeyValueStore::reload`], which compares the
/// file modification time against the one observed on the last read or write.
#[derive(Debug)]
pub struct FileStore {
	path: PathBuf,
	entries: BTreeMap<String, String>,
	modified: Option<SystemTime>,
	/// Foreign changes merged in by a write and not reported by `reload` yet
	unreported: Vec<String>,
}

impl FileStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
		let path = path.as_ref().to_path_buf();
		let (entries, modified) = read_entries(&path)?;
		debug!("opened cache file {} with {} entries", path.display(), entries.len());
		Ok(Self { path, entries, modified, unreported: vec![] })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Applies a single change on top of the current file contents and writes the result back.
	fn update(&mut self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<(), CacheError> {
		let mut fresh = match read_entries(&self.path) {
			Ok((entries, _)) => entries,
			Err(CacheError::Corrupted(err)) => {
				warn!("cache file {} is unreadable, rewriting it: {}", self.path.display(), err);
				self.entries.clone()
			},
			Err(err) => return Err(err),
		};
		let foreign = changed_keys(&self.entries, &fresh);
		if !foreign.is_empty() {
			debug!("merging {} foreign changes into {}", foreign.len(), self.path.display());
			self.unreported.extend(foreign);
		}

		if apply(&mut fresh) {
			self.persist(&fresh)?;
		}
		self.entries = fresh;
		Ok(())
	}

	fn persist(&mut self, entries: &BTreeMap<String, String>) -> Result<(), CacheError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent)?;
		}
		let tmp = self.path.with_extension("tmp");
		fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
		fs::rename(&tmp, &self.path)?;
		self.modified = fs::metadata(&self.path)?.modified().ok();
		Ok(())
	}

	fn take_unreported(&mut self) -> Vec<String> {
		let mut keys = std::mem::take(&mut self.unreported);
		keys.sort();
		keys.dedup();
		keys
	}
}

fn read_entries(path: &Path) -> Result<(BTreeMap<String, String>, Option<SystemTime>), CacheError> {
	match fs::read(path) {
		Ok(bytes) => {
			let modified = fs::metadata(path)?.modified().ok();
			if bytes.iter().all(|b| b.is_ascii_whitespace()) {
				return Ok((BTreeMap::new(), modified))
			}
			Ok((serde_json::from_slice(&bytes)?, modified))
		},
		Err(err) if err.kind() == ErrorKind::NotFound => Ok((BTreeMap::new(), None)),
		Err(err) => Err(err.into()),
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		Ok(self.entries.get(key).cloned())
	}

	fn set(&mut self, key: &str, value: String) -> Result<(), CacheError> {
		self.update(|entries| {
			entries.insert(key.to_string(), value);
			true
		})
	}

	fn remove(&mut self, key: &str) -> Result<(), CacheError> {
		self.update(|entries| entries.remove(key).is_some())
	}

	fn keys(&self) -> Result<Vec<String>, CacheError> {
		Ok(self.entries.keys().cloned().collect())
	}

	fn reload(&mut self) -> Result<Vec<String>, CacheError> {
		let modified = match fs::metadata(&self.path) {
			Ok(meta) => meta.modified().ok(),
			Err(err) if err.kind() == ErrorKind::NotFound => None,
			Err(err) => return Err(err.into()),
		};
		if modified == self.modified {
			return Ok(self.take_unreported())
		}

		let (entries, modified) = read_entries(&self.path)?;
		self.unreported.extend(changed_keys(&self.entries, &entries));
		self.entries = entries;
		self.modified = modified;
		Ok(self.take_unreported())
	}
}
