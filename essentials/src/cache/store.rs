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

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("storage io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("storage is corrupted: {0}")]
	Corrupted(#[from] serde_json::Error),
	#[error("storage unavailable: {0}")]
	Unavailable(String),
}

/// Durable string key-value storage behind the local cache
pub trait KeyValueStore: Send {
	fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
	fn set(&mut self, key: &str, value: String) -> Result<(), CacheError>;
	fn remove(&mut self, key: &str) -> Result<(), CacheError>;
	fn keys(&self) -> Result<Vec<String>, CacheError>;
	/// Picks up writes made by other processes sharing the same storage.
	/// Returns the keys whose values changed.
	fn reload(&mut self) -> Result<Vec<String>, CacheError> {
		Ok(vec![])
	}
}

/// Keys whose value differs between two snapshots, including added and removed ones
pub(crate) fn changed_keys(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> Vec<String> {
	let mut changed: Vec<String> = after
		.iter()
		.filter(|(key, value)| before.get(*key) != Some(*value))
		.map(|(key, _)| key.clone())
		.collect();
	changed.extend(before.keys().filter(|key| !after.contains_key(*key)).cloned());
	changed.sort();
	changed
}
