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

use super::store::{CacheError, KeyValueStore};
use std::collections::BTreeMap;

/// Volatile store, also used as the degraded-mode fallback
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	entries: BTreeMap<String, String>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
		Ok(self.entries.get(key).cloned())
	}

	fn set(&mut self, key: &str, value: String) -> Result<(), CacheError> {
		self.entries.insert(key.to_string(), value);
		Ok(())
	}

	fn remove(&mut self, key: &str) -> Result<(), CacheError> {
		self.entries.remove(key);
		Ok(())
	}

	fn keys(&self) -> Result<Vec<String>, CacheError> {
		Ok(self.entries.keys().cloned().collect())
	}
}
