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
//! Durable local state: last known phase, phase history, optimistic vote records and fallback proposals.
//!
//! Every value is a plain string or JSON document under a fixed key. The layout carries no schema version,
//! values written by an incompatible build are ignored on read and overwritten on the next write.

mod file;
mod memory;
mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CacheError, KeyValueStore};

use crate::{
	constants::MAX_PHASE_HISTORY,
	types::{EvaluationProgress, Phase, PhaseHistoryEntry, Proposal, Timestamp, TxHash, VoteStatus},
	utils::now_millis,
};
use log::{debug, warn};
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex, MutexGuard},
};

pub mod keys {
	pub const CURRENT_PHASE: &str = "lumos_current_phase";
	pub const PHASE_HISTORY: &str = "lumos_phase_history";
	pub const LOCAL_VOTED_PROPOSALS: &str = "localVotedProposals";
	pub const FALLBACK_PROPOSALS: &str = "fallbackProposals";
	pub const RANKINGS_SNAPSHOT: &str = "proposals_api_cache";
	pub const DEVICE_ID: &str = "lumos_device_id";
	pub const EVALUATION_STATE: &str = "groq_evaluation_state";

	pub fn has_voted(voter: &str) -> String {
		format!("hasVoted_{}", voter.to_lowercase())
	}

	pub fn voted_for(voter: &str) -> String {
		format!("votedFor_{}", voter.to_lowercase())
	}

	pub fn vote_transaction(voter: &str) -> String {
		format!("voteTransaction_{}", voter.to_lowercase())
	}

	pub fn local_vote_count(proposal_id: &str) -> String {
		format!("localVoteCount_{}", proposal_id)
	}

	pub fn local_vote_timestamp(proposal_id: &str) -> String {
		format!("localVoteTimestamp_{}", proposal_id)
	}

	pub fn local_vote_status(proposal_id: &str) -> String {
		format!("localVoteStatus_{}", proposal_id)
	}

	/// Everything the application may have written, cleared by an admin reset
	pub fn is_app_key(key: &str) -> bool {
		key.starts_with("lumos_") ||
			key.starts_with("hasVoted_") ||
			key.starts_with("votedFor_") ||
			key.starts_with("voteTransaction_") ||
			key.starts_with("localVote") ||
			key == FALLBACK_PROPOSALS ||
			key == RANKINGS_SNAPSHOT ||
			key == EVALUATION_STATE
	}
}

struct CacheInner {
	store: Box<dyn KeyValueStore>,
	/// Serves all operations once the durable store failed
	fallback: MemoryStore,
	degraded: bool,
}

impl CacheInner {
	fn degrade(&mut self, op: &str, err: CacheError) {
		if !self.degraded {
			warn!("local storage failed on {}: {}, continuing in memory-only mode", op, err);
			self.degraded = true;
		} else {
			debug!("local storage still failing on {}: {}", op, err);
		}
	}

	fn get(&mut self, key: &str) -> Option<String> {
		if self.degraded {
			if let Ok(Some(value)) = self.fallback.get(key) {
				return Some(value)
			}
		}
		match self.store.get(key) {
			Ok(value) => value,
			Err(err) => {
				self.degrade("read", err);
				self.fallback.get(key).ok().flatten()
			},
		}
	}

	fn set(&mut self, key: &str, value: String) {
		if self.degraded {
			let _ = self.fallback.set(key, value);
			return
		}
		if let Err(err) = self.store.set(key, value.clone()) {
			self.degrade("write", err);
			let _ = self.fallback.set(key, value);
		}
	}

	fn remove(&mut self, key: &str) {
		let _ = self.fallback.remove(key);
		if let Err(err) = self.store.remove(key) {
			self.degrade("remove", err);
		}
	}

	fn keys(&mut self) -> Vec<String> {
		let mut keys = match self.store.keys() {
			Ok(keys) => keys,
			Err(err) => {
				self.degrade("list", err);
				vec![]
			},
		};
		keys.extend(self.fallback.keys().unwrap_or_default());
		keys.sort();
		keys.dedup();
		keys
	}
}

/// Shared handle to the local cache. Clones see the same state; writers do not coordinate, last write wins.
#[derive(Clone)]
pub struct LocalCache {
	inner: Arc<Mutex<CacheInner>>,
}

impl LocalCache {
	pub fn new(store: impl KeyValueStore + 'static) -> Self {
		Self {
			inner: Arc::new(Mutex::new(CacheInner {
				store: Box::new(store),
				fallback: MemoryStore::new(),
				degraded: false,
			})),
		}
	}

	pub fn in_memory() -> Self {
		Self::new(MemoryStore::new())
	}

	fn lock(&self) -> MutexGuard<'_, CacheInner> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn is_degraded(&self) -> bool {
		self.lock().degraded
	}

	pub fn get(&self, key: &str) -> Option<String> {
		self.lock().get(key)
	}

	pub fn set(&self, key: &str, value: impl Into<String>) {
		self.lock().set(key, value.into())
	}

	pub fn remove(&self, key: &str) {
		self.lock().remove(key)
	}

	pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		let raw = self.get(key)?;
		match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(err) => {
				warn!("ignoring unreadable cached value under {}: {}", key, err);
				None
			},
		}
	}

	pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
		match serde_json::to_string(value) {
			Ok(raw) => self.set(key, raw),
			Err(err) => warn!("cannot serialize value for {}: {}", key, err),
		}
	}

	/// Re-reads the durable store, returning keys changed by another process
	pub fn reload(&self) -> Vec<String> {
		let mut inner = self.lock();
		match inner.store.reload() {
			Ok(changed) => changed,
			Err(err) => {
				inner.degrade("reload", err);
				vec![]
			},
		}
	}

	/// Unknown or unreadable phase values are treated as absent
	pub fn current_phase(&self) -> Option<Phase> {
		let raw = self.get(keys::CURRENT_PHASE)?;
		let phase = Phase::parse(&raw);
		if phase.is_none() {
			warn!("ignoring unknown cached phase {:?}", raw);
		}
		phase
	}

	pub fn set_current_phase(&self, phase: Phase) {
		self.set(keys::CURRENT_PHASE, phase.as_str())
	}

	pub fn phase_history(&self) -> Vec<PhaseHistoryEntry> {
		self.get_json(keys::PHASE_HISTORY).unwrap_or_default()
	}

	/// Appends to the bounded history, oldest entries are evicted first
	pub fn push_phase_history(&self, entry: PhaseHistoryEntry) {
		let mut history = self.phase_history();
		history.push(entry);
		if history.len() > MAX_PHASE_HISTORY {
			let excess = history.len() - MAX_PHASE_HISTORY;
			history.drain(..excess);
		}
		self.set_json(keys::PHASE_HISTORY, &history)
	}

	pub fn has_voted(&self, voter: &str) -> bool {
		self.get(&keys::has_voted(voter)).is_some_and(|v| v == "true")
	}

	pub fn voted_for(&self, voter: &str) -> Option<String> {
		self.get(&keys::voted_for(voter))
	}

	pub fn vote_transaction(&self, voter: &str) -> Option<TxHash> {
		self.get(&keys::vote_transaction(voter))
	}

	/// Optimistic record of a vote accepted by the ledger but not yet confirmed
	pub fn record_local_vote(&self, voter: &str, proposal_id: &str, tx_hash: Option<&str>) {
		self.set(&keys::local_vote_count(proposal_id), "1");
		self.set(&keys::local_vote_timestamp(proposal_id), now_millis().to_string());
		self.set(&keys::has_voted(voter), "true");
		self.set(&keys::voted_for(voter), proposal_id);
		if let Some(tx_hash) = tx_hash {
			self.set(&keys::vote_transaction(voter), tx_hash);
		}

		let mut voted = self.local_voted_proposals();
		if !voted.iter().any(|id| id == proposal_id) {
			voted.push(proposal_id.to_string());
			self.set_json(keys::LOCAL_VOTED_PROPOSALS, &voted);
		}
	}

	pub fn local_vote_count(&self, proposal_id: &str) -> u64 {
		self.get(&keys::local_vote_count(proposal_id))
			.and_then(|raw| raw.trim().parse().ok())
			.unwrap_or(0)
	}

	pub fn local_vote_timestamp(&self, proposal_id: &str) -> Option<Timestamp> {
		self.get(&keys::local_vote_timestamp(proposal_id)).and_then(|raw| raw.parse().ok())
	}

	pub fn local_vote_status(&self, proposal_id: &str) -> Option<VoteStatus> {
		self.get(&keys::local_vote_status(proposal_id)).and_then(|raw| raw.parse().ok())
	}

	pub fn set_local_vote_status(&self, proposal_id: &str, status: VoteStatus) {
		self.set(&keys::local_vote_status(proposal_id), status.to_string())
	}

	pub fn local_voted_proposals(&self) -> Vec<String> {
		self.get_json(keys::LOCAL_VOTED_PROPOSALS).unwrap_or_default()
	}

	/// Raw local counters of every proposal voted from this client
	pub fn local_votes(&self) -> BTreeMap<String, String> {
		self.local_voted_proposals()
			.into_iter()
			.map(|id| {
				let count = self.get(&keys::local_vote_count(&id)).unwrap_or_else(|| "0".to_string());
				(id, count)
			})
			.collect()
	}

	pub fn fallback_proposals(&self) -> Vec<Proposal> {
		self.get_json(keys::FALLBACK_PROPOSALS).unwrap_or_default()
	}

	pub fn set_fallback_proposals(&self, proposals: &[Proposal]) {
		self.set_json(keys::FALLBACK_PROPOSALS, proposals)
	}

	/// Last successfully fetched ranking list
	pub fn rankings_snapshot(&self) -> Option<Vec<Proposal>> {
		self.get_json(keys::RANKINGS_SNAPSHOT)
	}

	pub fn set_rankings_snapshot(&self, proposals: &[Proposal]) {
		self.set_json(keys::RANKINGS_SNAPSHOT, proposals)
	}

	pub fn evaluation_state(&self) -> Option<EvaluationProgress> {
		self.get_json(keys::EVALUATION_STATE)
	}

	pub fn set_evaluation_state(&self, progress: &EvaluationProgress) {
		self.set_json(keys::EVALUATION_STATE, progress)
	}

	/// Stable identifier of this client, created on first use
	pub fn device_id(&self) -> String {
		if let Some(id) = self.get(keys::DEVICE_ID) {
			return id
		}
		let id = new_device_id(now_millis());
		self.set(keys::DEVICE_ID, id.clone());
		id
	}

	/// Drops every application key, returns how many were removed
	pub fn clear_app_state(&self) -> usize {
		let mut inner = self.lock();
		let app_keys: Vec<String> = inner.keys().into_iter().filter(|key| keys::is_app_key(key)).collect();
		for key in &app_keys {
			inner.remove(key);
		}
		app_keys.len()
	}
}

fn new_device_id(now: Timestamp) -> String {
	const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
	let mut rng = rand::thread_rng();
	let suffix: String = (0..7).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
	format!("device_{}_{}", now, suffix)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::PhaseSource;

	struct BrokenStore;

	impl KeyValueStore for BrokenStore {
		fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
			Err(CacheError::Unavailable("disabled".into()))
		}

		fn set(&mut self, _key: &str, _value: String) -> Result<(), CacheError> {
			Err(CacheError::Unavailable("quota exceeded".into()))
		}

		fn remove(&mut self, _key: &str) -> Result<(), CacheError> {
			Err(CacheError::Unavailable("disabled".into()))
		}

		fn keys(&self) -> Result<Vec<String>, CacheError> {
			Err(CacheError::Unavailable("disabled".into()))
		}
	}

	#[test]
	fn history_keeps_the_latest_twenty() {
		let cache = LocalCache::in_memory();
		let phases = [Phase::Submission, Phase::GroqCheck, Phase::Voting, Phase::Completed];
		for i in 0..25u64 {
			cache.push_phase_history(PhaseHistoryEntry {
				phase: phases[(i % 4) as usize],
				timestamp: i,
				source: PhaseSource::Sync,
				previous: None,
			});
		}

		let history = cache.phase_history();
		assert_eq!(history.len(), 20);
		assert_eq!(history.first().unwrap().timestamp, 5);
		assert_eq!(history.last().unwrap().timestamp, 24);
	}

	#[test]
	fn records_optimistic_vote() {
		let cache = LocalCache::in_memory();
		cache.record_local_vote("0xAbC", "42", Some("0xfeed"));
		cache.record_local_vote("0xabc", "42", None);

		assert!(cache.has_voted("0xabc"));
		assert_eq!(cache.voted_for("0xABC").as_deref(), Some("42"));
		assert_eq!(cache.vote_transaction("0xabc").as_deref(), Some("0xfeed"));
		assert_eq!(cache.local_vote_count("42"), 1);
		assert!(cache.local_vote_timestamp("42").is_some());
		assert_eq!(cache.local_voted_proposals(), vec!["42".to_string()]);
		assert_eq!(cache.local_votes().get("42").map(String::as_str), Some("1"));
	}

	#[test]
	fn unknown_cached_phase_is_absent() {
		let cache = LocalCache::in_memory();
		cache.set(keys::CURRENT_PHASE, "Finished");
		assert_eq!(cache.current_phase(), None);
		cache.set(keys::CURRENT_PHASE, "groq");
		assert_eq!(cache.current_phase(), Some(Phase::GroqCheck));
	}

	#[test]
	fn failing_store_degrades_to_memory() {
		let cache = LocalCache::new(BrokenStore);
		cache.set_current_phase(Phase::Voting);

		assert!(cache.is_degraded());
		assert_eq!(cache.current_phase(), Some(Phase::Voting));
		assert_eq!(cache.local_vote_count("1"), 0);
	}

	#[test]
	fn device_id_is_stable() {
		let cache = LocalCache::in_memory();
		let id = cache.device_id();
		assert!(id.starts_with("device_"));
		assert_eq!(id.rsplit('_').next().unwrap().len(), 7);
		assert_eq!(cache.device_id(), id);
	}

	#[test]
	fn admin_reset_clears_app_keys_only() {
		let cache = LocalCache::in_memory();
		cache.set_current_phase(Phase::Voting);
		cache.record_local_vote("0xabc", "7", None);
		cache.set_fallback_proposals(&[Proposal { id: "local-1".into(), ..Default::default() }]);
		cache.set("unrelated", "keep");

		assert_eq!(cache.clear_app_state(), 7);
		assert_eq!(cache.current_phase(), None);
		assert!(!cache.has_voted("0xabc"));
		assert!(cache.fallback_proposals().is_empty());
		assert_eq!(cache.get("unrelated").as_deref(), Some("keep"));
	}

	#[test]
	fn shared_file_keeps_votes_of_other_processes() {
		let dir = std::env::temp_dir().join(format!("lumos-sync-shared-votes-{}", std::process::id()));
		let _ = std::fs::remove_dir_all(&dir);
		let path = dir.join("cache.json");
		let voter = LocalCache::new(FileStore::open(&path).unwrap());
		let watcher = LocalCache::new(FileStore::open(&path).unwrap());

		voter.record_local_vote("0xabc", "42", Some("0xfeed"));
		watcher.set_current_phase(Phase::Voting);
		voter.set_local_vote_status("42", VoteStatus::Confirmed);

		let reopened = LocalCache::new(FileStore::open(&path).unwrap());
		assert!(reopened.has_voted("0xabc"));
		assert_eq!(reopened.local_vote_count("42"), 1);
		assert_eq!(reopened.local_vote_status("42"), Some(VoteStatus::Confirmed));
		assert_eq!(reopened.current_phase(), Some(Phase::Voting));
		assert!(watcher.has_voted("0xabc"));
	}
}
