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
//! Phase reconciliation between the local cache, the API and the ledger.
//!
//! The API wins every automatic poll. Administrative writes go to the API first and touch the cache only
//! once the API accepted them. The ledger can only feed the administrative pipeline, never the reverse.

use crate::{
	api::{ApiError, RemoteAuthority},
	cache::{LocalCache, keys},
	constants::PHASE_EVENTS_CAPACITY,
	ledger::{ContractCapability, LedgerClient, LedgerError},
	types::{Phase, PhaseHistoryEntry, PhaseSource, display_phase},
	utils::now_millis,
};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Broadcast to in-process listeners
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhaseEvent {
	Changed { phase: Phase, previous: Option<Phase>, source: PhaseSource },
	/// Another process rewrote the cache, all state was re-read
	Reloaded { phase: Option<Phase> },
}

#[derive(Debug, Error)]
pub enum PhaseSyncError {
	#[error("remote authority: {0}")]
	Remote(#[from] ApiError),
	#[error("ledger: {0}")]
	Ledger(#[from] LedgerError),
	#[error("remote authority returned an unknown phase {0:?}")]
	UnknownPhase(String),
	#[error("{0} is the last phase")]
	NoNextPhase(Phase),
	#[error("{0} is the first phase")]
	NoPreviousPhase(Phase),
	#[error("no ledger configured")]
	NoLedger,
	#[error("the deployed contract ({0}) does not expose the phase")]
	UnsupportedContract(ContractCapability),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
	Unchanged(Phase),
	Updated { phase: Phase, previous: Option<Phase> },
}

pub struct PhaseReconciler {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
	ledger: Option<Arc<dyn LedgerClient>>,
	events: broadcast::Sender<PhaseEvent>,
}

impl PhaseReconciler {
	pub fn new(cache: LocalCache, remote: Arc<dyn RemoteAuthority>, ledger: Option<Arc<dyn LedgerClient>>) -> Self {
		let (events, _) = broadcast::channel(PHASE_EVENTS_CAPACITY);
		Self { cache, remote, ledger, events }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PhaseEvent> {
		self.events.subscribe()
	}

	/// Last known phase, absent when nothing valid was ever stored
	pub fn current(&self) -> Option<Phase> {
		self.cache.current_phase()
	}

	pub fn display_current(&self) -> String {
		display_phase(self.current())
	}

	pub fn history(&self) -> Vec<PhaseHistoryEntry> {
		self.cache.phase_history()
	}

	fn notify(&self, event: PhaseEvent) {
		// No receivers is fine
		let _ = self.events.send(event);
	}

	fn record_change(&self, phase: Phase, source: PhaseSource) -> Option<Phase> {
		let previous = self.current();
		self.cache.set_current_phase(phase);
		self.cache.push_phase_history(PhaseHistoryEntry { phase, timestamp: now_millis(), source, previous });
		info!("phase {} -> {} ({})", display_phase(previous), phase, source);
		self.notify(PhaseEvent::Changed { phase, previous, source });
		previous
	}

	/// One reconciliation round against the API. On failure the cache is left alone.
	pub async fn poll(&self) -> Result<PollOutcome, PhaseSyncError> {
		let raw = match self.remote.current_phase().await {
			Ok(raw) => raw,
			Err(err) => {
				warn!("cannot fetch phase, keeping {}: {}", self.display_current(), err);
				return Err(err.into())
			},
		};
		let Some(remote) = Phase::parse(&raw) else {
			warn!("ignoring unknown phase {:?} from the API", raw);
			return Err(PhaseSyncError::UnknownPhase(raw))
		};

		if self.current() == Some(remote) {
			// Normalise aliases left by older writers
			if self.cache.get(keys::CURRENT_PHASE).as_deref() != Some(remote.as_str()) {
				self.cache.set_current_phase(remote);
			}
			debug!("phase unchanged: {}", remote);
			return Ok(PollOutcome::Unchanged(remote))
		}

		let previous = self.record_change(remote, PhaseSource::Sync);
		Ok(PollOutcome::Updated { phase: remote, previous })
	}

	/// Administrative direct set
	pub async fn set_phase_admin(&self, phase: Phase) -> Result<(), PhaseSyncError> {
		self.set_phase_from(phase, PhaseSource::Admin).await
	}

	async fn set_phase_from(&self, phase: Phase, source: PhaseSource) -> Result<(), PhaseSyncError> {
		if let Err(err) = self.remote.update_phase(phase).await {
			warn!("API rejected phase {}, keeping {}: {}", phase, self.display_current(), err);
			return Err(err.into())
		}
		self.record_change(phase, source);

		if phase == Phase::GroqCheck {
			match self.remote.start_evaluation().await {
				Ok(()) => info!("evaluation started"),
				Err(err) => warn!("cannot start evaluation: {}", err),
			}
		}
		Ok(())
	}

	pub async fn advance(&self) -> Result<Phase, PhaseSyncError> {
		let current = self.current().unwrap_or(Phase::Submission);
		let next = current.next().ok_or(PhaseSyncError::NoNextPhase(current))?;
		self.set_phase_admin(next).await?;
		Ok(next)
	}

	pub async fn revert(&self) -> Result<Phase, PhaseSyncError> {
		let current = self.current().unwrap_or(Phase::Submission);
		let previous = current.prev().ok_or(PhaseSyncError::NoPreviousPhase(current))?;
		self.set_phase_admin(previous).await?;
		Ok(previous)
	}

	/// Whether `expected` is in effect, locally or according to the API
	pub async fn verify(&self, expected: Phase) -> bool {
		if self.current() == Some(expected) {
			return true
		}
		match self.remote.current_phase().await {
			Ok(raw) => Phase::parse(&raw) == Some(expected),
			Err(err) => {
				warn!("cannot verify phase with the API: {}", err);
				false
			},
		}
	}

	/// Pulls the phase from the ledger into the administrative pipeline
	pub async fn sync_from_ledger(&self) -> Result<Phase, PhaseSyncError> {
		let ledger = self.ledger.as_ref().ok_or(PhaseSyncError::NoLedger)?;
		let capability = ledger.capability().await?;
		if capability != ContractCapability::VersionedPhase {
			return Err(PhaseSyncError::UnsupportedContract(capability))
		}
		let phase = ledger.get_phase().await?;
		info!("ledger phase is {}", phase);
		self.set_phase_from(phase, PhaseSource::Ledger).await?;
		Ok(phase)
	}

	/// Reacts to writes made by another process: everything is re-read from the store
	pub fn handle_storage_change(&self) -> bool {
		let changed = self.cache.reload();
		if changed.is_empty() {
			return false
		}
		debug!("cache changed externally: {:?}", changed);
		let phase = self.current();
		info!("cache reloaded, phase is {}", display_phase(phase));
		self.notify(PhaseEvent::Reloaded { phase });
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		api::MockRemoteAuthority,
		cache::FileStore,
		ledger::MockLedgerClient,
		test_utils::{api_unavailable, ledger_unavailable},
	};
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::{Duration, UNIX_EPOCH},
	};

	fn reconciler(remote: MockRemoteAuthority) -> (PhaseReconciler, LocalCache) {
		let cache = LocalCache::in_memory();
		(PhaseReconciler::new(cache.clone(), Arc::new(remote), None), cache)
	}

	#[tokio::test]
	async fn remote_wins_and_is_normalised() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("groq".to_string()));
		let (reconciler, cache) = reconciler(remote);
		cache.set_current_phase(Phase::Submission);
		let mut events = reconciler.subscribe();

		let outcome = reconciler.poll().await.unwrap();

		assert_eq!(outcome, PollOutcome::Updated { phase: Phase::GroqCheck, previous: Some(Phase::Submission) });
		assert_eq!(cache.get(keys::CURRENT_PHASE).as_deref(), Some("GroqCheck"));
		let history = reconciler.history();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].source, PhaseSource::Sync);
		assert_eq!(history[0].previous, Some(Phase::Submission));
		assert_eq!(
			events.try_recv().unwrap(),
			PhaseEvent::Changed { phase: Phase::GroqCheck, previous: Some(Phase::Submission), source: PhaseSource::Sync }
		);
	}

	#[tokio::test]
	async fn alias_is_not_a_change() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("Groq".to_string()));
		let (reconciler, cache) = reconciler(remote);
		cache.set(keys::CURRENT_PHASE, "groq");

		assert_eq!(reconciler.poll().await.unwrap(), PollOutcome::Unchanged(Phase::GroqCheck));
		assert!(reconciler.history().is_empty());
		assert_eq!(cache.get(keys::CURRENT_PHASE).as_deref(), Some("GroqCheck"));
	}

	#[tokio::test]
	async fn last_applied_value_wins() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(move || {
			let phases = ["Voting", "Submission", "Completed"];
			Ok(phases[counter.fetch_add(1, Ordering::SeqCst) % phases.len()].to_string())
		});
		let (reconciler, cache) = reconciler(remote);

		for expected in [Phase::Voting, Phase::Submission, Phase::Completed] {
			reconciler.poll().await.unwrap();
			assert_eq!(cache.current_phase(), Some(expected));
		}
		assert_eq!(reconciler.history().len(), 3);
	}

	#[tokio::test]
	async fn failed_poll_keeps_the_cache() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Err(api_unavailable()));
		let (reconciler, cache) = reconciler(remote);
		cache.set_current_phase(Phase::Voting);

		assert!(matches!(reconciler.poll().await, Err(PhaseSyncError::Remote(_))));
		assert_eq!(reconciler.current(), Some(Phase::Voting));
		assert!(reconciler.history().is_empty());
	}

	#[tokio::test]
	async fn unknown_remote_phase_is_ignored() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("Paused".to_string()));
		let (reconciler, cache) = reconciler(remote);
		cache.set_current_phase(Phase::Voting);

		assert!(matches!(reconciler.poll().await, Err(PhaseSyncError::UnknownPhase(_))));
		assert_eq!(reconciler.current(), Some(Phase::Voting));
	}

	#[tokio::test]
	async fn admin_set_requires_remote_success() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_update_phase().returning(|_| Err(api_unavailable()));
		let (reconciler, cache) = reconciler(remote);
		cache.set_current_phase(Phase::Submission);

		assert!(reconciler.set_phase_admin(Phase::Voting).await.is_err());
		assert_eq!(reconciler.current(), Some(Phase::Submission));
		assert!(reconciler.history().is_empty());
	}

	#[tokio::test]
	async fn admin_set_to_groq_check_starts_evaluation() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_update_phase().withf(|phase| *phase == Phase::GroqCheck).times(1).returning(|_| Ok(()));
		remote.expect_start_evaluation().times(1).returning(|| Err(api_unavailable()));
		let (reconciler, _cache) = reconciler(remote);

		reconciler.set_phase_admin(Phase::GroqCheck).await.unwrap();

		assert_eq!(reconciler.current(), Some(Phase::GroqCheck));
		assert_eq!(reconciler.history()[0].source, PhaseSource::Admin);
	}

	#[tokio::test]
	async fn advance_and_revert_stop_at_the_ends() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_update_phase().returning(|_| Ok(()));
		let (reconciler, cache) = reconciler(remote);

		cache.set_current_phase(Phase::Voting);
		assert_eq!(reconciler.advance().await.unwrap(), Phase::Completed);
		assert!(matches!(reconciler.advance().await, Err(PhaseSyncError::NoNextPhase(Phase::Completed))));

		cache.set_current_phase(Phase::Submission);
		assert!(matches!(reconciler.revert().await, Err(PhaseSyncError::NoPreviousPhase(Phase::Submission))));
	}

	#[tokio::test]
	async fn verify_falls_back_to_remote() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("GROQ".to_string()));
		let (reconciler, cache) = reconciler(remote);
		cache.set_current_phase(Phase::Submission);

		assert!(reconciler.verify(Phase::Submission).await);
		assert!(reconciler.verify(Phase::GroqCheck).await);
		assert!(!reconciler.verify(Phase::Voting).await);
	}

	#[tokio::test]
	async fn ledger_phase_goes_through_the_admin_pipeline() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_update_phase().withf(|phase| *phase == Phase::Voting).times(1).returning(|_| Ok(()));
		let mut ledger = MockLedgerClient::new();
		ledger.expect_capability().returning(|| Ok(ContractCapability::VersionedPhase));
		ledger.expect_get_phase().returning(|| Ok(Phase::Voting));
		let cache = LocalCache::in_memory();
		let reconciler = PhaseReconciler::new(cache, Arc::new(remote), Some(Arc::new(ledger)));

		assert_eq!(reconciler.sync_from_ledger().await.unwrap(), Phase::Voting);
		assert_eq!(reconciler.history()[0].source, PhaseSource::Ledger);
	}

	#[tokio::test]
	async fn legacy_ledger_is_not_a_phase_source() {
		let mut ledger = MockLedgerClient::new();
		ledger.expect_capability().returning(|| Ok(ContractCapability::Legacy));
		let reconciler =
			PhaseReconciler::new(LocalCache::in_memory(), Arc::new(MockRemoteAuthority::new()), Some(Arc::new(ledger)));

		assert!(matches!(
			reconciler.sync_from_ledger().await,
			Err(PhaseSyncError::UnsupportedContract(ContractCapability::Legacy))
		));
	}

	#[tokio::test]
	async fn unreachable_ledger_leaves_phase_alone() {
		let mut ledger = MockLedgerClient::new();
		ledger.expect_capability().returning(|| Err(ledger_unavailable()));
		let cache = LocalCache::in_memory();
		cache.set_current_phase(Phase::Voting);
		let reconciler = PhaseReconciler::new(cache, Arc::new(MockRemoteAuthority::new()), Some(Arc::new(ledger)));

		assert!(matches!(reconciler.sync_from_ledger().await, Err(PhaseSyncError::Ledger(_))));
		assert_eq!(reconciler.current(), Some(Phase::Voting));
	}

	#[tokio::test]
	async fn foreign_cache_write_triggers_reload() {
		let dir = std::env::temp_dir().join(format!("lumos-sync-phase-reload-{}", std::process::id()));
		let _ = std::fs::remove_dir_all(&dir);
		let path = dir.join("cache.json");
		let ours = LocalCache::new(FileStore::open(&path).unwrap());
		let theirs = LocalCache::new(FileStore::open(&path).unwrap());
		let reconciler = PhaseReconciler::new(ours, Arc::new(MockRemoteAuthority::new()), None);
		let mut events = reconciler.subscribe();
		assert!(!reconciler.handle_storage_change());

		theirs.set_current_phase(Phase::Completed);
		let file = std::fs::File::options().write(true).open(&path).unwrap();
		file.set_modified(UNIX_EPOCH + Duration::from_secs(42)).unwrap();

		assert!(reconciler.handle_storage_change());
		assert_eq!(reconciler.current(), Some(Phase::Completed));
		assert_eq!(events.try_recv().unwrap(), PhaseEvent::Reloaded { phase: Some(Phase::Completed) });
	}
}
