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
//! Event loop driving the reconcilers.
//!
//! One instance per process. It owns the timers and the trigger queue, and publishes the latest rankings.
//! Overlapping work is never serialised across instances, every write is an idempotent overwrite.

use crate::{
	constants::{DEFAULT_POLL_INTERVAL_SECS, MAX_CONSECUTIVE_FAILURES, MAX_TRIGGER_QUEUE_SIZE},
	init::Shutdown,
	phase_sync::PhaseReconciler,
	vote_sync::{Rankings, VoteReconciler},
};
use log::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
	sync::{broadcast, mpsc, watch},
	time::{Instant, interval_at},
};
use typed_builder::TypedBuilder;

/// Why a reconciliation round runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum SyncTrigger {
	Startup,
	Interval,
	/// Connectivity came back
	NetworkRestored,
	/// The user came back to the application
	Focused,
	/// "Check API phase"
	Explicit,
	/// Rankings only
	Refresh,
	/// Another process rewrote the cache
	StorageChanged,
	SetAutoRefresh(bool),
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct SyncOptions {
	#[builder(default = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))]
	poll_interval: Duration,
	/// How often the cache is checked for writes from other processes
	#[builder(default = Duration::from_secs(1))]
	storage_check_interval: Duration,
	#[builder(default = true)]
	auto_refresh: bool,
	#[builder(default = MAX_CONSECUTIVE_FAILURES)]
	max_consecutive_failures: u32,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Cheap handle for feeding triggers and reading results
#[derive(Clone)]
pub struct SyncHandle {
	triggers: mpsc::Sender<SyncTrigger>,
	rankings: watch::Receiver<Option<Rankings>>,
}

impl SyncHandle {
	/// Queues a trigger, false once the service stopped
	pub async fn trigger(&self, trigger: SyncTrigger) -> bool {
		self.triggers.send(trigger).await.is_ok()
	}

	pub fn rankings(&self) -> watch::Receiver<Option<Rankings>> {
		self.rankings.clone()
	}
}

pub struct SyncService {
	phase: Arc<PhaseReconciler>,
	votes: Arc<VoteReconciler>,
	options: SyncOptions,
	triggers_tx: mpsc::Sender<SyncTrigger>,
	triggers_rx: mpsc::Receiver<SyncTrigger>,
	rankings_tx: watch::Sender<Option<Rankings>>,
	rankings_rx: watch::Receiver<Option<Rankings>>,
	auto_refresh: bool,
	consecutive_failures: u32,
	/// Set by a failed poll, cleared by the next successful one
	unreachable: bool,
}

impl SyncService {
	pub fn new(phase: Arc<PhaseReconciler>, votes: Arc<VoteReconciler>, options: SyncOptions) -> Self {
		let (triggers_tx, triggers_rx) = mpsc::channel(MAX_TRIGGER_QUEUE_SIZE);
		let (rankings_tx, rankings_rx) = watch::channel(None);
		let auto_refresh = options.auto_refresh;
		Self {
			phase,
			votes,
			options,
			triggers_tx,
			triggers_rx,
			rankings_tx,
			rankings_rx,
			auto_refresh,
			consecutive_failures: 0,
			unreachable: false,
		}
	}

	pub fn handle(&self) -> SyncHandle {
		SyncHandle { triggers: self.triggers_tx.clone(), rankings: self.rankings_rx.clone() }
	}

	pub async fn run(mut self, mut shutdown: broadcast::Receiver<Shutdown>) -> color_eyre::Result<()> {
		self.handle_trigger(SyncTrigger::Startup).await;

		let mut poll = interval_at(Instant::now() + self.options.poll_interval, self.options.poll_interval);
		let mut storage =
			interval_at(Instant::now() + self.options.storage_check_interval, self.options.storage_check_interval);

		loop {
			tokio::select! {
				_ = poll.tick() => self.handle_trigger(SyncTrigger::Interval).await,
				_ = storage.tick() => {
					if self.phase.handle_storage_change() {
						self.handle_trigger(SyncTrigger::StorageChanged).await;
					}
				},
				Some(trigger) = self.triggers_rx.recv() => self.handle_trigger(trigger).await,
				_ = shutdown.recv() => {
					info!("sync service stopping");
					return Ok(())
				},
			}
		}
	}

	async fn handle_trigger(&mut self, trigger: SyncTrigger) {
		debug!("sync triggered: {}", trigger);
		match trigger {
			SyncTrigger::Startup | SyncTrigger::NetworkRestored | SyncTrigger::Focused => {
				self.poll_phase().await;
				self.refresh_rankings().await;
			},
			SyncTrigger::Interval => {
				self.poll_phase().await;
				if self.auto_refresh {
					self.refresh_rankings().await;
				}
			},
			SyncTrigger::Explicit => self.poll_phase().await,
			SyncTrigger::Refresh | SyncTrigger::StorageChanged => self.refresh_rankings().await,
			SyncTrigger::SetAutoRefresh(enabled) => {
				info!("auto refresh {}", if enabled { "enabled" } else { "disabled" });
				self.auto_refresh = enabled;
			},
		}
	}

	async fn poll_phase(&mut self) {
		match self.phase.poll().await {
			Ok(_) if self.unreachable => {
				info!("API reachable again");
				self.unreachable = false;
				self.consecutive_failures = 0;
				self.refresh_rankings().await;
			},
			Ok(_) => {},
			Err(err) => {
				self.unreachable = true;
				self.consecutive_failures += 1;
				warn!("phase poll failed ({} in a row)", self.consecutive_failures);
				if self.consecutive_failures >= self.options.max_consecutive_failures {
					error!(
						"phase sync failed {} times in a row, last error: {}. Showing {}",
						self.consecutive_failures,
						err,
						self.phase.display_current()
					);
					self.consecutive_failures = 0;
				}
			},
		}
	}

	async fn refresh_rankings(&self) {
		let rankings = self.votes.rankings().await;
		if let Some(err) = &rankings.error {
			warn!("rankings degraded: {}", err);
		}
		self.rankings_tx.send_replace(Some(rankings));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		api::MockRemoteAuthority,
		cache::LocalCache,
		phase_sync::PhaseEvent,
		test_utils::{api_unavailable, ranking_record},
		types::{Phase, PhaseSource},
	};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn service(remote: MockRemoteAuthority, cache: &LocalCache, options: SyncOptions) -> SyncService {
		let remote = Arc::new(remote);
		let phase = Arc::new(PhaseReconciler::new(cache.clone(), remote.clone(), None));
		let votes = Arc::new(VoteReconciler::new(cache.clone(), remote, None, 84532));
		SyncService::new(phase, votes, options)
	}

	fn quiet() -> SyncOptions {
		SyncOptions::builder()
			.poll_interval(Duration::from_secs(3600))
			.storage_check_interval(Duration::from_secs(3600))
			.build()
	}

	#[tokio::test]
	async fn startup_polls_phase_and_rankings() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("Voting".to_string()));
		remote.expect_top_rankings().returning(|| Ok(vec![ranking_record("1", 3)]));
		let cache = LocalCache::in_memory();
		let service = service(remote, &cache, quiet());
		let handle = service.handle();
		let mut rankings = handle.rankings();
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let task = tokio::spawn(service.run(shutdown_rx));

		rankings.changed().await.unwrap();
		assert_eq!(rankings.borrow().as_ref().unwrap().proposals.len(), 1);
		assert_eq!(cache.current_phase(), Some(Phase::Voting));

		shutdown_tx.send(Shutdown::Graceful).unwrap();
		task.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn early_subscribers_see_the_startup_change() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("Voting".to_string()));
		remote.expect_top_rankings().returning(|| Ok(vec![]));
		let remote = Arc::new(remote);
		let cache = LocalCache::in_memory();
		let phase = Arc::new(PhaseReconciler::new(cache.clone(), remote.clone(), None));
		let votes = Arc::new(VoteReconciler::new(cache, remote, None, 84532));
		let service = SyncService::new(phase.clone(), votes, quiet());
		let mut events = phase.subscribe();
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let task = tokio::spawn(service.run(shutdown_rx));

		assert_eq!(
			events.recv().await.unwrap(),
			PhaseEvent::Changed { phase: Phase::Voting, previous: None, source: PhaseSource::Sync }
		);

		shutdown_tx.send(Shutdown::Graceful).unwrap();
		task.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn explicit_trigger_polls_the_phase() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(move || {
			let phase = if counter.fetch_add(1, Ordering::SeqCst) == 0 { "Submission" } else { "GroqCheck" };
			Ok(phase.to_string())
		});
		remote.expect_top_rankings().returning(|| Ok(vec![]));
		let cache = LocalCache::in_memory();
		let mut service = service(remote, &cache, quiet());

		service.handle_trigger(SyncTrigger::Startup).await;
		assert_eq!(cache.current_phase(), Some(Phase::Submission));
		service.handle_trigger(SyncTrigger::Explicit).await;
		assert_eq!(cache.current_phase(), Some(Phase::GroqCheck));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn failures_are_counted_and_reset() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(move || {
			if counter.fetch_add(1, Ordering::SeqCst) < 4 { Err(api_unavailable()) } else { Ok("Voting".to_string()) }
		});
		remote.expect_top_rankings().times(1).returning(|| Ok(vec![]));
		let cache = LocalCache::in_memory();
		let mut service = service(remote, &cache, quiet());
		service.auto_refresh = false;

		for _ in 0..3 {
			service.handle_trigger(SyncTrigger::Interval).await;
		}
		assert_eq!(service.consecutive_failures, 0);
		service.handle_trigger(SyncTrigger::Interval).await;
		assert_eq!(service.consecutive_failures, 1);

		// First success after failures refreshes the rankings once
		service.handle_trigger(SyncTrigger::Interval).await;
		assert_eq!(service.consecutive_failures, 0);
		assert!(service.rankings_rx.borrow().is_some());
	}

	#[tokio::test]
	async fn recovery_after_reported_failures_refreshes_rankings() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(move || {
			if counter.fetch_add(1, Ordering::SeqCst) < 3 { Err(api_unavailable()) } else { Ok("Voting".to_string()) }
		});
		remote.expect_top_rankings().times(1).returning(|| Ok(vec![ranking_record("1", 2)]));
		let cache = LocalCache::in_memory();
		let mut service = service(remote, &cache, quiet());
		service.auto_refresh = false;

		for _ in 0..3 {
			service.handle_trigger(SyncTrigger::Interval).await;
		}
		assert_eq!(service.consecutive_failures, 0);
		assert!(service.unreachable);

		service.handle_trigger(SyncTrigger::Interval).await;
		assert!(!service.unreachable);
		assert_eq!(service.rankings_rx.borrow().as_ref().unwrap().proposals.len(), 1);

		// Still reachable, auto refresh off
		service.handle_trigger(SyncTrigger::Interval).await;
		assert_eq!(calls.load(Ordering::SeqCst), 5);
	}

	#[tokio::test]
	async fn auto_refresh_can_be_disabled() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_current_phase().returning(|| Ok("Voting".to_string()));
		remote.expect_top_rankings().never();
		let cache = LocalCache::in_memory();
		let mut service = service(remote, &cache, quiet());

		service.handle_trigger(SyncTrigger::SetAutoRefresh(false)).await;
		service.handle_trigger(SyncTrigger::Interval).await;
		assert!(service.rankings_rx.borrow().is_none());
	}
}
