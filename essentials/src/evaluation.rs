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
//! Progress of the backend AI evaluation job.

use crate::{
	api::{ApiError, RemoteAuthority},
	cache::LocalCache,
	constants::EVALUATION_POLL_INTERVAL_MS,
	init::Shutdown,
	types::{EvaluationProgress, EvaluationStatus},
};
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, watch};

pub struct EvaluationTracker {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
	state: watch::Sender<EvaluationProgress>,
	interval: Duration,
}

impl EvaluationTracker {
	/// Restores the last persisted state
	pub fn new(cache: LocalCache, remote: Arc<dyn RemoteAuthority>) -> Self {
		let restored = cache.evaluation_state().unwrap_or_default();
		let (state, _) = watch::channel(restored);
		Self { cache, remote, state, interval: Duration::from_millis(EVALUATION_POLL_INTERVAL_MS) }
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn subscribe(&self) -> watch::Receiver<EvaluationProgress> {
		self.state.subscribe()
	}

	pub fn progress(&self) -> EvaluationProgress {
		self.state.borrow().clone()
	}

	/// Merges an update, an empty message keeps the previous one
	fn apply(&self, update: EvaluationProgress) -> EvaluationProgress {
		let mut merged = self.progress();
		merged.percent = update.percent.round().clamp(0.0, 100.0);
		merged.status = update.status;
		if !update.message.is_empty() {
			merged.message = update.message;
		}
		self.cache.set_evaluation_state(&merged);
		self.state.send_if_modified(|current| {
			let modified = *current != merged;
			*current = merged.clone();
			modified
		});
		merged
	}

	pub async fn refresh(&self) -> Result<EvaluationProgress, ApiError> {
		let update = self.remote.evaluation_progress().await?;
		debug!("evaluation {} at {}%", update.status, update.percent);
		Ok(self.apply(update))
	}

	/// Marks a job as running, a finished job stays finished until reset
	pub fn start(&self) -> bool {
		let current = self.progress();
		if current.status.is_terminal() {
			return false
		}
		if current.status == EvaluationStatus::Idle {
			self.apply(EvaluationProgress { status: EvaluationStatus::Running, ..current });
		}
		true
	}

	/// Asks the backend to start evaluating, then tracks it
	pub async fn request(&self) -> Result<bool, ApiError> {
		self.remote.start_evaluation().await?;
		info!("evaluation requested");
		Ok(self.start())
	}

	/// Polls until the job completes or fails, or until shutdown
	pub async fn watch_until_done(&self, mut shutdown: broadcast::Receiver<Shutdown>) -> EvaluationProgress {
		let mut interval = tokio::time::interval(self.interval);
		loop {
			tokio::select! {
				_ = interval.tick() => {
					match self.refresh().await {
						Ok(progress) if progress.status.is_terminal() => {
							info!("evaluation {}: {}", progress.status, progress.message);
							return progress
						},
						Ok(_) => {},
						Err(err) => warn!("cannot fetch evaluation progress: {}", err),
					}
				},
				_ = shutdown.recv() => return self.progress(),
			}
		}
	}

	pub fn reset(&self) {
		self.cache.set_evaluation_state(&EvaluationProgress::default());
		self.state.send_replace(EvaluationProgress::default());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{api::MockRemoteAuthority, test_utils::api_unavailable};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn progress(percent: f64, status: EvaluationStatus, message: &str) -> EvaluationProgress {
		EvaluationProgress { percent, status, message: message.to_string() }
	}

	#[tokio::test]
	async fn polls_until_completed() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_evaluation_progress().returning(move || match counter.fetch_add(1, Ordering::SeqCst) {
			0 => Ok(progress(33.4, EvaluationStatus::Running, "Scoring")),
			1 => Err(api_unavailable()),
			_ => Ok(progress(100.0, EvaluationStatus::Completed, "")),
		});
		let cache = LocalCache::in_memory();
		let tracker = EvaluationTracker::new(cache.clone(), Arc::new(remote)).with_interval(Duration::from_millis(1));
		let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

		assert!(tracker.start());
		let done = tracker.watch_until_done(shutdown_rx).await;

		assert_eq!(done, progress(100.0, EvaluationStatus::Completed, "Scoring"));
		assert_eq!(cache.evaluation_state(), Some(done));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn finished_job_is_not_restarted() {
		let cache = LocalCache::in_memory();
		cache.set_evaluation_state(&progress(100.0, EvaluationStatus::Completed, "done"));
		let tracker = EvaluationTracker::new(cache, Arc::new(MockRemoteAuthority::new()));

		assert!(!tracker.start());
		tracker.reset();
		assert_eq!(tracker.progress(), EvaluationProgress::default());
		assert!(tracker.start());
		assert_eq!(tracker.progress().status, EvaluationStatus::Running);
	}

	#[tokio::test]
	async fn shutdown_stops_polling() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_evaluation_progress().returning(|| Ok(progress(10.0, EvaluationStatus::Running, "")));
		let tracker = EvaluationTracker::new(LocalCache::in_memory(), Arc::new(remote))
			.with_interval(Duration::from_secs(3600));
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		shutdown_tx.send(Shutdown::Graceful).unwrap();

		let last = tracker.watch_until_done(shutdown_rx).await;
		assert!(!last.status.is_terminal());
	}
}
