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
//! Vote casting: guard, submit, record optimistically, then confirm in the background.

use crate::{
	api::{RemoteAuthority, VoteUpdate},
	cache::LocalCache,
	constants::{VERIFICATION_ATTEMPTS, VERIFICATION_DELAY_MS},
	ledger::{LedgerClient, LedgerError, TxStatus},
	types::{TxHash, VoteStatus},
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use typed_builder::TypedBuilder;

/// Why a vote did not go through, displayed as is
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum VoteFailure {
	#[error("You have already voted for a proposal")]
	AlreadyVoted,
	#[error("Not enough gas to complete transaction. Please ensure you have enough funds.")]
	InsufficientFunds,
	#[error("Wrong network: switch to chain {expected} (currently connected to {actual})")]
	WrongNetwork { expected: u64, actual: u64 },
	#[error("Invalid proposal ID format: {0}")]
	InvalidProposalId(String),
	#[error("Transaction failed on-chain: {0}")]
	Reverted(String),
	#[error("Ledger unavailable: {0}")]
	Unavailable(String),
	#[error("{0}")]
	Ledger(String),
}

impl From<LedgerError> for VoteFailure {
	fn from(err: LedgerError) -> Self {
		if err.is_already_voted() {
			return VoteFailure::AlreadyVoted
		}
		if err.is_insufficient_funds() {
			return VoteFailure::InsufficientFunds
		}
		match err {
			LedgerError::WrongNetwork { expected, actual } => VoteFailure::WrongNetwork { expected, actual },
			LedgerError::Revert(reason) => VoteFailure::Reverted(reason),
			LedgerError::Transport(_) | LedgerError::Timeout => VoteFailure::Unavailable(err.to_string()),
			other => VoteFailure::Ledger(other.to_string()),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum VoteState {
	Idle,
	Submitting { proposal_id: String },
	/// Accepted by the ledger and recorded locally, not mined yet
	Pending { proposal_id: String, tx_hash: TxHash },
	Confirmed { proposal_id: String, tx_hash: TxHash },
	Failed { failure: VoteFailure },
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct VerificationOptions {
	#[builder(default = VERIFICATION_ATTEMPTS)]
	attempts: u32,
	#[builder(default = Duration::from_millis(VERIFICATION_DELAY_MS))]
	delay: Duration,
}

impl Default for VerificationOptions {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Returned as soon as the ledger accepted the transaction
pub struct VoteReceipt {
	pub proposal_id: String,
	pub tx_hash: TxHash,
	/// Background confirmation, resolves to the final state
	pub verification: JoinHandle<VoteState>,
}

pub struct VoteCaster {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
	ledger: Arc<dyn LedgerClient>,
	voter: String,
	expected_chain_id: u64,
	options: VerificationOptions,
	state: Arc<watch::Sender<VoteState>>,
}

impl VoteCaster {
	pub fn new(
		cache: LocalCache,
		remote: Arc<dyn RemoteAuthority>,
		ledger: Arc<dyn LedgerClient>,
		voter: impl Into<String>,
		expected_chain_id: u64,
		options: VerificationOptions,
	) -> Self {
		let (state, _) = watch::channel(VoteState::Idle);
		Self { cache, remote, ledger, voter: voter.into(), expected_chain_id, options, state: Arc::new(state) }
	}

	pub fn subscribe(&self) -> watch::Receiver<VoteState> {
		self.state.subscribe()
	}

	pub fn state(&self) -> VoteState {
		self.state.borrow().clone()
	}

	fn fail(&self, failure: VoteFailure) -> VoteFailure {
		warn!("vote failed: {}", failure);
		self.state.send_replace(VoteState::Failed { failure: failure.clone() });
		failure
	}

	/// Checks both the local record and, if reachable, the ledger
	async fn ensure_not_voted(&self) -> Result<(), VoteFailure> {
		if self.cache.has_voted(&self.voter) {
			debug!("{} has a local vote record", self.voter);
			return Err(VoteFailure::AlreadyVoted)
		}
		match self.ledger.has_voted(&self.voter).await {
			Ok(true) => Err(VoteFailure::AlreadyVoted),
			Ok(false) => Ok(()),
			Err(err) => {
				warn!("cannot check the ledger vote record: {}", err);
				Ok(())
			},
		}
	}

	pub async fn cast(&self, proposal_id: &str) -> Result<VoteReceipt, VoteFailure> {
		let Ok(numeric_id) = proposal_id.trim().parse::<u64>() else {
			return Err(self.fail(VoteFailure::InvalidProposalId(proposal_id.to_string())))
		};
		match self.ledger.chain_id().await {
			Ok(actual) if actual != self.expected_chain_id =>
				return Err(self.fail(VoteFailure::WrongNetwork { expected: self.expected_chain_id, actual })),
			Ok(_) => {},
			Err(err) => return Err(self.fail(err.into())),
		}
		self.ensure_not_voted().await.map_err(|failure| self.fail(failure))?;

		self.state.send_replace(VoteState::Submitting { proposal_id: proposal_id.to_string() });
		let tx_hash = self.ledger.vote(numeric_id).await.map_err(|err| self.fail(err.into()))?;
		info!("vote for proposal {} submitted in {}", proposal_id, tx_hash);

		self.cache.record_local_vote(&self.voter, proposal_id, Some(&tx_hash));
		self.cache.set_local_vote_status(proposal_id, VoteStatus::Pending);
		self.state.send_replace(VoteState::Pending { proposal_id: proposal_id.to_string(), tx_hash: tx_hash.clone() });

		let verification = tokio::spawn(
			Verification {
				cache: self.cache.clone(),
				remote: self.remote.clone(),
				ledger: self.ledger.clone(),
				voter: self.voter.clone(),
				proposal_id: proposal_id.to_string(),
				tx_hash: tx_hash.clone(),
				options: self.options.clone(),
				state: self.state.clone(),
			}
			.run(),
		);

		Ok(VoteReceipt { proposal_id: proposal_id.to_string(), tx_hash, verification })
	}
}

/// Detached confirmation of a pending vote
struct Verification {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
	ledger: Arc<dyn LedgerClient>,
	voter: String,
	proposal_id: String,
	tx_hash: TxHash,
	options: VerificationOptions,
	state: Arc<watch::Sender<VoteState>>,
}

impl Verification {
	async fn run(self) -> VoteState {
		for attempt in 1..=self.options.attempts {
			match self.ledger.transaction_status(&self.tx_hash).await {
				Ok(TxStatus::Success) => return self.confirmed().await,
				Ok(TxStatus::Failed) => return self.failed(),
				Ok(status) => debug!("{} is {} ({}/{})", self.tx_hash, status, attempt, self.options.attempts),
				Err(err) => debug!("cannot check {} ({}/{}): {}", self.tx_hash, attempt, self.options.attempts, err),
			}
			if attempt < self.options.attempts {
				sleep(self.options.delay).await;
			}
		}

		warn!("{} still unconfirmed after {} attempts, leaving the vote pending", self.tx_hash, self.options.attempts);
		self.state.borrow().clone()
	}

	async fn confirmed(&self) -> VoteState {
		info!("vote {} confirmed", self.tx_hash);
		self.cache.set_local_vote_status(&self.proposal_id, VoteStatus::Confirmed);
		let state = VoteState::Confirmed { proposal_id: self.proposal_id.clone(), tx_hash: self.tx_hash.clone() };
		self.state.send_replace(state.clone());

		let update = VoteUpdate {
			proposal_id: self.proposal_id.clone(),
			voter: self.voter.clone(),
			increment: 1,
			tx_hash: Some(self.tx_hash.clone()),
		};
		if let Err(err) = self.remote.update_votes(&update).await {
			warn!("cannot report vote to the API, counting it locally: {}", err);
			let mut proposals = self.cache.fallback_proposals();
			if let Some(proposal) = proposals.iter_mut().find(|p| p.id == self.proposal_id) {
				proposal.vote_count += update.increment;
				self.cache.set_fallback_proposals(&proposals);
			}
		}
		state
	}

	/// The local "has voted" record is kept on purpose, a failed vote cannot be retried from this client
	fn failed(&self) -> VoteState {
		warn!("vote {} failed on-chain", self.tx_hash);
		self.cache.set_local_vote_status(&self.proposal_id, VoteStatus::Failed);
		let state = VoteState::Failed { failure: VoteFailure::Reverted(format!("transaction {} reverted", self.tx_hash)) };
		self.state.send_replace(state.clone());
		state
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		api::MockRemoteAuthority,
		ledger::MockLedgerClient,
		test_utils::api_unavailable,
		types::Proposal,
	};
	use std::sync::atomic::{AtomicUsize, Ordering};

	const VOTER: &str = "0x00000000000000000000000000000000000000aa";
	const CHAIN: u64 = 84532;

	fn fast() -> VerificationOptions {
		VerificationOptions::builder().attempts(3).delay(Duration::from_millis(1)).build()
	}

	fn ledger_ready() -> MockLedgerClient {
		let mut ledger = MockLedgerClient::new();
		ledger.expect_chain_id().returning(|| Ok(CHAIN));
		ledger.expect_has_voted().returning(|_| Ok(false));
		ledger
	}

	fn caster(cache: &LocalCache, remote: MockRemoteAuthority, ledger: MockLedgerClient) -> VoteCaster {
		VoteCaster::new(cache.clone(), Arc::new(remote), Arc::new(ledger), VOTER, CHAIN, fast())
	}

	#[tokio::test]
	async fn ledger_vote_record_blocks_the_vote() {
		let mut ledger = MockLedgerClient::new();
		ledger.expect_chain_id().returning(|| Ok(CHAIN));
		ledger.expect_has_voted().returning(|_| Ok(true));
		ledger.expect_vote().never();
		let caster = caster(&LocalCache::in_memory(), MockRemoteAuthority::new(), ledger);

		let failure = caster.cast("1").await.err().unwrap();
		assert_eq!(failure, VoteFailure::AlreadyVoted);
		assert!(failure.to_string().contains("already voted"));
		assert_eq!(caster.state(), VoteState::Failed { failure: VoteFailure::AlreadyVoted });
	}

	#[tokio::test]
	async fn local_vote_record_blocks_the_vote() {
		let cache = LocalCache::in_memory();
		cache.record_local_vote(VOTER, "3", None);
		let mut ledger = MockLedgerClient::new();
		ledger.expect_chain_id().returning(|| Ok(CHAIN));
		ledger.expect_vote().never();
		let caster = caster(&cache, MockRemoteAuthority::new(), ledger);

		assert_eq!(caster.cast("1").await.err(), Some(VoteFailure::AlreadyVoted));
	}

	#[tokio::test]
	async fn revert_is_classified() {
		let mut ledger = ledger_ready();
		ledger.expect_vote().returning(|_| Err(LedgerError::Revert("You have already voted".into())));
		let cache = LocalCache::in_memory();
		let caster = caster(&cache, MockRemoteAuthority::new(), ledger);

		assert_eq!(caster.cast("1").await.err(), Some(VoteFailure::AlreadyVoted));
		assert!(!cache.has_voted(VOTER));
	}

	#[tokio::test]
	async fn wrong_network_names_both_chains() {
		let mut ledger = MockLedgerClient::new();
		ledger.expect_chain_id().returning(|| Ok(1));
		let caster = caster(&LocalCache::in_memory(), MockRemoteAuthority::new(), ledger);

		let failure = caster.cast("1").await.err().unwrap();
		assert_eq!(failure, VoteFailure::WrongNetwork { expected: CHAIN, actual: 1 });
		assert!(failure.to_string().contains("84532"));
	}

	#[tokio::test]
	async fn invalid_id_is_rejected_before_the_ledger() {
		let caster = caster(&LocalCache::in_memory(), MockRemoteAuthority::new(), MockLedgerClient::new());
		assert!(matches!(caster.cast("local-17").await, Err(VoteFailure::InvalidProposalId(_))));
	}

	#[tokio::test]
	async fn optimistic_record_then_confirmation() {
		let checks = Arc::new(AtomicUsize::new(0));
		let counter = checks.clone();
		let mut ledger = ledger_ready();
		ledger.expect_vote().withf(|id| *id == 7).returning(|_| Ok("0xfeed".to_string()));
		ledger.expect_transaction_status().returning(move |_| {
			if counter.fetch_add(1, Ordering::SeqCst) == 0 { Ok(TxStatus::Pending) } else { Ok(TxStatus::Success) }
		});
		let mut remote = MockRemoteAuthority::new();
		remote
			.expect_update_votes()
			.withf(|update| update.proposal_id == "7" && update.increment == 1)
			.times(1)
			.returning(|_| Ok(()));
		let cache = LocalCache::in_memory();
		let caster = caster(&cache, remote, ledger);

		let receipt = caster.cast("7").await.unwrap();
		assert_eq!(receipt.tx_hash, "0xfeed");
		assert!(cache.has_voted(VOTER));
		assert_eq!(cache.local_vote_count("7"), 1);
		assert_eq!(cache.vote_transaction(VOTER).as_deref(), Some("0xfeed"));

		let state = receipt.verification.await.unwrap();
		assert_eq!(state, VoteState::Confirmed { proposal_id: "7".into(), tx_hash: "0xfeed".into() });
		assert_eq!(cache.local_vote_status("7"), Some(VoteStatus::Confirmed));
		assert_eq!(caster.state(), state);
		assert_eq!(checks.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn failed_transaction_keeps_voted_flag() {
		let mut ledger = ledger_ready();
		ledger.expect_vote().returning(|_| Ok("0xdead".to_string()));
		ledger.expect_transaction_status().returning(|_| Ok(TxStatus::Failed));
		let cache = LocalCache::in_memory();
		let caster = caster(&cache, MockRemoteAuthority::new(), ledger);

		let receipt = caster.cast("2").await.unwrap();
		let state = receipt.verification.await.unwrap();

		assert!(matches!(state, VoteState::Failed { failure: VoteFailure::Reverted(_) }));
		assert_eq!(cache.local_vote_status("2"), Some(VoteStatus::Failed));
		assert!(cache.has_voted(VOTER));
	}

	#[tokio::test]
	async fn unconfirmed_vote_stays_pending() {
		let mut ledger = ledger_ready();
		ledger.expect_vote().returning(|_| Ok("0xslow".to_string()));
		ledger.expect_transaction_status().times(3).returning(|_| Ok(TxStatus::NotFound));
		let cache = LocalCache::in_memory();
		let caster = caster(&cache, MockRemoteAuthority::new(), ledger);

		let state = caster.cast("4").await.unwrap().verification.await.unwrap();

		assert_eq!(state, VoteState::Pending { proposal_id: "4".into(), tx_hash: "0xslow".into() });
		assert_eq!(cache.local_vote_status("4"), Some(VoteStatus::Pending));
	}

	#[tokio::test]
	async fn unreported_vote_is_counted_locally() {
		let mut ledger = ledger_ready();
		ledger.expect_vote().returning(|_| Ok("0xfeed".to_string()));
		ledger.expect_transaction_status().returning(|_| Ok(TxStatus::Success));
		let mut remote = MockRemoteAuthority::new();
		remote.expect_update_votes().returning(|_| Err(api_unavailable()));
		let cache = LocalCache::in_memory();
		cache.set_fallback_proposals(&[Proposal { id: "5".into(), vote_count: 2, ..Default::default() }]);
		let caster = caster(&cache, remote, ledger);

		caster.cast("5").await.unwrap().verification.await.unwrap();

		assert_eq!(cache.fallback_proposals()[0].vote_count, 3);
	}
}
