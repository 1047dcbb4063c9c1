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
//! The voting ledger: authoritative for vote tallies and, on versioned contracts, for the phase.

pub mod abi;
mod rpc;

pub use rpc::{JsonRpcLedger, LedgerOptions};

use crate::{
	types::{Phase, TxHash},
	utils::InvalidTimeout,
};
use abi::AbiError;
use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;
use thiserror::Error;

/// What the deployed GrantManager can do, probed once per client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
pub enum ContractCapability {
	/// Only `advancePhase()`, no GroqCheck phase
	Legacy,
	/// `setPhase(uint8)` over the full phase set
	VersionedPhase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
pub enum TxStatus {
	/// Known to the node but not mined yet
	Pending,
	Success,
	Failed,
	NotFound,
}

/// Proposal as stored by the Voting contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerProposal {
	pub id: u64,
	pub title: String,
	pub description: String,
	pub proposer: String,
	pub vote_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerWinner {
	pub id: u64,
	pub title: String,
	pub proposer: String,
}

#[derive(Debug, Error)]
pub enum LedgerError {
	#[error("ledger unreachable: {0}")]
	Transport(String),
	#[error("ledger request timed out")]
	Timeout,
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("transaction reverted: {0}")]
	Revert(String),
	#[error("cannot decode ledger response: {0}")]
	Decode(#[from] AbiError),
	#[error("wrong network: expected chain id {expected}, connected to {actual}")]
	WrongNetwork { expected: u64, actual: u64 },
	#[error("unsupported: {0}")]
	Unsupported(String),
	#[error(transparent)]
	InvalidTimeout(#[from] InvalidTimeout),
}

impl From<reqwest::Error> for LedgerError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() { LedgerError::Timeout } else { LedgerError::Transport(err.to_string()) }
	}
}

impl LedgerError {
	fn message(&self) -> String {
		match self {
			LedgerError::Rpc { message, .. } | LedgerError::Revert(message) => message.to_lowercase(),
			_ => String::new(),
		}
	}

	/// The contract refused a second vote from the same account
	pub fn is_already_voted(&self) -> bool {
		self.message().contains("already voted")
	}

	pub fn is_insufficient_funds(&self) -> bool {
		let message = self.message();
		message.contains("insufficient funds") || message.contains("gas") || message.contains("fee")
	}
}

#[automock]
#[async_trait]
pub trait LedgerClient: Send + Sync {
	async fn chain_id(&self) -> Result<u64, LedgerError>;
	async fn capability(&self) -> Result<ContractCapability, LedgerError>;
	async fn get_phase(&self) -> Result<Phase, LedgerError>;
	/// Returns the transaction hash, `None` when the ledger is already in that phase
	async fn set_phase(&self, phase: Phase) -> Result<Option<TxHash>, LedgerError>;
	async fn has_voted(&self, voter: &str) -> Result<bool, LedgerError>;
	/// Submits a vote, returns once the transaction is accepted but before it is mined
	async fn vote(&self, proposal_id: u64) -> Result<TxHash, LedgerError>;
	/// `getVoteCount(id)`
	async fn vote_count(&self, proposal_id: u64) -> Result<u64, LedgerError>;
	/// `proposals(id).voteCount`
	async fn proposal_vote_count(&self, proposal_id: u64) -> Result<u64, LedgerError>;
	async fn all_proposals(&self) -> Result<Vec<LedgerProposal>, LedgerError>;
	async fn winner(&self) -> Result<LedgerWinner, LedgerError>;
	async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, LedgerError>;
}

/// Phase order of contracts without GroqCheck
const LEGACY_PHASES: [Phase; 3] = [Phase::Submission, Phase::Voting, Phase::Completed];

pub(crate) fn phase_from_index(index: u128, capability: ContractCapability) -> Option<Phase> {
	let index = usize::try_from(index).ok()?;
	match capability {
		ContractCapability::VersionedPhase => Phase::from_index(u8::try_from(index).ok()?),
		ContractCapability::Legacy => LEGACY_PHASES.get(index).copied(),
	}
}

/// Legacy contracts can only step forward with `advancePhase()`.
/// `Ok(false)` means nothing to do, `Ok(true)` means a single advance reaches the target.
pub(crate) fn legacy_transition(current: Phase, target: Phase) -> Result<bool, LedgerError> {
	match (current, target) {
		(_, Phase::GroqCheck) => Err(LedgerError::Unsupported("GroqCheck phase is not supported on this contract".into())),
		(current, target) if current == target => Ok(false),
		(Phase::Submission, Phase::Voting) | (Phase::Voting, Phase::Completed) => Ok(true),
		(current, target) => {
			Err(LedgerError::Unsupported(format!("phase transition {} -> {} on a legacy contract", current, target)))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn legacy_transitions() {
		assert!(!legacy_transition(Phase::Voting, Phase::Voting).unwrap());
		assert!(legacy_transition(Phase::Submission, Phase::Voting).unwrap());
		assert!(legacy_transition(Phase::Voting, Phase::Completed).unwrap());
		assert!(matches!(legacy_transition(Phase::Submission, Phase::Completed), Err(LedgerError::Unsupported(_))));
		assert!(matches!(legacy_transition(Phase::Voting, Phase::Submission), Err(LedgerError::Unsupported(_))));
		assert!(matches!(legacy_transition(Phase::Submission, Phase::GroqCheck), Err(LedgerError::Unsupported(_))));
	}

	#[test]
	fn phase_indexes_depend_on_capability() {
		assert_eq!(phase_from_index(1, ContractCapability::VersionedPhase), Some(Phase::GroqCheck));
		assert_eq!(phase_from_index(1, ContractCapability::Legacy), Some(Phase::Voting));
		assert_eq!(phase_from_index(3, ContractCapability::Legacy), None);
	}

	#[test]
	fn classifies_revert_messages() {
		assert!(LedgerError::Revert("You have already voted".into()).is_already_voted());
		assert!(
			LedgerError::Rpc { code: -32000, message: "insufficient funds for gas * price + value".into() }
				.is_insufficient_funds()
		);
		assert!(!LedgerError::Timeout.is_already_voted());
	}
}
