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
//! Ranked proposal view merged from the API rankings, the ledger tallies and the local vote records.

use crate::{
	api::{ApiError, LocalVotesUpload, RemoteAuthority, records},
	cache::LocalCache,
	constants::WINNER_COUNT,
	ledger::{LedgerClient, LedgerError, LedgerProposal},
	types::{Proposal, RankedProposal},
};
use futures::future;
use log::{debug, info, warn};
use serde::Serialize;
use std::{cmp::Reverse, sync::Arc};
use tokio::sync::OnceCell;

/// Whether on-chain tallies can be used for this round
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LedgerAvailability {
	Available,
	/// No ledger configured
	Disabled,
	Unavailable { reason: String },
	/// Connected to another chain, no reads are attempted
	WrongNetwork { expected: u64, actual: u64 },
}

impl LedgerAvailability {
	pub fn is_available(&self) -> bool {
		matches!(self, LedgerAvailability::Available)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RankingSource {
	Remote,
	/// Last successful fetch, served from the cache
	Snapshot,
	Empty,
}

/// Always displayable, failures are reported in `error` next to whatever could be resolved
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rankings {
	pub proposals: Vec<RankedProposal>,
	pub source: RankingSource,
	pub error: Option<String>,
	pub ledger: LedgerAvailability,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum WinnerSource {
	Ledger,
	/// Ledger unavailable, the top of the ranking is used
	LocallyCalculated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
	pub id: String,
	pub title: String,
	pub proposer: String,
	pub vote_count: u64,
	pub source: WinnerSource,
}

/// Stable descending sort by votes, ties keep the fetch order. The first entries become winners.
pub fn rank(proposals: Vec<Proposal>) -> Vec<RankedProposal> {
	let mut ranked: Vec<RankedProposal> = proposals
		.into_iter()
		.enumerate()
		.map(|(original_index, proposal)| RankedProposal { proposal, original_index, rank: None, is_winner: false })
		.collect();
	ranked.sort_by_key(|entry| (Reverse(entry.proposal.vote_count), entry.original_index));
	for (position, entry) in ranked.iter_mut().take(WINNER_COUNT).enumerate() {
		entry.rank = Some(position as u8 + 1);
		entry.is_winner = true;
	}
	ranked
}

/// Per-round view of the ledger, `getAllProposals()` is fetched at most once
struct LedgerTally<'a> {
	ledger: &'a dyn LedgerClient,
	all: OnceCell<Option<Vec<LedgerProposal>>>,
}

impl<'a> LedgerTally<'a> {
	fn new(ledger: &'a dyn LedgerClient) -> Self {
		Self { ledger, all: OnceCell::new() }
	}

	/// Tries the direct getter, the proposals mapping, then a scan of all proposals
	async fn vote_count(&self, proposal_id: &str) -> Option<u64> {
		let Ok(id) = proposal_id.parse::<u64>() else {
			debug!("proposal {} has no on-chain id", proposal_id);
			return None
		};

		match self.ledger.vote_count(id).await {
			Ok(count) => return Some(count),
			Err(err) => debug!("getVoteCount({}) failed: {}", id, err),
		}
		match self.ledger.proposal_vote_count(id).await {
			Ok(count) => return Some(count),
			Err(err) => debug!("proposals({}) failed: {}", id, err),
		}
		let all = self
			.all
			.get_or_init(|| async {
				self.ledger
					.all_proposals()
					.await
					.map_err(|err| debug!("getAllProposals() failed: {}", err))
					.ok()
			})
			.await;
		let count = all.as_ref()?.iter().find(|p| p.id == id).map(|p| p.vote_count);
		if count.is_none() {
			warn!("no on-chain vote count for proposal {}", id);
		}
		count
	}
}

pub struct VoteReconciler {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
	ledger: Option<Arc<dyn LedgerClient>>,
	expected_chain_id: u64,
}

impl VoteReconciler {
	pub fn new(
		cache: LocalCache,
		remote: Arc<dyn RemoteAuthority>,
		ledger: Option<Arc<dyn LedgerClient>>,
		expected_chain_id: u64,
	) -> Self {
		Self { cache, remote, ledger, expected_chain_id }
	}

	pub async fn ledger_availability(&self) -> LedgerAvailability {
		let Some(ledger) = &self.ledger else { return LedgerAvailability::Disabled };
		match ledger.chain_id().await {
			Ok(actual) if actual == self.expected_chain_id => LedgerAvailability::Available,
			Ok(actual) => {
				warn!("ledger is on chain {}, expected {}", actual, self.expected_chain_id);
				LedgerAvailability::WrongNetwork { expected: self.expected_chain_id, actual }
			},
			Err(err) => {
				warn!("ledger unavailable: {}", err);
				LedgerAvailability::Unavailable { reason: err.to_string() }
			},
		}
	}

	/// Same availability check, as an error for callers that need the ledger
	pub async fn require_ledger(&self) -> Result<&dyn LedgerClient, LedgerError> {
		match (self.ledger_availability().await, &self.ledger) {
			(LedgerAvailability::Available, Some(ledger)) => Ok(ledger.as_ref()),
			(LedgerAvailability::WrongNetwork { expected, actual }, _) => Err(LedgerError::WrongNetwork { expected, actual }),
			(LedgerAvailability::Unavailable { reason }, _) => Err(LedgerError::Transport(reason)),
			_ => Err(LedgerError::Unsupported("no ledger configured".into())),
		}
	}

	/// Proposals from the API, else the last snapshot, else nothing. Pending local submissions are appended.
	pub async fn fetch_proposals(&self) -> (Vec<Proposal>, RankingSource, Option<String>) {
		let (mut proposals, source, error) = match self.remote.top_rankings().await {
			Ok(items) => {
				let proposals = records::normalize_rankings(&items);
				self.cache.set_rankings_snapshot(&proposals);
				(proposals, RankingSource::Remote, None)
			},
			Err(err) => {
				warn!("cannot fetch rankings: {}", err);
				match self.cache.rankings_snapshot() {
					Some(snapshot) if !snapshot.is_empty() => {
						info!("using {} cached proposals", snapshot.len());
						(snapshot, RankingSource::Snapshot, Some(format!("showing cached rankings: {}", err)))
					},
					_ => (vec![], RankingSource::Empty, Some(format!("rankings unavailable: {}", err))),
				}
			},
		};

		for local in self.cache.fallback_proposals() {
			if local.is_local_only() && !proposals.iter().any(|p| p.id == local.id) {
				proposals.push(local);
			}
		}
		(proposals, source, error)
	}

	/// Zero from one source means "not observed yet", a non-zero local count takes over
	fn with_local_override(&self, proposal_id: &str, count: u64) -> u64 {
		let local = self.cache.local_vote_count(proposal_id);
		if count == 0 && local > 0 {
			debug!("using local vote count {} for proposal {}", local, proposal_id);
			return local
		}
		count
	}

	async fn effective_count(&self, proposal: &Proposal, tally: Option<&LedgerTally<'_>>) -> u64 {
		let count = match tally {
			Some(tally) if proposal.id.parse::<u64>().is_ok() => tally.vote_count(&proposal.id).await.unwrap_or(0),
			_ => proposal.vote_count,
		};
		self.with_local_override(&proposal.id, count)
	}

	pub async fn rankings(&self) -> Rankings {
		let (mut proposals, source, error) = self.fetch_proposals().await;
		let ledger = self.ledger_availability().await;
		let tally = match (&ledger, &self.ledger) {
			(LedgerAvailability::Available, Some(client)) => Some(LedgerTally::new(client.as_ref())),
			_ => None,
		};

		let counts = future::join_all(proposals.iter().map(|p| self.effective_count(p, tally.as_ref()))).await;
		for (proposal, count) in proposals.iter_mut().zip(counts) {
			proposal.vote_count = count;
		}

		Rankings { proposals: rank(proposals), source, error, ledger }
	}

	/// Effective vote count of one proposal, never fails
	pub async fn vote_count(&self, proposal_id: &str) -> u64 {
		let count = match (self.ledger_availability().await, &self.ledger) {
			(LedgerAvailability::Available, Some(client)) =>
				LedgerTally::new(client.as_ref()).vote_count(proposal_id).await.unwrap_or(0),
			_ => match self.remote.top_rankings().await {
				Ok(items) => records::normalize_rankings(&items)
					.into_iter()
					.find(|p| p.id == proposal_id)
					.map(|p| p.vote_count)
					.unwrap_or(0),
				Err(err) => {
					debug!("cannot look up proposal {}: {}", proposal_id, err);
					0
				},
			},
		};
		self.with_local_override(proposal_id, count)
	}

	/// Shares the local counters with the API, returns how many were sent
	pub async fn upload_local_votes(&self) -> Result<usize, ApiError> {
		let votes = self.cache.local_votes();
		if votes.is_empty() {
			debug!("no local votes to upload");
			return Ok(0)
		}
		let upload = LocalVotesUpload { votes, device_id: self.cache.device_id() };
		self.remote.sync_votes(&upload).await?;
		info!("uploaded {} local votes from {}", upload.votes.len(), upload.device_id);
		Ok(upload.votes.len())
	}

	/// Winner according to the ledger, else the top of the local ranking
	pub async fn winner(&self) -> Option<Winner> {
		let rankings = self.rankings().await;
		if let (LedgerAvailability::Available, Some(ledger)) = (&rankings.ledger, &self.ledger) {
			match ledger.winner().await {
				Ok(winner) => {
					let id = winner.id.to_string();
					let vote_count =
						rankings.proposals.iter().find(|p| p.proposal.id == id).map_or(0, |p| p.proposal.vote_count);
					return Some(Winner {
						id,
						title: winner.title,
						proposer: winner.proposer,
						vote_count,
						source: WinnerSource::Ledger,
					})
				},
				Err(err) => warn!("getWinner() failed, calculating locally: {}", err),
			}
		}

		rankings.proposals.into_iter().next().map(|top| Winner {
			id: top.proposal.id,
			title: top.proposal.title,
			proposer: top.proposal.proposer,
			vote_count: top.proposal.vote_count,
			source: WinnerSource::LocallyCalculated,
		})
	}
}
