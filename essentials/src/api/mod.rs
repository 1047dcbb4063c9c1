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
//! Client of the off-chain REST API, the primary source of truth for the phase and the proposals.

mod http;
pub mod records;

pub use http::{HttpApiOptions, HttpRemoteAuthority};

use crate::{
	proposals::ProposalSubmission,
	types::{EvaluationProgress, Phase, TxHash},
	utils::InvalidTimeout,
};
use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
	#[error("invalid url: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error(transparent)]
	InvalidTimeout(#[from] InvalidTimeout),
	#[error("transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("{path} returned status {status}")]
	Status { path: String, status: u16 },
	#[error("malformed response from {path}: {reason}")]
	Malformed { path: String, reason: String },
}

impl ApiError {
	/// Timeouts and connection failures, the only errors worth retrying
	pub fn is_transport(&self) -> bool {
		matches!(self, ApiError::Transport(_))
	}
}

/// Body of `POST /proposals/updateVotes`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteUpdate {
	pub proposal_id: String,
	pub voter: String,
	pub increment: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tx_hash: Option<TxHash>,
}

/// Body of `POST /proposals/sync-votes`: every locally recorded count, keyed by proposal id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVotesUpload {
	pub votes: BTreeMap<String, String>,
	pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CurrentPhaseResponse {
	pub current_phase: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdatePhaseRequest<'a> {
	pub phase: &'a str,
}

#[automock]
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
	/// Raw phase string as served, may be an alias or an unknown value
	async fn current_phase(&self) -> Result<String, ApiError>;
	async fn update_phase(&self, phase: Phase) -> Result<(), ApiError>;
	/// Ranking records in their raw heterogeneous shape, see [`records::normalize_ranking`]
	async fn top_rankings(&self) -> Result<Vec<serde_json::Value>, ApiError>;
	async fn submit_proposal(&self, submission: &ProposalSubmission) -> Result<serde_json::Value, ApiError>;
	async fn update_votes(&self, update: &VoteUpdate) -> Result<(), ApiError>;
	async fn sync_votes(&self, upload: &LocalVotesUpload) -> Result<(), ApiError>;
	async fn reset_all_votes(&self) -> Result<(), ApiError>;
	async fn evaluation_progress(&self) -> Result<EvaluationProgress, ApiError>;
	async fn start_evaluation(&self) -> Result<(), ApiError>;
}
