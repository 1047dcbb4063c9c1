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
//! Domain types shared by the reconcilers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

/// Milliseconds since the unix epoch
pub type Timestamp = u64;
/// Hex encoded transaction hash as returned by the ledger
pub type TxHash = String;

/// The stage of the grant cycle, totally ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, Serialize, Deserialize)]
pub enum Phase {
	Submission,
	#[serde(alias = "Groq")]
	GroqCheck,
	Voting,
	Completed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid phase: {0}")]
pub struct InvalidPhase(pub String);

impl Phase {
	pub fn as_str(&self) -> &'static str {
		match self {
			Phase::Submission => "Submission",
			Phase::GroqCheck => "GroqCheck",
			Phase::Voting => "Voting",
			Phase::Completed => "Completed",
		}
	}

	/// Case insensitive parse, `Groq` is an alias of `GroqCheck`
	pub fn parse(value: &str) -> Option<Phase> {
		let value = value.trim();
		if value.eq_ignore_ascii_case("groq") {
			return Some(Phase::GroqCheck)
		}
		Phase::iter().find(|phase| phase.as_str().eq_ignore_ascii_case(value))
	}

	/// Position in the cycle, also the numeric value used by the GrantManager contract
	pub fn index(&self) -> u8 {
		*self as u8
	}

	pub fn from_index(index: u8) -> Option<Phase> {
		Phase::iter().nth(index as usize)
	}

	pub fn next(&self) -> Option<Phase> {
		Phase::from_index(self.index() + 1)
	}

	pub fn prev(&self) -> Option<Phase> {
		self.index().checked_sub(1).and_then(Phase::from_index)
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Phase {
	type Err = InvalidPhase;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Phase::parse(s).ok_or_else(|| InvalidPhase(s.to_string()))
	}
}

/// Compares two raw phase strings the way every comparison path must: case insensitive and alias aware
pub fn phases_equivalent(lhs: &str, rhs: &str) -> bool {
	match (Phase::parse(lhs), Phase::parse(rhs)) {
		(Some(lhs), Some(rhs)) => lhs == rhs,
		_ => lhs.trim().eq_ignore_ascii_case(rhs.trim()),
	}
}

/// Renders a possibly missing phase, absence degrades to `Unknown`
pub fn display_phase(phase: Option<Phase>) -> String {
	phase.map(|p| p.to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Who caused an accepted phase change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PhaseSource {
	/// Automatic reconciliation against the API
	Sync,
	/// Administrative direct set
	Admin,
	/// Pulled from the ledger through the admin pipeline
	Ledger,
}

/// Append-only record of an accepted phase change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
	pub phase: Phase,
	pub timestamp: Timestamp,
	pub source: PhaseSource,
	#[serde(default)]
	pub previous: Option<Phase>,
}

/// Confirmation status of a locally recorded vote
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VoteStatus {
	Pending,
	Confirmed,
	Failed,
}

/// Sections of a proposal, either sent as dedicated fields or embedded in the markdown description
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFields {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub links: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project_title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub project_description: Option<String>,
	#[serde(default, rename = "brief_summary", skip_serializing_if = "Option::is_none")]
	pub brief_summary: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub primary_goal: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub specific_objective: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub budget: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub long_term_plan: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub future_funding_plans: Option<String>,
}

/// A grant proposal as seen by the client
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
	pub id: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub proposer: String,
	#[serde(default)]
	pub description: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stellar_wallet_address: Option<String>,
	#[serde(default, with = "vote_count_string")]
	pub vote_count: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rank: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<Timestamp>,
	#[serde(default)]
	pub fields: ProposalFields,
}

impl Proposal {
	/// Proposals created while the API was unreachable
	pub fn is_local_only(&self) -> bool {
		self.id.starts_with(LOCAL_ID_PREFIX)
	}
}

/// Prefix of synthesized ids of proposals that only exist in the local cache
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Derived display view, recomputed on every fetch and never persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedProposal {
	#[serde(flatten)]
	pub proposal: Proposal,
	/// Position in the fetched list, the only tie breaker
	pub original_index: usize,
	/// 1-3 for winners, kept apart from the rank reported by the API
	#[serde(rename = "winnerRank")]
	pub rank: Option<u8>,
	pub is_winner: bool,
}

/// Lenient vote count parsing, anything unreadable counts as zero
pub fn parse_vote_count(value: &serde_json::Value) -> u64 {
	match value {
		serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)).unwrap_or(0),
		serde_json::Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
		_ => 0,
	}
}

/// Vote counts travel as decimal strings, accept numbers too
mod vote_count_string {
	use super::*;

	pub fn serialize<S: Serializer>(count: &u64, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&count.to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
		let value = serde_json::Value::deserialize(deserializer)?;
		Ok(parse_vote_count(&value))
	}
}

/// Backend evaluation job state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EvaluationStatus {
	#[default]
	Idle,
	Running,
	Completed,
	Error,
}

impl EvaluationStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, EvaluationStatus::Completed | EvaluationStatus::Error)
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationProgress {
	#[serde(default)]
	pub percent: f64,
	#[serde(default)]
	pub status: EvaluationStatus,
	#[serde(default)]
	pub message: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn groq_is_an_alias_of_groq_check() {
		assert_eq!(Phase::parse("Groq"), Some(Phase::GroqCheck));
		assert_eq!(Phase::parse("groqcheck"), Some(Phase::GroqCheck));
		assert!(phases_equivalent("Groq", "GroqCheck"));
		assert!(phases_equivalent("GROQ", "groqCheck"));
		assert!(!phases_equivalent("Groq", "Voting"));
	}

	#[test]
	fn phase_order() {
		assert_eq!(Phase::Submission.next(), Some(Phase::GroqCheck));
		assert_eq!(Phase::Completed.next(), None);
		assert_eq!(Phase::Submission.prev(), None);
		assert_eq!(Phase::Completed.prev(), Some(Phase::Voting));
		assert!(Phase::Submission < Phase::Completed);
		assert_eq!(Phase::from_index(2), Some(Phase::Voting));
	}

	#[test]
	fn unknown_phase_is_rejected() {
		assert_eq!(Phase::parse("Finished"), None);
		assert!("Finished".parse::<Phase>().is_err());
		assert_eq!(display_phase(None), "Unknown");
	}

	#[test]
	fn groq_alias_deserializes() {
		let phase: Phase = serde_json::from_str("\"Groq\"").unwrap();
		assert_eq!(phase, Phase::GroqCheck);
		assert_eq!(serde_json::to_string(&phase).unwrap(), "\"GroqCheck\"");
	}

	#[test]
	fn vote_count_accepts_numbers_and_strings() {
		let p: Proposal = serde_json::from_str(r#"{"id":"1","voteCount":7}"#).unwrap();
		assert_eq!(p.vote_count, 7);
		let p: Proposal = serde_json::from_str(r#"{"id":"1","voteCount":"12"}"#).unwrap();
		assert_eq!(p.vote_count, 12);
		let p: Proposal = serde_json::from_str(r#"{"id":"1"}"#).unwrap();
		assert_eq!(p.vote_count, 0);
		assert!(serde_json::to_string(&p).unwrap().contains(r#""voteCount":"0""#));
	}
}
