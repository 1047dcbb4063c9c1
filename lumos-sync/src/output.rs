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

use colored::Colorize;
use itertools::Itertools;
use lumos_sync_essentials::{
	proposals::SubmissionOutcome,
	types::{EvaluationProgress, EvaluationStatus, Phase, PhaseHistoryEntry, Proposal, TxHash, display_phase},
	utils::format_timestamp,
	vote_sync::{LedgerAvailability, Rankings, Winner},
	voting::VoteState,
};
use serde::Serialize;
use std::{
	fmt::{self, Display, Formatter},
	io::{self, Write},
};
use strum::{Display as StrumDisplay, EnumString};

/// Output mode for the CLI commands
#[derive(Clone, Copy, Debug, EnumString, StrumDisplay, Default, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum OutputMode {
	/// Human readable output
	#[strum(ascii_case_insensitive)]
	#[default]
	Pretty,
	/// Json output
	#[strum(ascii_case_insensitive)]
	Json,
}

pub(crate) fn output_result<T>(res: &T, mode: OutputMode) -> color_eyre::Result<()>
where
	T: Display + Serialize,
{
	let mut output = match mode {
		OutputMode::Json => serde_json::to_vec(res)?,
		OutputMode::Pretty => res.to_string().into_bytes(),
	};
	output.push(b'\n');
	io::stdout().write_all(output.as_slice())?;

	Ok(())
}

fn phase_str(phase: Option<Phase>) -> colored::ColoredString {
	match phase {
		Some(_) => display_phase(phase).bold(),
		None => display_phase(phase).dimmed(),
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhaseReport {
	pub phase: Option<Phase>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub previous: Option<Phase>,
	pub changed: bool,
}

impl Display for PhaseReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "Current phase: {}", phase_str(self.phase))?;
		if self.changed {
			write!(f, " (was {})", display_phase(self.previous))?;
		}
		Ok(())
	}
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct HistoryReport(pub Vec<PhaseHistoryEntry>);

impl Display for HistoryReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return write!(f, "{}", "No phase changes recorded".dimmed())
		}
		let lines = self.0.iter().map(|entry| {
			format!(
				"{}  {} -> {} ({})",
				format_timestamp(entry.timestamp),
				display_phase(entry.previous),
				entry.phase.to_string().bold(),
				entry.source
			)
		});
		write!(f, "{}", lines.format("\n"))
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct VerifyReport {
	pub expected: Phase,
	pub confirmed: bool,
}

impl Display for VerifyReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.confirmed {
			write!(f, "{} is in effect", self.expected.to_string().bold().green())
		} else {
			write!(f, "{} is not in effect", self.expected.to_string().bold().red())
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LedgerPhaseReport {
	pub phase: Phase,
	pub tx_hash: Option<TxHash>,
}

impl Display for LedgerPhaseReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.tx_hash {
			Some(tx_hash) => write!(f, "Ledger phase set to {} in {}", self.phase.to_string().bold(), tx_hash),
			None => write!(f, "Ledger already at {}", self.phase.to_string().bold()),
		}
	}
}

fn availability_str(ledger: &LedgerAvailability) -> String {
	match ledger {
		LedgerAvailability::Available => "ledger available".green().to_string(),
		LedgerAvailability::Disabled => "ledger disabled".dimmed().to_string(),
		LedgerAvailability::Unavailable { reason } => format!("{}: {}", "ledger unavailable".yellow(), reason),
		LedgerAvailability::WrongNetwork { expected, actual } =>
			format!("{}: expected chain {}, connected to {}", "wrong network".red(), expected, actual),
	}
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct RankingsReport(pub Rankings);

impl Display for RankingsReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let rankings = &self.0;
		writeln!(f, "Rankings from {}, {}", rankings.source.to_string().bold(), availability_str(&rankings.ledger))?;
		if let Some(err) = &rankings.error {
			writeln!(f, "{} {}", "Degraded:".yellow(), err)?;
		}
		if rankings.proposals.is_empty() {
			return write!(f, "{}", "No proposals".dimmed())
		}

		let lines = rankings.proposals.iter().enumerate().map(|(position, entry)| {
			let line = format!(
				"{:>3}. {} by {}: {} votes [{}]",
				position + 1,
				entry.proposal.title,
				entry.proposal.proposer,
				entry.proposal.vote_count,
				entry.proposal.id
			);
			if entry.is_winner { line.bold().green().to_string() } else { line }
		});
		write!(f, "{}", lines.format("\n"))
	}
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct WinnerReport(pub Option<Winner>);

impl Display for WinnerReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.0 {
			Some(winner) => write!(
				f,
				"Winner: {} by {} with {} votes ({})",
				winner.title.bold().green(),
				winner.proposer,
				winner.vote_count,
				winner.source
			),
			None => write!(f, "{}", "No winner yet".dimmed()),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct VoteReport(pub VoteState);

impl Display for VoteReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.0 {
			VoteState::Idle => write!(f, "{}", "No vote in progress".dimmed()),
			VoteState::Submitting { proposal_id } => write!(f, "Submitting vote for proposal {}", proposal_id),
			VoteState::Pending { proposal_id, tx_hash } => write!(
				f,
				"Vote for proposal {} {} in {}, waiting for confirmation",
				proposal_id,
				"recorded".yellow(),
				tx_hash
			),
			VoteState::Confirmed { proposal_id, tx_hash } =>
				write!(f, "Vote for proposal {} {} in {}", proposal_id, "confirmed".bold().green(), tx_hash),
			VoteState::Failed { failure } => write!(f, "{} {}", "Vote failed:".bold().red(), failure),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct EvaluationReport(pub EvaluationProgress);

impl Display for EvaluationReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let progress = &self.0;
		let status = match progress.status {
			EvaluationStatus::Idle => progress.status.to_string().dimmed(),
			EvaluationStatus::Running => progress.status.to_string().yellow(),
			EvaluationStatus::Completed => progress.status.to_string().green(),
			EvaluationStatus::Error => progress.status.to_string().red(),
		};
		write!(f, "Evaluation {} {:>3}%", status.bold(), progress.percent)?;
		if !progress.message.is_empty() {
			write!(f, " {}", progress.message)?;
		}
		Ok(())
	}
}

fn proposal_line(proposal: &Proposal) -> String {
	let submitted = proposal.timestamp.map(format_timestamp).unwrap_or_else(|| "unknown".to_string());
	format!("{} [{}] submitted {}", proposal.title.bold(), proposal.id, submitted)
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub(crate) struct SubmissionReport(pub SubmissionOutcome);

impl Display for SubmissionReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.0 {
			SubmissionOutcome::Submitted { flushed, .. } => {
				write!(f, "{}", "Proposal submitted".bold().green())?;
				if *flushed > 0 {
					write!(f, ", {} pending proposal(s) delivered as well", flushed)?;
				}
				Ok(())
			},
			SubmissionOutcome::StoredLocally { proposal } => write!(
				f,
				"{} {}\nIt will be re-submitted after the next successful submission",
				"API unreachable, proposal stored locally:".yellow(),
				proposal_line(proposal)
			),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PendingReport {
	pub pending: Vec<Proposal>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub flushed: Option<usize>,
}

impl Display for PendingReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if let Some(flushed) = self.flushed {
			writeln!(f, "{} pending proposal(s) accepted by the API", flushed)?;
		}
		if self.pending.is_empty() {
			return write!(f, "{}", "No pending proposals".dimmed())
		}
		write!(f, "{}", self.pending.iter().map(proposal_line).format("\n"))
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadReport {
	pub uploaded: usize,
}

impl Display for UploadReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self.uploaded {
			0 => write!(f, "{}", "No local votes to upload".dimmed()),
			uploaded => write!(f, "{} local vote(s) uploaded", uploaded),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetReport {
	pub cleared_keys: usize,
}

impl Display for ResetReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "All votes reset, {} cached entries cleared", self.cleared_keys)
	}
}
