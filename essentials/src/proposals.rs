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
//! Proposal submission with a local fallback while the API is unreachable.

use crate::{
	api::{RemoteAuthority, records},
	cache::LocalCache,
	types::{LOCAL_ID_PREFIX, Proposal, ProposalFields},
	utils::now_millis,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;

const PENDING: &str = "pending";

/// Document accepted by `POST /proposals/submit`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSubmission {
	pub name: String,
	pub email_id: String,
	#[serde(default)]
	pub links: String,
	pub project_title: String,
	pub project_description: String,
	#[serde(rename = "brief_summary")]
	pub brief_summary: String,
	pub primary_goal: String,
	#[serde(default)]
	pub specific_objective: String,
	pub budget: String,
	#[serde(default)]
	pub long_term_plan: String,
	#[serde(default)]
	pub future_funding_plans: String,
	pub stellar_wallet_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
	pub field: &'static str,
	pub message: String,
}

impl fmt::Display for FieldError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.field, self.message)
	}
}

#[derive(Debug, Error)]
pub enum ProposalError {
	#[error("invalid proposal: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
	Invalid(Vec<FieldError>),
}

/// `G` followed by 55 upper case letters or digits
pub fn is_valid_stellar_address(address: &str) -> bool {
	address.len() == 56 &&
		address.starts_with('G') &&
		address.bytes().skip(1).all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn is_valid_email(email: &str) -> bool {
	let Some((local, domain)) = email.split_once('@') else { return false };
	!local.is_empty() &&
		!email.chars().any(char::is_whitespace) &&
		!domain.contains('@') &&
		domain.split_once('.').is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

impl ProposalSubmission {
	pub fn validate(&self) -> Result<(), ProposalError> {
		let mut errors = Vec::new();
		let mut require = |field: &'static str, value: &str| {
			if value.trim().is_empty() {
				errors.push(FieldError { field, message: "is required".to_string() });
			}
		};
		require("name", &self.name);
		require("projectTitle", &self.project_title);
		require("projectDescription", &self.project_description);
		require("brief_summary", &self.brief_summary);
		require("primaryGoal", &self.primary_goal);
		require("budget", &self.budget);

		if !is_valid_email(self.email_id.trim()) {
			errors.push(FieldError { field: "emailId", message: "is not a valid email address".to_string() });
		}
		let bad_links: Vec<&str> = self
			.links
			.split(|c: char| c == ',' || c.is_whitespace())
			.filter(|link| !link.is_empty() && url::Url::parse(link).is_err())
			.collect();
		if !bad_links.is_empty() {
			errors.push(FieldError { field: "links", message: format!("invalid URLs: {}", bad_links.join(", ")) });
		}
		if !is_valid_stellar_address(self.stellar_wallet_address.trim()) {
			errors.push(FieldError {
				field: "stellarWalletAddress",
				message: "must be G followed by 55 upper case letters or digits".to_string(),
			});
		}

		if errors.is_empty() { Ok(()) } else { Err(ProposalError::Invalid(errors)) }
	}

	/// Markdown description with one `## ` section per field, the format the rankings are parsed with
	pub fn markdown_description(&self) -> String {
		[
			(records::SECTION_NAME, &self.name),
			(records::SECTION_EMAIL, &self.email_id),
			(records::SECTION_LINKS, &self.links),
			(records::SECTION_PROJECT_TITLE, &self.project_title),
			(records::SECTION_DESCRIPTION, &self.project_description),
			(records::SECTION_BRIEF_SUMMARY, &self.brief_summary),
			(records::SECTION_PRIMARY_GOAL, &self.primary_goal),
			(records::SECTION_SPECIFIC_OBJECTIVES, &self.specific_objective),
			(records::SECTION_BUDGET, &self.budget),
			(records::SECTION_LONG_TERM_PLAN, &self.long_term_plan),
			(records::SECTION_FUTURE_FUNDING_PLANS, &self.future_funding_plans),
		]
		.iter()
		.filter(|(_, value)| !value.trim().is_empty())
		.map(|(section, value)| format!("## {}\n{}", section, value.trim()))
		.collect::<Vec<_>>()
		.join("\n\n")
	}

	fn fields(&self) -> ProposalFields {
		let some = |value: &String| (!value.trim().is_empty()).then(|| value.clone());
		ProposalFields {
			name: some(&self.name),
			email_id: some(&self.email_id),
			links: some(&self.links),
			project_title: some(&self.project_title),
			project_description: some(&self.project_description),
			brief_summary: some(&self.brief_summary),
			primary_goal: some(&self.primary_goal),
			specific_objective: some(&self.specific_objective),
			budget: some(&self.budget),
			long_term_plan: some(&self.long_term_plan),
			future_funding_plans: some(&self.future_funding_plans),
		}
	}

	/// Local-only record kept until the API accepts the submission
	pub fn to_local_proposal(&self, now: u64) -> Proposal {
		Proposal {
			id: format!("{}{}", LOCAL_ID_PREFIX, now),
			title: self.project_title.clone(),
			proposer: self.name.clone(),
			description: self.markdown_description(),
			stellar_wallet_address: Some(self.stellar_wallet_address.clone()),
			vote_count: 0,
			rank: None,
			status: Some(PENDING.to_string()),
			timestamp: Some(now),
			fields: self.fields(),
		}
	}

	fn from_local_proposal(proposal: &Proposal) -> Self {
		let fields = &proposal.fields;
		let text = |value: &Option<String>| value.clone().unwrap_or_default();
		Self {
			name: text(&fields.name),
			email_id: text(&fields.email_id),
			links: text(&fields.links),
			project_title: fields.project_title.clone().unwrap_or_else(|| proposal.title.clone()),
			project_description: text(&fields.project_description),
			brief_summary: text(&fields.brief_summary),
			primary_goal: text(&fields.primary_goal),
			specific_objective: text(&fields.specific_objective),
			budget: text(&fields.budget),
			long_term_plan: text(&fields.long_term_plan),
			future_funding_plans: text(&fields.future_funding_plans),
			stellar_wallet_address: proposal.stellar_wallet_address.clone().unwrap_or_default(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubmissionOutcome {
	Submitted { response: serde_json::Value, flushed: usize },
	/// API unreachable, kept in the cache as a pending local proposal
	StoredLocally { proposal: Proposal },
}

pub struct ProposalService {
	cache: LocalCache,
	remote: Arc<dyn RemoteAuthority>,
}

impl ProposalService {
	pub fn new(cache: LocalCache, remote: Arc<dyn RemoteAuthority>) -> Self {
		Self { cache, remote }
	}

	pub async fn submit(&self, submission: &ProposalSubmission) -> Result<SubmissionOutcome, ProposalError> {
		submission.validate()?;

		match self.remote.submit_proposal(submission).await {
			Ok(response) => {
				info!("proposal {:?} submitted", submission.project_title);
				let flushed = self.flush_pending().await;
				Ok(SubmissionOutcome::Submitted { response, flushed })
			},
			Err(err) => {
				warn!("cannot submit proposal, storing it locally: {}", err);
				let proposal = submission.to_local_proposal(now_millis());
				let mut stored = self.cache.fallback_proposals();
				stored.push(proposal.clone());
				self.cache.set_fallback_proposals(&stored);
				Ok(SubmissionOutcome::StoredLocally { proposal })
			},
		}
	}

	pub fn pending(&self) -> Vec<Proposal> {
		self.cache
			.fallback_proposals()
			.into_iter()
			.filter(|p| p.is_local_only() && p.status.as_deref() == Some(PENDING))
			.collect()
	}

	/// Re-submits pending local proposals, returns how many the API accepted
	pub async fn flush_pending(&self) -> usize {
		let pending = self.pending();
		if pending.is_empty() {
			return 0
		}

		let mut accepted = Vec::new();
		for proposal in &pending {
			let submission = ProposalSubmission::from_local_proposal(proposal);
			match self.remote.submit_proposal(&submission).await {
				Ok(_) => {
					info!("pending proposal {} accepted", proposal.id);
					accepted.push(proposal.id.clone());
				},
				Err(err) => warn!("pending proposal {} still not accepted: {}", proposal.id, err),
			}
		}

		if !accepted.is_empty() {
			let remaining: Vec<Proposal> =
				self.cache.fallback_proposals().into_iter().filter(|p| !accepted.contains(&p.id)).collect();
			self.cache.set_fallback_proposals(&remaining);
		}
		accepted.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{api::MockRemoteAuthority, test_utils::api_unavailable};
	use std::sync::atomic::{AtomicBool, Ordering};

	fn submission() -> ProposalSubmission {
		ProposalSubmission {
			name: "Ada".into(),
			email_id: "ada@example.org".into(),
			links: "https://example.org https://github.com/ada".into(),
			project_title: "Analytical Engine".into(),
			project_description: "A general purpose computer".into(),
			brief_summary: "Computing".into(),
			primary_goal: "Build it".into(),
			specific_objective: "Mill and store".into(),
			budget: "1000 XLM".into(),
			long_term_plan: String::new(),
			future_funding_plans: String::new(),
			stellar_wallet_address: format!("G{}", "A".repeat(55)),
		}
	}

	#[test]
	fn validates_fields() {
		assert!(submission().validate().is_ok());

		let mut invalid = submission();
		invalid.name = " ".into();
		invalid.email_id = "ada@".into();
		invalid.links = "notaurl".into();
		invalid.stellar_wallet_address = format!("g{}", "A".repeat(55));
		let Err(ProposalError::Invalid(errors)) = invalid.validate() else { panic!("expected validation errors") };
		let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
		assert_eq!(fields, ["name", "emailId", "links", "stellarWalletAddress"]);
	}

	#[test]
	fn stellar_addresses() {
		assert!(is_valid_stellar_address(&format!("G{}", "A1".repeat(27) + "B")));
		assert!(!is_valid_stellar_address(&format!("G{}", "a".repeat(55))));
		assert!(!is_valid_stellar_address(&format!("G{}", "A".repeat(54))));
	}

	#[test]
	fn serializes_the_backend_document() {
		let value = serde_json::to_value(submission()).unwrap();
		assert!(value.get("emailId").is_some());
		assert!(value.get("brief_summary").is_some());
		assert!(value.get("stellarWalletAddress").is_some());
	}

	#[test]
	fn description_round_trips_through_the_section_parser() {
		let description = submission().markdown_description();
		let fields = records::extract_fields(&description);
		assert_eq!(fields.project_title.as_deref(), Some("Analytical Engine"));
		assert_eq!(fields.specific_objective.as_deref(), Some("Mill and store"));
		assert_eq!(fields.long_term_plan, None);
	}

	#[tokio::test]
	async fn stores_locally_while_remote_is_down() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_submit_proposal().returning(|_| Err(api_unavailable()));
		let cache = LocalCache::in_memory();
		let service = ProposalService::new(cache.clone(), Arc::new(remote));

		let SubmissionOutcome::StoredLocally { proposal } = service.submit(&submission()).await.unwrap() else {
			panic!("expected a local record")
		};

		assert!(proposal.id.starts_with(LOCAL_ID_PREFIX));
		assert_eq!(proposal.status.as_deref(), Some("pending"));
		assert_eq!(proposal.vote_count, 0);
		assert_eq!(service.pending(), vec![proposal]);
	}

	#[tokio::test]
	async fn successful_submission_flushes_pending() {
		let cache = LocalCache::in_memory();
		let earlier = submission().to_local_proposal(1);
		cache.set_fallback_proposals(&[earlier]);
		let calls = Arc::new(AtomicBool::new(false));
		let seen = calls.clone();
		let mut remote = MockRemoteAuthority::new();
		remote.expect_submit_proposal().times(2).returning(move |submission| {
			assert_eq!(submission.project_title, "Analytical Engine");
			seen.store(true, Ordering::SeqCst);
			Ok(serde_json::json!({ "success": true }))
		});
		let service = ProposalService::new(cache.clone(), Arc::new(remote));

		let outcome = service.submit(&submission()).await.unwrap();

		assert!(matches!(outcome, SubmissionOutcome::Submitted { flushed: 1, .. }));
		assert!(service.pending().is_empty());
		assert!(calls.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn invalid_submission_never_reaches_the_api() {
		let mut remote = MockRemoteAuthority::new();
		remote.expect_submit_proposal().never();
		let service = ProposalService::new(LocalCache::in_memory(), Arc::new(remote));

		let mut invalid = submission();
		invalid.budget.clear();
		assert!(service.submit(&invalid).await.is_err());
	}
}
