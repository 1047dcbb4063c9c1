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
//! Normalisation of the heterogeneous ranking records served by the API.
//!
//! Records nest the proposal under one of several keys and spread fields between the wrapper and the body.
//! Every field is resolved by a fixed list of candidates where the first truthy value wins, in the
//! JavaScript sense: `null`, `false`, `0` and `""` are skipped.

use crate::types::{Proposal, ProposalFields, parse_vote_count};
use serde_json::Value;

/// Markdown sections embedded in proposal descriptions
pub const SECTION_NAME: &str = "Name";
pub const SECTION_EMAIL: &str = "Email";
pub const SECTION_LINKS: &str = "Links";
pub const SECTION_PROJECT_TITLE: &str = "Project Title";
pub const SECTION_DESCRIPTION: &str = "Description";
pub const SECTION_BRIEF_SUMMARY: &str = "Brief Summary";
pub const SECTION_PRIMARY_GOAL: &str = "Primary Goal";
pub const SECTION_SPECIFIC_OBJECTIVES: &str = "Specific Objectives";
pub const SECTION_BUDGET: &str = "Budget";
pub const SECTION_LONG_TERM_PLAN: &str = "Long Term Plan";
pub const SECTION_FUTURE_FUNDING_PLANS: &str = "Future Funding Plans";

fn truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
		Value::String(s) => !s.is_empty(),
		Value::Array(_) | Value::Object(_) => true,
	}
}

fn first_truthy<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<&'a Value> {
	candidates.into_iter().flatten().find(|v| truthy(v))
}

fn as_text(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn text_field(value: &Value, key: &str) -> Option<String> {
	value.get(key).filter(|v| truthy(v)).map(as_text)
}

/// Content of a `## <section>` heading, up to the next `\n## ` heading or the end of the text.
/// Heading lookup ignores ASCII case, blank results count as absent.
pub fn extract_section(description: &str, section: &str) -> Option<String> {
	let needle = format!("## {}", section).to_ascii_lowercase();
	let haystack = description.to_ascii_lowercase();
	let start = haystack.find(&needle)? + needle.len();
	let rest = &description[start..];
	let body = rest.trim_start();
	let end = body.find("\n## ").unwrap_or(body.len());
	let content = body[..end].trim();
	(!content.is_empty()).then(|| content.to_string())
}

/// Splits a markdown description into its known sections
pub fn extract_fields(description: &str) -> ProposalFields {
	ProposalFields {
		name: extract_section(description, SECTION_NAME),
		email_id: extract_section(description, SECTION_EMAIL),
		links: extract_section(description, SECTION_LINKS),
		project_title: extract_section(description, SECTION_PROJECT_TITLE),
		project_description: extract_section(description, SECTION_DESCRIPTION),
		brief_summary: extract_section(description, SECTION_BRIEF_SUMMARY),
		primary_goal: extract_section(description, SECTION_PRIMARY_GOAL),
		specific_objective: extract_section(description, SECTION_SPECIFIC_OBJECTIVES),
		budget: extract_section(description, SECTION_BUDGET),
		long_term_plan: extract_section(description, SECTION_LONG_TERM_PLAN),
		future_funding_plans: extract_section(description, SECTION_FUTURE_FUNDING_PLANS),
	}
}

/// Turns the `index`-th ranking record into a proposal
pub fn normalize_ranking(item: &Value, index: usize) -> Proposal {
	let position = index + 1;
	let body = first_truthy([item.get("proposal"), item.get("proposalData"), item.get("data")]).unwrap_or(item);

	let id = first_truthy([body.get("id"), item.get("id")])
		.map(as_text)
		.unwrap_or_else(|| format!("local-{}", position));
	let vote_count = first_truthy([body.get("voteCount"), item.get("voteCount")])
		.map(parse_vote_count)
		.unwrap_or(0);
	let rank = item
		.get("rank")
		.filter(|v| truthy(v))
		.map(|v| parse_vote_count(v) as u32)
		.filter(|rank| *rank > 0)
		.unwrap_or(position as u32);
	let description = first_truthy([body.get("description"), item.get("description")])
		.map(as_text)
		.unwrap_or_default();

	let mut fields = extract_fields(&description);
	// Dedicated fields win over the ones embedded in the description
	if let Some(name) = text_field(body, "name") {
		fields.name = Some(name);
	}
	if let Some(email) = text_field(body, "emailId") {
		fields.email_id = Some(email);
	}
	if let Some(links) = text_field(body, "links") {
		fields.links = Some(links);
	}
	if let Some(title) = text_field(body, "projectTitle") {
		fields.project_title = Some(title);
	}

	let title = fields
		.project_title
		.clone()
		.or_else(|| text_field(body, "title"))
		.or_else(|| text_field(item, "title"))
		.unwrap_or_else(|| format!("Proposal {}", position));
	let proposer = first_truthy([body.get("proposer"), item.get("proposer")])
		.map(as_text)
		.unwrap_or_else(|| "Unknown".to_string());
	let stellar_wallet_address =
		text_field(body, "stellarWalletAddress").or_else(|| text_field(item, "stellarWalletAddress"));

	Proposal {
		id,
		title,
		proposer,
		description,
		stellar_wallet_address,
		vote_count,
		rank: Some(rank),
		status: text_field(body, "status"),
		timestamp: body.get("timestamp").and_then(Value::as_u64),
		fields,
	}
}

pub fn normalize_rankings(items: &[Value]) -> Vec<Proposal> {
	items.iter().enumerate().map(|(index, item)| normalize_ranking(item, index)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn nested_body_takes_precedence() {
		let item = json!({
			"id": "outer",
			"rank": 4,
			"voteCount": "9",
			"title": "Outer title",
			"proposal": { "id": "inner", "voteCount": 0, "proposer": "0xabc" }
		});
		let proposal = normalize_ranking(&item, 0);

		assert_eq!(proposal.id, "inner");
		// zero is falsy, the wrapper count is used
		assert_eq!(proposal.vote_count, 9);
		assert_eq!(proposal.rank, Some(4));
		assert_eq!(proposal.title, "Outer title");
		assert_eq!(proposal.proposer, "0xabc");
	}

	#[test]
	fn alternate_body_keys_in_order() {
		let item = json!({ "proposalData": { "id": "pd" }, "data": { "id": "d" } });
		assert_eq!(normalize_ranking(&item, 0).id, "pd");
		let item = json!({ "proposalData": null, "data": { "id": "d" } });
		assert_eq!(normalize_ranking(&item, 0).id, "d");
	}

	#[test]
	fn defaults_for_empty_record() {
		let proposal = normalize_ranking(&json!({}), 2);

		assert_eq!(proposal.id, "local-3");
		assert_eq!(proposal.vote_count, 0);
		assert_eq!(proposal.rank, Some(3));
		assert_eq!(proposal.title, "Proposal 3");
		assert_eq!(proposal.proposer, "Unknown");
		assert_eq!(proposal.description, "");
		assert_eq!(proposal.stellar_wallet_address, None);
	}

	#[test]
	fn title_comes_from_the_description() {
		let item = json!({
			"id": 5,
			"title": "Plain",
			"description": "## Name\nAda\n## Project Title\nAnalytical Engine\n## Budget\n1000 XLM"
		});
		let proposal = normalize_ranking(&item, 0);

		assert_eq!(proposal.id, "5");
		assert_eq!(proposal.title, "Analytical Engine");
		assert_eq!(proposal.fields.name.as_deref(), Some("Ada"));
		assert_eq!(proposal.fields.budget.as_deref(), Some("1000 XLM"));

		let item = json!({ "description": "## Project Title\nFrom text", "projectTitle": "Direct" });
		assert_eq!(normalize_ranking(&item, 0).title, "Direct");
	}

	#[test]
	fn sections_are_case_insensitive_and_bounded() {
		let text = "## BRIEF SUMMARY\n  short one \n## Primary Goal\ngoal text\nsecond line";
		assert_eq!(extract_section(text, "Brief Summary").as_deref(), Some("short one"));
		assert_eq!(extract_section(text, "Primary Goal").as_deref(), Some("goal text\nsecond line"));
		assert_eq!(extract_section(text, "Budget"), None);
		assert_eq!(extract_section("## Budget\n   ", "Budget"), None);
	}
}
