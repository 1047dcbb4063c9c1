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

use crate::{api::ApiError, ledger::LedgerError};
use serde_json::{Value, json};

pub fn api_unavailable() -> ApiError {
	ApiError::Status { path: "test".to_string(), status: 503 }
}

pub fn ledger_unavailable() -> LedgerError {
	LedgerError::Transport("connection refused".to_string())
}

/// Ranking record in the flat shape served by the API
pub fn ranking_record(id: &str, votes: u64) -> Value {
	json!({ "id": id, "title": format!("Proposal {}", id), "proposer": "0xabc", "voteCount": votes.to_string() })
}
