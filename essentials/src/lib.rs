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
//! Client-side reconciliation of the grant cycle state.
//!
//! Three independent sources hold a view of the same facts: the off-chain API (primary source for the
//! phase and proposal data), the voting ledger (authoritative for vote tallies and, on newer contracts,
//! for the phase) and a durable local cache. The reconcilers in this crate poll the remote sources,
//! compare them against the cache and converge on a single effective state that degrades to cached or
//! default values instead of failing.

pub mod api;
pub mod cache;
pub mod constants;
pub mod evaluation;
pub mod init;
pub mod ledger;
pub mod phase_sync;
pub mod proposals;
pub mod sync_service;
pub mod types;
pub mod utils;
pub mod vote_sync;
pub mod voting;

#[cfg(test)]
mod test_utils;
