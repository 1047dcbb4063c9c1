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

/// Default off-chain API endpoint
pub const DEFAULT_API_URL: &str = "https://lumos-mz9a.onrender.com";
/// Default JSON-RPC endpoint of the voting ledger (Base Sepolia)
pub const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";
/// GrantManager contract, owns the phase
pub const DEFAULT_GRANT_MANAGER_ADDRESS: &str = "0x012499D995eB88BeD9350dB5ec37EC5CCC975555";
/// Voting contract, owns proposals and tallies
pub const DEFAULT_VOTING_ADDRESS: &str = "0x5cE016f2731e1c6877542Ddef36c7285b6c64F19";
/// Base Sepolia
pub const DEFAULT_CHAIN_ID: u64 = 84532;

/// Used to distinguish our user-agent
pub const HTTP_UA: &str = "lumos-sync";
/// HTTP request timeout in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: f32 = 10.0;

/// How often the phase and the rankings are polled
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Evaluation progress polling interval
pub const EVALUATION_POLL_INTERVAL_MS: u64 = 5000;
/// Consecutive failed polls before a diagnostic error is logged
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Generic HTTP retry budget
pub const RETRY_COUNT: u32 = 3;
/// Fixed delay between HTTP retries
pub const RETRY_DELAY_MS: u64 = 2000;

/// Vote confirmation polling budget
pub const VERIFICATION_ATTEMPTS: u32 = 10;
/// Delay between vote confirmation polls
pub const VERIFICATION_DELAY_MS: u64 = 3000;

/// Gas limit attached to ledger transactions
pub const TX_GAS_LIMIT: u64 = 250_000;

/// Phase history is capped to this many entries, oldest evicted first
pub const MAX_PHASE_HISTORY: usize = 20;
/// Number of proposals marked as winners in the rankings
pub const WINNER_COUNT: usize = 3;

/// Capacity of the phase change broadcast channel
pub const PHASE_EVENTS_CAPACITY: usize = 64;
/// Capacity of the sync trigger queue
pub const MAX_TRIGGER_QUEUE_SIZE: usize = 32;
