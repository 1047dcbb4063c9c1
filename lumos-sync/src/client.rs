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

use clap::Args;
use log::{info, warn};
use lumos_sync_essentials::{
	api::{HttpApiOptions, HttpRemoteAuthority, RemoteAuthority},
	cache::{FileStore, LocalCache},
	constants::{
		DEFAULT_API_URL, DEFAULT_CHAIN_ID, DEFAULT_GRANT_MANAGER_ADDRESS, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_RPC_URL,
		DEFAULT_VOTING_ADDRESS,
	},
	evaluation::EvaluationTracker,
	ledger::{JsonRpcLedger, LedgerClient, LedgerOptions},
	phase_sync::PhaseReconciler,
	proposals::ProposalService,
	utils::{RetryOptions, request_timeout},
	vote_sync::VoteReconciler,
	voting::{VerificationOptions, VoteCaster},
};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone, Debug, Args)]
pub(crate) struct ClientOptions {
	/// Base URL of the Lumos API
	#[clap(long, default_value = DEFAULT_API_URL)]
	pub api_url: String,
	/// JSON-RPC endpoint of the ledger node
	#[clap(long, default_value = DEFAULT_RPC_URL)]
	pub rpc_url: String,
	/// GrantManager contract address
	#[clap(long, default_value = DEFAULT_GRANT_MANAGER_ADDRESS)]
	pub grant_manager: String,
	/// Voting contract address
	#[clap(long, default_value = DEFAULT_VOTING_ADDRESS)]
	pub voting: String,
	/// Node-managed account used to send transactions
	#[clap(long)]
	pub account: Option<String>,
	/// Chain the ledger is expected to run on
	#[clap(long, default_value_t = DEFAULT_CHAIN_ID)]
	pub chain_id: u64,
	/// Timeout of every HTTP request in seconds
	#[clap(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS, value_parser = parse_timeout)]
	pub timeout: f32,
	/// Cache file shared by every lumos-sync process on this machine
	#[clap(long, default_value = "lumos-cache.json")]
	pub cache: PathBuf,
	/// Do not talk to the ledger, tallies come from the API only
	#[clap(long)]
	pub no_ledger: bool,
}

fn parse_timeout(value: &str) -> Result<f32, String> {
	let secs: f32 = value.parse().map_err(|err| format!("{}: {}", value, err))?;
	request_timeout(secs).map(|_| secs).map_err(|err| err.to_string())
}

/// Everything a command needs, built once from the command line
pub(crate) struct Client {
	pub cache: LocalCache,
	pub remote: Arc<dyn RemoteAuthority>,
	pub ledger: Option<Arc<dyn LedgerClient>>,
	chain_id: u64,
	account: Option<String>,
}

impl Client {
	pub(crate) fn new(opts: &ClientOptions, retry: &RetryOptions) -> color_eyre::Result<Self> {
		let cache = match FileStore::open(&opts.cache) {
			Ok(store) => LocalCache::new(store),
			Err(err) => {
				warn!("cannot open cache {}, running in memory: {}", opts.cache.display(), err);
				LocalCache::in_memory()
			},
		};

		let api_opts = HttpApiOptions::builder().timeout(opts.timeout).retry(retry.clone()).build();
		let remote: Arc<dyn RemoteAuthority> = Arc::new(HttpRemoteAuthority::new(&opts.api_url, &api_opts)?);

		let ledger: Option<Arc<dyn LedgerClient>> = if opts.no_ledger {
			info!("ledger disabled");
			None
		} else {
			let ledger_opts = LedgerOptions::builder()
				.grant_manager(opts.grant_manager.clone())
				.voting(opts.voting.clone())
				.account(opts.account.clone())
				.timeout(opts.timeout)
				.build();
			Some(Arc::new(JsonRpcLedger::new(&opts.rpc_url, &ledger_opts)?))
		};

		Ok(Self { cache, remote, ledger, chain_id: opts.chain_id, account: opts.account.clone() })
	}

	pub(crate) fn ledger(&self) -> color_eyre::Result<Arc<dyn LedgerClient>> {
		self.ledger
			.clone()
			.ok_or_else(|| color_eyre::eyre::eyre!("this command needs the ledger, drop --no-ledger"))
	}

	pub(crate) fn phase(&self) -> PhaseReconciler {
		PhaseReconciler::new(self.cache.clone(), self.remote.clone(), self.ledger.clone())
	}

	pub(crate) fn votes(&self) -> VoteReconciler {
		VoteReconciler::new(self.cache.clone(), self.remote.clone(), self.ledger.clone(), self.chain_id)
	}

	pub(crate) fn caster(&self) -> color_eyre::Result<VoteCaster> {
		let Some(account) = self.account.clone() else {
			return Err(color_eyre::eyre::eyre!("voting needs --account"))
		};
		Ok(VoteCaster::new(
			self.cache.clone(),
			self.remote.clone(),
			self.ledger()?,
			account,
			self.chain_id,
			VerificationOptions::default(),
		))
	}

	pub(crate) fn proposals(&self) -> ProposalService {
		ProposalService::new(self.cache.clone(), self.remote.clone())
	}

	pub(crate) fn evaluation(&self) -> EvaluationTracker {
		EvaluationTracker::new(self.cache.clone(), self.remote.clone())
	}
}
