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

use clap::{Parser, Subcommand};
use client::{Client, ClientOptions};
use log::{error, info};
use lumos_sync_essentials::{
	init,
	phase_sync::{PhaseEvent, PollOutcome},
	proposals::ProposalSubmission,
	sync_service::{SyncOptions, SyncService},
	types::Phase,
	utils::RetryOptions,
};
use output::{
	EvaluationReport, HistoryReport, LedgerPhaseReport, OutputMode, PendingReport, PhaseReport, RankingsReport,
	ResetReport, SubmissionReport, UploadReport, VerifyReport, VoteReport, WinnerReport, output_result,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast;

mod client;
mod output;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Keeps the Lumos grant phase and votes in sync", rename_all = "kebab-case")]
struct LumosSyncOptions {
	#[clap(subcommand)]
	command: Command,
	#[clap(flatten)]
	client: ClientOptions,
	/// Output mode
	#[clap(long, default_value_t, global = true)]
	output: OutputMode,
	#[clap(flatten)]
	verbose: init::VerbosityOptions,
	#[clap(flatten)]
	retry: RetryOptions,
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
	/// Read or change the current phase
	#[clap(subcommand)]
	Phase(PhaseCommand),
	/// Keep reconciling until Ctrl-C, printing every change
	Watch {
		/// Phase poll interval in seconds
		#[clap(long, default_value_t = lumos_sync_essentials::constants::DEFAULT_POLL_INTERVAL_SECS)]
		interval: u64,
		/// Only follow the phase, rankings are fetched once
		#[clap(long)]
		no_auto_refresh: bool,
	},
	/// Ranked proposals with reconciled vote counts
	Rankings,
	/// Winner of the round
	Winner,
	/// Upload the locally recorded votes of this machine
	SyncVotes,
	/// Cast a vote from --account and wait for its confirmation
	Vote { proposal_id: String },
	/// Submit a proposal read from a JSON document
	Submit { file: PathBuf },
	/// Proposals stored locally while the API was unreachable
	Pending {
		/// Re-submit them now
		#[clap(long)]
		flush: bool,
	},
	/// AI evaluation job
	#[clap(subcommand)]
	Evaluation(EvaluationCommand),
	/// Reset every vote on the API and clear the local cache
	Reset,
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum PhaseCommand {
	/// Last known phase, no network access
	Show,
	/// Accepted phase changes, oldest first
	History,
	/// Poll the API phase now
	Check,
	/// Whether the given phase is in effect
	Verify { phase: Phase },
	/// Administrative direct set
	Set { phase: Phase },
	/// Move one phase forward
	Advance,
	/// Move one phase back
	Revert,
	/// Pull the phase from the ledger into the API and the cache
	LedgerSync,
	/// Write the phase to the GrantManager contract
	LedgerSet { phase: Phase },
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
enum EvaluationCommand {
	/// Ask the backend to evaluate the proposals
	Start,
	/// Fetch the progress once
	Progress,
	/// Poll the progress until the job completes
	Watch,
	/// Forget the local evaluation state
	Reset,
}

async fn run_phase(client: &Client, command: PhaseCommand, mode: OutputMode) -> color_eyre::Result<()> {
	let reconciler = client.phase();
	let changed = |phase: Phase, previous: Option<Phase>| PhaseReport { phase: Some(phase), previous, changed: true };

	match command {
		PhaseCommand::Show =>
			output_result(&PhaseReport { phase: reconciler.current(), previous: None, changed: false }, mode),
		PhaseCommand::History => output_result(&HistoryReport(reconciler.history()), mode),
		PhaseCommand::Check => {
			let report = match reconciler.poll().await? {
				PollOutcome::Unchanged(phase) => PhaseReport { phase: Some(phase), previous: None, changed: false },
				PollOutcome::Updated { phase, previous } => changed(phase, previous),
			};
			output_result(&report, mode)
		},
		PhaseCommand::Verify { phase } => {
			let confirmed = reconciler.verify(phase).await;
			output_result(&VerifyReport { expected: phase, confirmed }, mode)
		},
		PhaseCommand::Set { phase } => {
			let previous = reconciler.current();
			reconciler.set_phase_admin(phase).await?;
			output_result(&changed(phase, previous), mode)
		},
		PhaseCommand::Advance => {
			let previous = reconciler.current();
			let phase = reconciler.advance().await?;
			output_result(&changed(phase, previous), mode)
		},
		PhaseCommand::Revert => {
			let previous = reconciler.current();
			let phase = reconciler.revert().await?;
			output_result(&changed(phase, previous), mode)
		},
		PhaseCommand::LedgerSync => {
			let previous = reconciler.current();
			let phase = reconciler.sync_from_ledger().await?;
			output_result(&changed(phase, previous), mode)
		},
		PhaseCommand::LedgerSet { phase } => {
			let tx_hash = client.ledger()?.set_phase(phase).await?;
			output_result(&LedgerPhaseReport { phase, tx_hash }, mode)
		},
	}
}

async fn run_evaluation(client: &Client, command: EvaluationCommand, mode: OutputMode) -> color_eyre::Result<()> {
	let tracker = client.evaluation();
	match command {
		EvaluationCommand::Start => {
			if !tracker.request().await? {
				info!("evaluation already finished, reset it to start over");
			}
			output_result(&EvaluationReport(tracker.progress()), mode)
		},
		EvaluationCommand::Progress => output_result(&EvaluationReport(tracker.refresh().await?), mode),
		EvaluationCommand::Watch => {
			let shutdown_tx = init::init_shutdown();
			let ctrl_c = tokio::spawn(init::on_shutdown(shutdown_tx.clone()));
			let mut updates = tracker.subscribe();
			let printer = tokio::spawn(async move {
				while updates.changed().await.is_ok() {
					let progress = updates.borrow_and_update().clone();
					if let Err(err) = output_result(&EvaluationReport(progress), mode) {
						error!("cannot print progress: {}", err);
					}
				}
			});

			tracker.start();
			let progress = tracker.watch_until_done(shutdown_tx.subscribe()).await;
			printer.abort();
			ctrl_c.abort();
			output_result(&EvaluationReport(progress), mode)
		},
		EvaluationCommand::Reset => {
			tracker.reset();
			output_result(&EvaluationReport(tracker.progress()), mode)
		},
	}
}

async fn run_vote(client: &Client, proposal_id: &str, mode: OutputMode) -> color_eyre::Result<()> {
	let caster = client.caster()?;
	let receipt = match caster.cast(proposal_id).await {
		Ok(receipt) => receipt,
		Err(failure) => {
			output_result(&VoteReport(caster.state()), mode)?;
			return Err(failure.into())
		},
	};
	output_result(&VoteReport(caster.state()), mode)?;

	let state = receipt.verification.await?;
	output_result(&VoteReport(state), mode)
}

async fn run_watch(client: &Client, interval: u64, auto_refresh: bool, mode: OutputMode) -> color_eyre::Result<()> {
	let phase = Arc::new(client.phase());
	let votes = Arc::new(client.votes());
	let options = SyncOptions::builder()
		.poll_interval(std::time::Duration::from_secs(interval))
		.auto_refresh(auto_refresh)
		.build();
	let service = SyncService::new(phase.clone(), votes, options);
	// Subscribed before the service runs its startup poll
	let mut events = phase.subscribe();
	let mut rankings = service.handle().rankings();

	let shutdown_tx = init::init_shutdown();
	let mut futures = vec![];

	let service_shutdown = shutdown_tx.subscribe();
	futures.push(tokio::spawn(async move {
		if let Err(err) = service.run(service_shutdown).await {
			error!("sync service failed: {:?}", err);
		}
	}));

	let mut printer_shutdown = shutdown_tx.subscribe();
	futures.push(tokio::spawn(async move {
		loop {
			let printed = tokio::select! {
				event = events.recv() => match event {
					Ok(PhaseEvent::Changed { phase, previous, .. }) =>
						output_result(&PhaseReport { phase: Some(phase), previous, changed: true }, mode),
					Ok(PhaseEvent::Reloaded { phase }) =>
						output_result(&PhaseReport { phase, previous: None, changed: false }, mode),
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						info!("skipped {} phase events", skipped);
						Ok(())
					},
					Err(broadcast::error::RecvError::Closed) => break,
				},
				changed = rankings.changed() => {
					if changed.is_err() {
						break
					}
					let latest = rankings.borrow_and_update().clone();
					match latest {
						Some(latest) => output_result(&RankingsReport(latest), mode),
						None => Ok(()),
					}
				},
				_ = printer_shutdown.recv() => break,
			};
			if let Err(err) = printed {
				error!("cannot print update: {}", err);
			}
		}
	}));

	init::run(futures, &shutdown_tx).await
}

async fn run(opts: LumosSyncOptions) -> color_eyre::Result<()> {
	let client = Client::new(&opts.client, &opts.retry)?;
	let mode = opts.output;

	match opts.command {
		Command::Phase(command) => run_phase(&client, command, mode).await,
		Command::Watch { interval, no_auto_refresh } => run_watch(&client, interval, !no_auto_refresh, mode).await,
		Command::Rankings => output_result(&RankingsReport(client.votes().rankings().await), mode),
		Command::Winner => output_result(&WinnerReport(client.votes().winner().await), mode),
		Command::SyncVotes => {
			let uploaded = client.votes().upload_local_votes().await?;
			output_result(&UploadReport { uploaded }, mode)
		},
		Command::Vote { proposal_id } => run_vote(&client, &proposal_id, mode).await,
		Command::Submit { file } => {
			let submission: ProposalSubmission = serde_json::from_slice(&std::fs::read(&file)?)?;
			let outcome = client.proposals().submit(&submission).await?;
			output_result(&SubmissionReport(outcome), mode)
		},
		Command::Pending { flush } => {
			let proposals = client.proposals();
			let flushed = if flush { Some(proposals.flush_pending().await) } else { None };
			output_result(&PendingReport { pending: proposals.pending(), flushed }, mode)
		},
		Command::Evaluation(command) => run_evaluation(&client, command, mode).await,
		Command::Reset => {
			client.remote.reset_all_votes().await?;
			let cleared_keys = client.cache.clear_app_state();
			output_result(&ResetReport { cleared_keys }, mode)
		},
	}
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	let opts = LumosSyncOptions::parse();
	init::init_cli(&opts.verbose)?;

	if let Err(err) = run(opts).await {
		error!("FATAL: {}", err);
		return Err(err)
	}

	Ok(())
}
