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
//! Process wide initialisation shared by the binaries: logging, error reports and shutdown signalling.

use clap::{ArgAction, Args};
use futures::future;
use log::{LevelFilter, info};
use tokio::{
	signal,
	sync::broadcast::{self, Sender as BroadcastSender},
};

#[derive(Clone, Debug, Args)]
pub struct VerbosityOptions {
	/// Verbosity level: -v - info, -vv - debug, -vvv - trace
	#[clap(short = 'v', long, action = ArgAction::Count, global = true)]
	pub verbose: u8,
}

impl VerbosityOptions {
	pub fn level(&self) -> LevelFilter {
		match self.verbose {
			0 => LevelFilter::Warn,
			1 => LevelFilter::Info,
			2 => LevelFilter::Debug,
			_ => LevelFilter::Trace,
		}
	}
}

/// Broadcast to every long running task when the process is about to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shutdown {
	/// Ctrl-C or an explicit request
	Graceful,
}

pub fn init_cli(opts: &VerbosityOptions) -> color_eyre::Result<()> {
	color_eyre::install()?;
	env_logger::Builder::from_default_env()
		.filter(None, opts.level())
		.format_timestamp(Some(env_logger::fmt::TimestampPrecision::Micros))
		.try_init()?;

	Ok(())
}

pub fn init_shutdown() -> BroadcastSender<Shutdown> {
	broadcast::channel(10).0
}

/// Resolves on Ctrl-C (propagating the shutdown) or when somebody else requested it
pub async fn on_shutdown(shutdown_tx: BroadcastSender<Shutdown>) {
	let mut shutdown_rx = shutdown_tx.subscribe();
	tokio::select! {
		_ = signal::ctrl_c() => {
			info!("received Ctrl-C, shutting down");
			// Nobody listening is fine, we are going down anyway
			let _ = shutdown_tx.send(Shutdown::Graceful);
		},
		_ = shutdown_rx.recv() => {}
	}
}

pub async fn run(
	mut futures: Vec<tokio::task::JoinHandle<()>>,
	shutdown_tx: &BroadcastSender<Shutdown>,
) -> color_eyre::Result<()> {
	futures.push(tokio::spawn(on_shutdown(shutdown_tx.clone())));
	future::try_join_all(futures).await?;

	Ok(())
}
