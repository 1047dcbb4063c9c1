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

use crate::{
	constants::{RETRY_COUNT, RETRY_DELAY_MS},
	types::Timestamp,
};
use clap::Args;
use log::info;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::sleep;

#[derive(Clone, Debug, Args)]
pub struct RetryOptions {
	/// How many times a failed HTTP read is retried
	#[clap(name = "retry", long, default_value_t = RETRY_COUNT)]
	pub max_count: u32,
	/// Fixed delay between retries in milliseconds
	#[clap(name = "retry-delay", long, default_value_t = RETRY_DELAY_MS)]
	pub delay_ms: u64,
}

impl Default for RetryOptions {
	fn default() -> Self {
		Self { max_count: RETRY_COUNT, delay_ms: RETRY_DELAY_MS }
	}
}

/// Fixed backoff retry counter
pub struct Retry {
	count: u32,
	max_count: u32,
	delay: Duration,
}

#[derive(Debug, Error)]
pub enum RetryError {
	#[error("Max count reached")]
	MaxCountReached,
}

impl Retry {
	pub fn new(options: &RetryOptions) -> Self {
		Self { count: 0, max_count: options.max_count, delay: Duration::from_millis(options.delay_ms) }
	}

	pub async fn sleep(&mut self) -> Result<(), RetryError> {
		self.count += 1;
		if self.count > self.max_count {
			return Err(RetryError::MaxCountReached)
		}

		info!("Retrying in {}ms ({}/{})...", self.delay.as_millis(), self.count, self.max_count);
		sleep(self.delay).await;

		Ok(())
	}
}

#[derive(Debug, Error, PartialEq)]
#[error("timeout must be a positive number of seconds, got {0}")]
pub struct InvalidTimeout(pub f32);

/// Request timeout given in seconds on the command line
pub fn request_timeout(secs: f32) -> Result<Duration, InvalidTimeout> {
	match Duration::try_from_secs_f32(secs) {
		Ok(timeout) if !timeout.is_zero() => Ok(timeout),
		_ => Err(InvalidTimeout(secs)),
	}
}

/// Milliseconds since the unix epoch
pub fn now_millis() -> Timestamp {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as Timestamp)
		.unwrap_or_default()
}

/// Formats a millisecond timestamp as RFC 3339, falls back to the raw number
pub fn format_timestamp(ts: Timestamp) -> String {
	time::OffsetDateTime::from_unix_timestamp_nanos(ts as i128 * 1_000_000)
		.ok()
		.and_then(|dt| dt.format(&time::format_description::well_known::Rfc3339).ok())
		.unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn retry_gives_up_after_max_count() {
		let mut retry = Retry::new(&RetryOptions { max_count: 2, delay_ms: 1 });

		assert!(retry.sleep().await.is_ok());
		assert!(retry.sleep().await.is_ok());
		assert!(matches!(retry.sleep().await, Err(RetryError::MaxCountReached)));
	}

	#[test]
	fn rejects_unusable_timeouts() {
		assert_eq!(request_timeout(2.5), Ok(Duration::from_millis(2500)));
		for secs in [0.0, -1.0, f32::NAN, f32::INFINITY] {
			assert!(request_timeout(secs).is_err(), "{}", secs);
		}
	}

	#[test]
	fn formats_epoch() {
		assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
	}
}
