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

use super::{ApiError, CurrentPhaseResponse, LocalVotesUpload, RemoteAuthority, UpdatePhaseRequest, VoteUpdate};
use crate::{
	constants::{DEFAULT_HTTP_TIMEOUT_SECS, HTTP_UA},
	proposals::ProposalSubmission,
	types::{EvaluationProgress, Phase},
	utils::{Retry, RetryOptions, now_millis, request_timeout},
};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use typed_builder::TypedBuilder;
use url::Url;

const NO_CACHE: &str = "no-cache, no-store";

#[derive(Clone, Debug, TypedBuilder)]
pub struct HttpApiOptions {
	/// Per request timeout in seconds
	#[builder(default = DEFAULT_HTTP_TIMEOUT_SECS)]
	timeout: f32,
	/// Fixed backoff applied to idempotent reads
	#[builder(default)]
	retry: RetryOptions,
}

impl Default for HttpApiOptions {
	fn default() -> Self {
		Self::builder().build()
	}
}

pub struct HttpRemoteAuthority {
	base: Url,
	client: reqwest::Client,
	retry: RetryOptions,
}

impl HttpRemoteAuthority {
	pub fn new(url: &str, options: &HttpApiOptions) -> Result<Self, ApiError> {
		let mut base = Url::parse(url)?;
		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());
			base.set_path(&path);
		}
		let client = reqwest::Client::builder()
			.user_agent(HTTP_UA)
			.timeout(request_timeout(options.timeout)?)
			.build()?;

		Ok(Self { base, client, retry: options.retry.clone() })
	}

	/// Endpoint URL with a cache busting query parameter
	fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
		let mut url = self.base.join(path)?;
		url.query_pairs_mut().append_pair("_", &now_millis().to_string());
		Ok(url)
	}

	async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
		let response = self
			.client
			.get(self.endpoint(path)?)
			.header(ACCEPT, "application/json")
			.header(CACHE_CONTROL, NO_CACHE)
			.send()
			.await?;
		let body = read_body(path, response).await?;
		decode(path, body)
	}

	/// Reads are retried with a fixed delay, but only when the request never got an answer
	async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
		let mut retry = Retry::new(&self.retry);
		loop {
			match self.get_once(path).await {
				Err(err) if err.is_transport() => {
					warn!("GET {} failed: {}", path, err);
					if retry.sleep().await.is_err() {
						return Err(err)
					}
				},
				result => return result,
			}
		}
	}

	/// Writes are never retried, an empty 2xx body is accepted
	async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
		let response = self
			.client
			.post(self.endpoint(path)?)
			.header(ACCEPT, "application/json")
			.header(CACHE_CONTROL, NO_CACHE)
			.json(body)
			.send()
			.await?;
		let body = read_body(path, response).await?;
		if body.trim().is_empty() {
			return Ok(Value::Null)
		}
		decode(path, body)
	}
}

async fn read_body(path: &str, response: reqwest::Response) -> Result<String, ApiError> {
	let status = response.status();
	if !status.is_success() {
		return Err(ApiError::Status { path: path.to_string(), status: status.as_u16() })
	}
	Ok(response.text().await?)
}

fn decode<T: DeserializeOwned>(path: &str, body: String) -> Result<T, ApiError> {
	if body.trim().is_empty() {
		return Err(ApiError::Malformed { path: path.to_string(), reason: "empty response".to_string() })
	}
	serde_json::from_str(&body).map_err(|err| ApiError::Malformed { path: path.to_string(), reason: err.to_string() })
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
	async fn current_phase(&self) -> Result<String, ApiError> {
		let response: CurrentPhaseResponse = self.get("phase/current-phase").await?;
		debug!("API phase: {}", response.current_phase);
		Ok(response.current_phase)
	}

	async fn update_phase(&self, phase: Phase) -> Result<(), ApiError> {
		self.post("phase/update-phase", &UpdatePhaseRequest { phase: phase.as_str() }).await?;
		Ok(())
	}

	async fn top_rankings(&self) -> Result<Vec<Value>, ApiError> {
		let path = "evaluation/rankings/top";
		match self.get::<Value>(path).await? {
			Value::Array(items) => Ok(items),
			other => Err(ApiError::Malformed {
				path: path.to_string(),
				reason: format!("expected an array, got {}", json_kind(&other)),
			}),
		}
	}

	async fn submit_proposal(&self, submission: &ProposalSubmission) -> Result<Value, ApiError> {
		self.post("proposals/submit", submission).await
	}

	async fn update_votes(&self, update: &VoteUpdate) -> Result<(), ApiError> {
		self.post("proposals/updateVotes", update).await?;
		Ok(())
	}

	async fn sync_votes(&self, upload: &LocalVotesUpload) -> Result<(), ApiError> {
		self.post("proposals/sync-votes", upload).await?;
		Ok(())
	}

	async fn reset_all_votes(&self) -> Result<(), ApiError> {
		self.post("proposals/resetAllVotes", &serde_json::json!({})).await?;
		Ok(())
	}

	async fn evaluation_progress(&self) -> Result<EvaluationProgress, ApiError> {
		self.get("evaluation/progress").await
	}

	async fn start_evaluation(&self) -> Result<(), ApiError> {
		self.post("evaluation/start", &serde_json::json!({})).await?;
		Ok(())
	}
}

fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}
