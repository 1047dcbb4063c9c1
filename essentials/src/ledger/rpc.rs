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

use super::{
	ContractCapability, LedgerClient, LedgerError, LedgerProposal, LedgerWinner, TxStatus,
	abi::{self, AbiValue, ParamType, Token},
	legacy_transition, phase_from_index,
};
use crate::{
	constants::{DEFAULT_GRANT_MANAGER_ADDRESS, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_VOTING_ADDRESS, HTTP_UA, TX_GAS_LIMIT},
	types::{Phase, TxHash},
	utils::request_timeout,
};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use typed_builder::TypedBuilder;
use url::Url;

const PUSH4: u8 = 0x63;

#[derive(Clone, Debug, TypedBuilder)]
pub struct LedgerOptions {
	#[builder(default = DEFAULT_GRANT_MANAGER_ADDRESS.to_string(), setter(into))]
	grant_manager: String,
	#[builder(default = DEFAULT_VOTING_ADDRESS.to_string(), setter(into))]
	voting: String,
	/// Node-managed account used as the transaction sender, read-only without it
	#[builder(default, setter(into))]
	account: Option<String>,
	#[builder(default = DEFAULT_HTTP_TIMEOUT_SECS)]
	timeout: f32,
	#[builder(default = TX_GAS_LIMIT)]
	gas_limit: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
	#[serde(default)]
	result: Option<Value>,
	#[serde(default)]
	error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
	code: i64,
	message: String,
	#[serde(default)]
	data: Option<Value>,
}

impl From<RpcErrorObject> for LedgerError {
	fn from(err: RpcErrorObject) -> Self {
		let reason = err
			.data
			.as_ref()
			.and_then(Value::as_str)
			.and_then(|data| abi::decode_hex(data).ok())
			.and_then(|data| abi::decode_revert_reason(&data));
		match reason {
			Some(reason) => LedgerError::Revert(reason),
			None if err.code == 3 || err.message.contains("revert") => LedgerError::Revert(err.message),
			None => LedgerError::Rpc { code: err.code, message: err.message },
		}
	}
}

/// Ledger client speaking Ethereum JSON-RPC over HTTP.
///
/// Transactions are sent with `eth_sendTransaction` from an account held by the node, nothing is signed locally.
pub struct JsonRpcLedger {
	url: Url,
	client: reqwest::Client,
	grant_manager: String,
	voting: String,
	account: Option<String>,
	gas_limit: u64,
	capability: OnceCell<ContractCapability>,
	next_id: AtomicU64,
}

impl JsonRpcLedger {
	pub fn new(url: &str, options: &LedgerOptions) -> Result<Self, LedgerError> {
		let url = Url::parse(url).map_err(|err| LedgerError::Transport(format!("invalid rpc url {}: {}", url, err)))?;
		// Validate early, the addresses are sent as given
		abi::parse_address(&options.grant_manager)?;
		abi::parse_address(&options.voting)?;
		if let Some(account) = &options.account {
			abi::parse_address(account)?;
		}
		let client = reqwest::Client::builder()
			.user_agent(HTTP_UA)
			.timeout(request_timeout(options.timeout)?)
			.build()?;

		Ok(Self {
			url,
			client,
			grant_manager: options.grant_manager.clone(),
			voting: options.voting.clone(),
			account: options.account.clone(),
			gas_limit: options.gas_limit,
			capability: OnceCell::new(),
			next_id: AtomicU64::new(1),
		})
	}

	async fn request(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
		debug!("rpc {} #{}", method, id);
		let response: RpcResponse = self.client.post(self.url.clone()).json(&body).send().await?.json().await?;
		if let Some(err) = response.error {
			return Err(err.into())
		}
		Ok(response.result.unwrap_or(Value::Null))
	}

	async fn call(&self, to: &str, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
		let mut tx = json!({ "to": to, "data": abi::encode_hex(&data) });
		if let Some(account) = &self.account {
			tx["from"] = json!(account);
		}
		let result = self.request("eth_call", json!([tx, "latest"])).await?;
		hex_result(&result)
	}

	async fn call_decode(&self, to: &str, data: Vec<u8>, types: &[ParamType]) -> Result<Vec<AbiValue>, LedgerError> {
		let output = self.call(to, data).await?;
		if output.is_empty() {
			return Err(LedgerError::Revert("empty return data, function missing or reverted".into()))
		}
		Ok(abi::decode(types, &output)?)
	}

	async fn call_single(&self, to: &str, data: Vec<u8>, param: ParamType) -> Result<AbiValue, LedgerError> {
		self.call_decode(to, data, &[param])
			.await?
			.pop()
			.ok_or_else(|| LedgerError::Decode(abi::AbiError::Unexpected("no return value".into())))
	}

	async fn send_transaction(&self, to: &str, data: Vec<u8>) -> Result<TxHash, LedgerError> {
		let account = self
			.account
			.as_ref()
			.ok_or_else(|| LedgerError::Unsupported("no sender account configured".into()))?;
		// Dry run first so reverts surface with their reason instead of as a failed transaction
		self.call(to, data.clone()).await?;
		let tx = json!({
			"from": account,
			"to": to,
			"data": abi::encode_hex(&data),
			"gas": format!("0x{:x}", self.gas_limit),
		});
		let result = self.request("eth_sendTransaction", json!([tx])).await?;
		result
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| LedgerError::Decode(abi::AbiError::Unexpected(format!("transaction hash: {}", result))))
	}
}

fn hex_result(result: &Value) -> Result<Vec<u8>, LedgerError> {
	let hex = result
		.as_str()
		.ok_or_else(|| LedgerError::Decode(abi::AbiError::Unexpected(format!("expected hex string, got {}", result))))?;
	Ok(abi::decode_hex(hex)?)
}

fn quantity(result: &Value) -> Result<u64, LedgerError> {
	let hex = result
		.as_str()
		.ok_or_else(|| LedgerError::Decode(abi::AbiError::Unexpected(format!("expected quantity, got {}", result))))?;
	u64::from_str_radix(hex.trim_start_matches("0x"), 16)
		.map_err(|err| LedgerError::Decode(abi::AbiError::InvalidHex(format!("{}: {}", hex, err))))
}

/// Looks for `PUSH4 <selector>` in the dispatcher of the deployed bytecode
fn bytecode_has_function(code: &[u8], signature: &str) -> bool {
	let selector = abi::selector(signature);
	code.windows(5).any(|window| window[0] == PUSH4 && window[1..] == selector)
}

/// `getCurrentPhase()` returns the phase name, older deployments an index
fn decode_phase(output: &[u8], capability: ContractCapability) -> Result<Phase, LedgerError> {
	let is_string = output.len() >= 64 && abi::decode(&[ParamType::Uint], output).ok() == Some(vec![AbiValue::Uint(32)]);
	if is_string {
		let name = abi::decode(&[ParamType::String], output)?
			.pop()
			.map(AbiValue::into_string)
			.transpose()?
			.unwrap_or_default();
		return Phase::parse(&name).ok_or_else(|| LedgerError::Unsupported(format!("unknown ledger phase {:?}", name)))
	}
	let index = abi::decode(&[ParamType::Uint], output)?
		.pop()
		.map(AbiValue::into_uint)
		.transpose()?
		.unwrap_or_default();
	phase_from_index(index, capability)
		.ok_or_else(|| LedgerError::Unsupported(format!("unknown ledger phase index {}", index)))
}

fn proposal_members() -> Vec<ParamType> {
	vec![ParamType::Uint, ParamType::String, ParamType::String, ParamType::Address, ParamType::Uint]
}

fn into_proposal(members: Vec<AbiValue>) -> Result<LedgerProposal, LedgerError> {
	let mut members = members.into_iter();
	let mut next = || members.next().ok_or_else(|| abi::AbiError::Unexpected("short proposal tuple".into()));
	Ok(LedgerProposal {
		id: next()?.into_u64()?,
		title: next()?.into_string()?,
		description: next()?.into_string()?,
		proposer: next()?.into_address()?,
		vote_count: next()?.into_u64()?,
	})
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
	async fn chain_id(&self) -> Result<u64, LedgerError> {
		quantity(&self.request("eth_chainId", json!([])).await?)
	}

	async fn capability(&self) -> Result<ContractCapability, LedgerError> {
		self.capability
			.get_or_try_init(|| async {
				let code = hex_result(&self.request("eth_getCode", json!([self.grant_manager, "latest"])).await?)?;
				if code.is_empty() {
					return Err(LedgerError::Unsupported(format!("no contract deployed at {}", self.grant_manager)))
				}
				let capability = if bytecode_has_function(&code, "setPhase(uint8)") {
					ContractCapability::VersionedPhase
				} else {
					ContractCapability::Legacy
				};
				info!("GrantManager at {} is {}", self.grant_manager, capability);
				Ok(capability)
			})
			.await
			.copied()
	}

	async fn get_phase(&self) -> Result<Phase, LedgerError> {
		let capability = self.capability().await?;
		let output = self.call(&self.grant_manager, abi::encode_call("getCurrentPhase()", &[])).await?;
		decode_phase(&output, capability)
	}

	async fn set_phase(&self, phase: Phase) -> Result<Option<TxHash>, LedgerError> {
		match self.capability().await? {
			ContractCapability::VersionedPhase => {
				let data = abi::encode_call("setPhase(uint8)", &[Token::Uint(phase.index() as u128)]);
				Ok(Some(self.send_transaction(&self.grant_manager, data).await?))
			},
			ContractCapability::Legacy => {
				let current = self.get_phase().await?;
				if !legacy_transition(current, phase)? {
					return Ok(None)
				}
				let data = abi::encode_call("advancePhase()", &[]);
				Ok(Some(self.send_transaction(&self.grant_manager, data).await?))
			},
		}
	}

	async fn has_voted(&self, voter: &str) -> Result<bool, LedgerError> {
		let data = abi::encode_call("hasVoted(address)", &[Token::Address(abi::parse_address(voter)?)]);
		Ok(self.call_single(&self.voting, data, ParamType::Bool).await?.into_bool()?)
	}

	async fn vote(&self, proposal_id: u64) -> Result<TxHash, LedgerError> {
		let data = abi::encode_call("vote(uint256)", &[Token::Uint(proposal_id as u128)]);
		self.send_transaction(&self.voting, data).await
	}

	async fn vote_count(&self, proposal_id: u64) -> Result<u64, LedgerError> {
		let data = abi::encode_call("getVoteCount(uint256)", &[Token::Uint(proposal_id as u128)]);
		Ok(self.call_single(&self.voting, data, ParamType::Uint).await?.into_u64()?)
	}

	async fn proposal_vote_count(&self, proposal_id: u64) -> Result<u64, LedgerError> {
		let data = abi::encode_call("proposals(uint256)", &[Token::Uint(proposal_id as u128)]);
		let values = self.call_decode(&self.voting, data, &proposal_members()).await?;
		Ok(into_proposal(values)?.vote_count)
	}

	async fn all_proposals(&self) -> Result<Vec<LedgerProposal>, LedgerError> {
		let data = abi::encode_call("getAllProposals()", &[]);
		let list = ParamType::Array(Box::new(ParamType::Tuple(proposal_members())));
		self.call_single(&self.voting, data, list)
			.await?
			.into_members()?
			.into_iter()
			.map(|proposal| into_proposal(proposal.into_members()?))
			.collect()
	}

	async fn winner(&self) -> Result<LedgerWinner, LedgerError> {
		let data = abi::encode_call("getWinner()", &[]);
		let values =
			self.call_decode(&self.voting, data, &[ParamType::Uint, ParamType::String, ParamType::Address]).await?;
		let mut values = values.into_iter();
		let mut next = || values.next().ok_or_else(|| abi::AbiError::Unexpected("short winner tuple".into()));
		Ok(LedgerWinner { id: next()?.into_u64()?, title: next()?.into_string()?, proposer: next()?.into_address()? })
	}

	async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus, LedgerError> {
		let receipt = self.request("eth_getTransactionReceipt", json!([tx_hash])).await?;
		if receipt.is_null() {
			let tx = self.request("eth_getTransactionByHash", json!([tx_hash])).await?;
			return Ok(if tx.is_null() { TxStatus::NotFound } else { TxStatus::Pending })
		}
		match receipt.get("status").map(quantity).transpose()? {
			Some(1) => Ok(TxStatus::Success),
			Some(_) => Ok(TxStatus::Failed),
			// Pre-byzantium receipts carry no status
			None => Ok(TxStatus::Success),
		}
	}
}
