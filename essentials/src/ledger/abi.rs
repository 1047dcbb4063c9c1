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
//! Just enough of the Solidity ABI to talk to the GrantManager and Voting contracts.

use sp_core_hashing::keccak_256;
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
	#[error("return data too short: need {needed} bytes at offset {offset}, have {len}")]
	OutOfBounds { offset: usize, needed: usize, len: usize },
	#[error("integer does not fit in 128 bits")]
	Overflow,
	#[error("invalid address: {0}")]
	InvalidAddress(String),
	#[error("invalid hex data: {0}")]
	InvalidHex(String),
	#[error("unexpected value: {0}")]
	Unexpected(String),
}

/// First four bytes of the keccak hash of a canonical signature, e.g. `vote(uint256)`
pub fn selector(signature: &str) -> [u8; 4] {
	let hash = keccak_256(signature.as_bytes());
	[hash[0], hash[1], hash[2], hash[3]]
}

/// Call arguments, only static types are ever sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
	Uint(u128),
	Address([u8; 20]),
}

pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
	let mut data = Vec::with_capacity(4 + args.len() * WORD);
	data.extend_from_slice(&selector(signature));
	for arg in args {
		let mut word = [0u8; WORD];
		match arg {
			Token::Uint(value) => word[16..].copy_from_slice(&value.to_be_bytes()),
			Token::Address(address) => word[12..].copy_from_slice(address),
		}
		data.extend_from_slice(&word);
	}
	data
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
	Uint,
	Bool,
	Address,
	String,
	Tuple(Vec<ParamType>),
	Array(Box<ParamType>),
}

impl ParamType {
	fn is_dynamic(&self) -> bool {
		match self {
			ParamType::String | ParamType::Array(_) => true,
			ParamType::Tuple(members) => members.iter().any(ParamType::is_dynamic),
			_ => false,
		}
	}

	/// Bytes taken in the head of the enclosing sequence
	fn head_size(&self) -> usize {
		match self {
			ParamType::Tuple(members) if !self.is_dynamic() => members.iter().map(ParamType::head_size).sum(),
			_ => WORD,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
	Uint(u128),
	Bool(bool),
	Address([u8; 20]),
	String(String),
	Tuple(Vec<AbiValue>),
	Array(Vec<AbiValue>),
}

impl AbiValue {
	pub fn into_uint(self) -> Result<u128, AbiError> {
		match self {
			AbiValue::Uint(value) => Ok(value),
			other => Err(AbiError::Unexpected(format!("expected uint, got {:?}", other))),
		}
	}

	pub fn into_u64(self) -> Result<u64, AbiError> {
		u64::try_from(self.into_uint()?).map_err(|_| AbiError::Overflow)
	}

	pub fn into_bool(self) -> Result<bool, AbiError> {
		match self {
			AbiValue::Bool(value) => Ok(value),
			other => Err(AbiError::Unexpected(format!("expected bool, got {:?}", other))),
		}
	}

	pub fn into_string(self) -> Result<String, AbiError> {
		match self {
			AbiValue::String(value) => Ok(value),
			other => Err(AbiError::Unexpected(format!("expected string, got {:?}", other))),
		}
	}

	pub fn into_address(self) -> Result<String, AbiError> {
		match self {
			AbiValue::Address(address) => Ok(format_address(&address)),
			other => Err(AbiError::Unexpected(format!("expected address, got {:?}", other))),
		}
	}

	pub fn into_members(self) -> Result<Vec<AbiValue>, AbiError> {
		match self {
			AbiValue::Tuple(members) | AbiValue::Array(members) => Ok(members),
			other => Err(AbiError::Unexpected(format!("expected tuple or array, got {:?}", other))),
		}
	}
}

pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
	decode_sequence(types, data, 0)
}

/// `offset + needed`, offsets and lengths come from untrusted return data
fn end_of(data: &[u8], offset: usize, needed: usize) -> Result<usize, AbiError> {
	offset
		.checked_add(needed)
		.ok_or(AbiError::OutOfBounds { offset, needed, len: data.len() })
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
	data.get(offset..end_of(data, offset, WORD)?)
		.ok_or(AbiError::OutOfBounds { offset, needed: WORD, len: data.len() })
}

fn uint_at(data: &[u8], offset: usize) -> Result<u128, AbiError> {
	let word = word_at(data, offset)?;
	if word[..16].iter().any(|b| *b != 0) {
		return Err(AbiError::Overflow)
	}
	let mut bytes = [0u8; 16];
	bytes.copy_from_slice(&word[16..]);
	Ok(u128::from_be_bytes(bytes))
}

fn usize_at(data: &[u8], offset: usize) -> Result<usize, AbiError> {
	usize::try_from(uint_at(data, offset)?).map_err(|_| AbiError::Overflow)
}

fn decode_sequence(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<AbiValue>, AbiError> {
	let mut head = base;
	let mut values = Vec::with_capacity(types.len());
	for param in types {
		if param.is_dynamic() {
			let offset = usize_at(data, head)?;
			values.push(decode_at(param, data, end_of(data, base, offset)?)?);
		} else {
			values.push(decode_at(param, data, head)?);
		}
		head += param.head_size();
	}
	Ok(values)
}

fn decode_at(param: &ParamType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
	match param {
		ParamType::Uint => Ok(AbiValue::Uint(uint_at(data, offset)?)),
		ParamType::Bool => Ok(AbiValue::Bool(word_at(data, offset)?[WORD - 1] != 0)),
		ParamType::Address => {
			let mut address = [0u8; 20];
			address.copy_from_slice(&word_at(data, offset)?[12..]);
			Ok(AbiValue::Address(address))
		},
		ParamType::String => {
			let len = usize_at(data, offset)?;
			let start = end_of(data, offset, WORD)?;
			let bytes = data
				.get(start..end_of(data, start, len)?)
				.ok_or(AbiError::OutOfBounds { offset: start, needed: len, len: data.len() })?;
			Ok(AbiValue::String(String::from_utf8_lossy(bytes).into_owned()))
		},
		ParamType::Tuple(members) => Ok(AbiValue::Tuple(decode_sequence(members, data, offset)?)),
		ParamType::Array(inner) => {
			let len = usize_at(data, offset)?;
			let start = end_of(data, offset, WORD)?;
			let needed = len.saturating_mul(inner.head_size());
			if needed > data.len().saturating_sub(start) {
				return Err(AbiError::OutOfBounds { offset: start, needed, len: data.len() })
			}
			let types = vec![(**inner).clone(); len];
			Ok(AbiValue::Array(decode_sequence(&types, data, start)?))
		},
	}
}

/// Decodes the `Error(string)` payload of a revert, if that is what the data holds
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
	let payload = data.strip_prefix(&selector("Error(string)"))?;
	decode(&[ParamType::String], payload).ok()?.pop()?.into_string().ok()
}

pub fn parse_address(address: &str) -> Result<[u8; 20], AbiError> {
	let bytes = decode_hex(address).map_err(|_| AbiError::InvalidAddress(address.to_string()))?;
	bytes.try_into().map_err(|_| AbiError::InvalidAddress(address.to_string()))
}

pub fn format_address(address: &[u8; 20]) -> String {
	format!("0x{}", hex::encode(address))
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, AbiError> {
	let digits = value.strip_prefix("0x").unwrap_or(value);
	hex::decode(digits).map_err(|err| AbiError::InvalidHex(format!("{}: {}", value, err)))
}

pub fn encode_hex(data: &[u8]) -> String {
	format!("0x{}", hex::encode(data))
}
