// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Protocol messages.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use table_manager::key::{AddressFamily, LeaseKey, UnknownAddressFamily};

use crate::{
    MAX_ADDRESS_LEN, MAX_IFNAME_LEN, MAX_MESSAGE_SIZE, MAX_TAG_LEN,
    error::{DecodeError, EncodeError, FieldTooLong},
};

/// Request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Allocate a table or renew the lease of an allocated table.
    Request,
    /// Release a table.
    Release,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Request => write!(f, "REQUEST"),
            Command::Release => write!(f, "RELEASE"),
        }
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// The command succeeded.
    Ok,
    /// The server does not serve the requested address family.
    UnsupportedFamily,
    /// No free table is left.
    PoolExhausted,
    /// The server failed to persist the lease. Retrying may succeed.
    PersistenceFailed,
}

impl Status {
    /// Returns `true` if repeating the request may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Status::PersistenceFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::UnsupportedFamily => "UNSUPPORTED_FAMILY",
            Status::PoolExhausted => "POOL_EXHAUSTED",
            Status::PersistenceFailed => "PERSISTENCE_FAILED",
        };
        f.write_str(s)
    }
}

/// Client request.
///
/// The address family is carried as the raw `AF_*` number so that a server can answer requests
/// for families it does not know with [Status::UnsupportedFamily].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Exchange identifier, echoed by the server.
    pub seq: u32,
    /// Command.
    pub command: Command,
    /// Raw address family number.
    pub family: u8,
    /// Address literal.
    pub address: String,
    /// Interface name.
    pub ifname: String,
    /// Client tag.
    #[serde(default)]
    pub tag: String,
}

impl Request {
    /// Creates a request for `key`.
    pub fn new(seq: u32, command: Command, key: &LeaseKey) -> Self {
        Self {
            seq,
            command,
            family: key.family.as_raw(),
            address: key.address.clone(),
            ifname: key.ifname.clone(),
            tag: key.tag.clone(),
        }
    }

    /// The lease key identified by this request.
    pub fn lease_key(&self) -> Result<LeaseKey, UnknownAddressFamily> {
        Ok(LeaseKey::new(
            AddressFamily::try_from(self.family)?,
            self.address.clone(),
            self.ifname.clone(),
            self.tag.clone(),
        ))
    }

    /// Checks the field length limits.
    pub fn validate(&self) -> Result<(), FieldTooLong> {
        check_len("address", &self.address, MAX_ADDRESS_LEN)?;
        check_len("ifname", &self.ifname, MAX_IFNAME_LEN)?;
        check_len("tag", &self.tag, MAX_TAG_LEN)
    }

    /// Encodes the request into a datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        self.validate()?;
        encode(self)
    }

    /// Decodes a request from a datagram payload.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let request: Self = decode(buf)?;
        request.validate()?;
        Ok(request)
    }
}

/// Server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed exchange identifier.
    pub seq: u32,
    /// Echoed command.
    pub command: Command,
    /// Outcome.
    pub status: Status,
    /// Granted table, set for successful [Command::Request]s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<u32>,
    /// Remaining lease duration in seconds, set for successful [Command::Request]s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_secs: Option<u64>,
}

impl Response {
    /// Successful response to a [Command::Request].
    pub fn granted(request: &Request, table: u32, lease_secs: u64) -> Self {
        Self {
            seq: request.seq,
            command: request.command,
            status: Status::Ok,
            table: Some(table),
            lease_secs: Some(lease_secs),
        }
    }

    /// Response without a table, used for releases and failures.
    pub fn status(request: &Request, status: Status) -> Self {
        Self {
            seq: request.seq,
            command: request.command,
            status,
            table: None,
            lease_secs: None,
        }
    }

    /// Returns `true` if this response answers `request`.
    pub fn matches(&self, request: &Request) -> bool {
        self.seq == request.seq && self.command == request.command
    }

    /// Encodes the response into a datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Decodes a response from a datagram payload.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        decode(buf)
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), FieldTooLong> {
    if value.len() > max {
        return Err(FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, EncodeError> {
    let buf = serde_json::to_vec(msg)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(EncodeError::MessageTooLarge(buf.len()));
    }
    Ok(buf)
}

fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, DecodeError> {
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(DecodeError::MessageTooLarge(buf.len()));
    }
    Ok(serde_json::from_slice(buf)?)
}
