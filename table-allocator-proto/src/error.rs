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

//! Errors raised when encoding or decoding protocol messages.

/// Errors raised when a request field exceeds its length limit.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
#[error("{field} is {len} bytes long, at most {max} bytes are allowed")]
pub struct FieldTooLong {
    /// Name of the offending field.
    pub field: &'static str,
    /// Actual length.
    pub len: usize,
    /// Allowed length.
    pub max: usize,
}

/// Errors raised when failing to encode a message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A field is too long.
    #[error(transparent)]
    FieldTooLong(#[from] FieldTooLong),
    /// The encoded message does not fit into a datagram.
    #[error("encoded message of {0} bytes is too large")]
    MessageTooLarge(usize),
    /// Serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised when failing to decode a message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The datagram exceeds the maximum message size.
    #[error("datagram of {0} bytes is too large")]
    MessageTooLarge(usize),
    /// The datagram is not a valid message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A field is too long.
    #[error(transparent)]
    FieldTooLong(#[from] FieldTooLong),
}
