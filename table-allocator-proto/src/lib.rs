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
//! # Table allocator protocol
//!
//! Every exchange is a single [Request] datagram answered by a single [Response] datagram.
//! Messages are JSON objects and never exceed [MAX_MESSAGE_SIZE] bytes.
//!
//! The client picks a `seq` for every logical exchange and reuses it for retransmissions. The
//! server echoes `seq` and `command`, which lets the client discard stale replies.

pub mod error;
pub mod message;

pub use error::{DecodeError, EncodeError};
pub use message::{Command, Request, Response, Status};
pub use table_manager::key::{AddressFamily, LeaseKey, UnknownAddressFamily};

/// Maximum size of an encoded message in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024;
/// Maximum length of an address literal (`INET6_ADDRSTRLEN - 1`).
pub const MAX_ADDRESS_LEN: usize = 45;
/// Maximum length of an interface name (`IFNAMSIZ - 1`).
pub const MAX_IFNAME_LEN: usize = 15;
/// Maximum length of a client tag.
pub const MAX_TAG_LEN: usize = 127;
