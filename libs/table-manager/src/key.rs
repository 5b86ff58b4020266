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
//! Lease identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address family group a routing table is allocated for.
///
/// Each group has its own pool, so the same table id can be leased once per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Unspecified family, used for interface-wide tables.
    Unspec,
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

/// Numeric value of `AF_UNSPEC`.
pub const AF_UNSPEC: u8 = 0;
/// Numeric value of `AF_INET`.
pub const AF_INET: u8 = 2;
/// Numeric value of `AF_INET6`.
pub const AF_INET6: u8 = 10;

impl AddressFamily {
    /// All known families.
    pub const ALL: [AddressFamily; 3] = [
        AddressFamily::Unspec,
        AddressFamily::Inet,
        AddressFamily::Inet6,
    ];

    /// The numeric `AF_*` constant of this family.
    pub fn as_raw(self) -> u8 {
        match self {
            AddressFamily::Unspec => AF_UNSPEC,
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }
}

/// Unknown numeric address family.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown address family {0}")]
pub struct UnknownAddressFamily(pub u8);

impl TryFrom<u8> for AddressFamily {
    type Error = UnknownAddressFamily;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            AF_UNSPEC => Ok(AddressFamily::Unspec),
            AF_INET => Ok(AddressFamily::Inet),
            AF_INET6 => Ok(AddressFamily::Inet6),
            v => Err(UnknownAddressFamily(v)),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Unspec => write!(f, "unspec"),
            AddressFamily::Inet => write!(f, "inet"),
            AddressFamily::Inet6 => write!(f, "inet6"),
        }
    }
}

impl std::str::FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspec" => Ok(AddressFamily::Unspec),
            "inet" | "ipv4" | "4" => Ok(AddressFamily::Inet),
            "inet6" | "ipv6" | "6" => Ok(AddressFamily::Inet6),
            other => Err(format!("unknown address family '{other}'")),
        }
    }
}

/// Identity of a lease.
///
/// A repeated request with the same key resolves to the same table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    /// Address family group.
    pub family: AddressFamily,
    /// Address literal as sent by the client.
    pub address: String,
    /// Interface name.
    pub ifname: String,
    /// Opaque tag distinguishing multiple leases on one interface.
    pub tag: String,
}

impl LeaseKey {
    /// Creates a new lease key.
    pub fn new(
        family: AddressFamily,
        address: impl Into<String>,
        ifname: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            family,
            address: address.into(),
            ifname: ifname.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}#{}",
            self.family, self.address, self.ifname, self.tag
        )
    }
}
