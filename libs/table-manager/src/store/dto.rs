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
//! Data transfer objects (DTOs) for the lease store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    key::{AddressFamily, LeaseKey},
    store::{Lease, StoreError},
};

/// Current version of the on-disk lease document.
pub const LEASE_STORE_VERSION: u32 = 1;

/// On-disk lease document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaseStoreDto {
    /// Document version.
    pub version: u32,
    /// The outstanding leases.
    pub leases: Vec<LeaseEntryDto>,
}

/// A single lease.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaseEntryDto {
    /// Address family group.
    pub family: AddressFamily,
    /// Address literal.
    pub address: String,
    /// Interface name.
    pub ifname: String,
    /// Client tag.
    pub tag: String,
    /// Leased routing table.
    pub table: u32,
    /// Lease expiry in seconds.
    pub expires_at: u64,
}

impl From<&BTreeMap<LeaseKey, Lease>> for LeaseStoreDto {
    fn from(leases: &BTreeMap<LeaseKey, Lease>) -> Self {
        LeaseStoreDto {
            version: LEASE_STORE_VERSION,
            leases: leases
                .iter()
                .map(|(key, lease)| {
                    LeaseEntryDto {
                        family: key.family,
                        address: key.address.clone(),
                        ifname: key.ifname.clone(),
                        tag: key.tag.clone(),
                        table: lease.table,
                        expires_at: lease.expires_at,
                    }
                })
                .collect(),
        }
    }
}

impl TryFrom<LeaseStoreDto> for BTreeMap<LeaseKey, Lease> {
    type Error = StoreError;

    fn try_from(value: LeaseStoreDto) -> Result<Self, Self::Error> {
        if value.version != LEASE_STORE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported lease document version {}",
                value.version
            )));
        }

        let mut leases = BTreeMap::new();
        for entry in value.leases {
            let key = LeaseKey::new(entry.family, entry.address, entry.ifname, entry.tag);
            let lease = Lease {
                table: entry.table,
                expires_at: entry.expires_at,
            };
            if leases.insert(key.clone(), lease).is_some() {
                return Err(StoreError::Corrupt(format!("duplicate lease for {key}")));
            }
        }
        Ok(leases)
    }
}
