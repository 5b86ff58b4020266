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
//! Lease storage.
//!
//! The [LeaseStore] is the source of truth for outstanding leases. The in-memory table pool is
//! rebuilt from it on startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::LeaseKey;

pub mod dto;
mod file;

pub use file::FileLeaseStore;

/// A leased table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The leased routing table.
    pub table: u32,
    /// Expiry in seconds, in the time domain of the caller.
    pub expires_at: u64,
}

impl Lease {
    /// Returns `true` if the lease has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Lease store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("lease store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The backing storage contains inconsistent data.
    #[error("lease store is corrupt: {0}")]
    Corrupt(String),
}

/// Durable key to lease mapping.
///
/// All operations must be idempotent: repeating a call with identical arguments yields the same
/// stored state. An operation that returns an error must leave the stored state unchanged.
pub trait LeaseStore {
    /// Looks up the lease of `key`.
    fn lookup(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError>;

    /// Creates or refreshes the lease of `key`.
    fn upsert(&mut self, key: &LeaseKey, lease: Lease) -> Result<(), StoreError>;

    /// Deletes the lease of `key`.
    ///
    /// Returns `false` if there was no lease.
    fn delete(&mut self, key: &LeaseKey) -> Result<bool, StoreError>;

    /// Removes every lease that has expired at `now` and calls `on_removed` once for each of
    /// them after the removal is durable.
    ///
    /// Returns the number of removed leases.
    fn remove_expired(
        &mut self,
        now: u64,
        on_removed: &mut dyn FnMut(&LeaseKey, &Lease),
    ) -> Result<usize, StoreError>;

    /// Returns all stored leases.
    fn leases(&self) -> Result<Vec<(LeaseKey, Lease)>, StoreError>;
}

/// Volatile lease store.
///
/// Useful for tests and for servers that do not need to survive restarts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryLeaseStore {
    leases: BTreeMap<LeaseKey, Lease>,
}

impl MemoryLeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored leases.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Returns `true` if no lease is stored.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

impl FromIterator<(LeaseKey, Lease)> for MemoryLeaseStore {
    fn from_iter<T: IntoIterator<Item = (LeaseKey, Lease)>>(iter: T) -> Self {
        Self {
            leases: iter.into_iter().collect(),
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn lookup(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.get(key).copied())
    }

    fn upsert(&mut self, key: &LeaseKey, lease: Lease) -> Result<(), StoreError> {
        self.leases.insert(key.clone(), lease);
        Ok(())
    }

    fn delete(&mut self, key: &LeaseKey) -> Result<bool, StoreError> {
        Ok(self.leases.remove(key).is_some())
    }

    fn remove_expired(
        &mut self,
        now: u64,
        on_removed: &mut dyn FnMut(&LeaseKey, &Lease),
    ) -> Result<usize, StoreError> {
        let expired = take_expired(&mut self.leases, now);
        for (key, lease) in &expired {
            on_removed(key, lease);
        }
        Ok(expired.len())
    }

    fn leases(&self) -> Result<Vec<(LeaseKey, Lease)>, StoreError> {
        Ok(self
            .leases
            .iter()
            .map(|(key, lease)| (key.clone(), *lease))
            .collect())
    }
}

/// Removes and returns all leases that have expired at `now`.
pub(crate) fn take_expired(
    leases: &mut BTreeMap<LeaseKey, Lease>,
    now: u64,
) -> Vec<(LeaseKey, Lease)> {
    let expired: Vec<_> = leases
        .iter()
        .filter(|(_, lease)| lease.is_expired(now))
        .map(|(key, lease)| (key.clone(), *lease))
        .collect();
    for (key, _) in &expired {
        leases.remove(key);
    }
    expired
}
