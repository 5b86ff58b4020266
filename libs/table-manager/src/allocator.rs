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
//! A routing table allocator.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::key::AddressFamily;

mod bitmap;

pub use bitmap::{TableBitmap, WORD_BITS};

/// Pool of routing tables, one bitmap per configured address family.
///
/// The pool has no notion of leases or time. Keeping it consistent with the lease store is the
/// job of [crate::manager::TableManager].
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TablePool {
    pools: BTreeMap<AddressFamily, TableBitmap>,
}

/// Table pool errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TablePoolError {
    /// The family has no pool.
    #[error("address family {0} is not served")]
    UnsupportedFamily(AddressFamily),
    /// Every table of the family is in use.
    #[error("no free table for address family {0}")]
    Exhausted(AddressFamily),
}

impl TablePool {
    /// Creates a pool with `count` free tables starting at `offset` for each of `families`.
    pub fn new(offset: u32, count: u32, families: impl IntoIterator<Item = AddressFamily>) -> Self {
        let pools = families
            .into_iter()
            .map(|family| (family, TableBitmap::new(offset, count)))
            .collect();
        Self { pools }
    }

    /// Returns `true` if the pool serves `family`.
    pub fn serves(&self, family: AddressFamily) -> bool {
        self.pools.contains_key(&family)
    }

    /// Returns the families served by this pool.
    pub fn families(&self) -> impl Iterator<Item = AddressFamily> + '_ {
        self.pools.keys().copied()
    }

    /// Returns the bitmap of `family`.
    pub fn bitmap(&self, family: AddressFamily) -> Option<&TableBitmap> {
        self.pools.get(&family)
    }

    /// Takes the lowest free table of `family`.
    pub fn allocate(&mut self, family: AddressFamily) -> Result<u32, TablePoolError> {
        self.pools
            .get_mut(&family)
            .ok_or(TablePoolError::UnsupportedFamily(family))?
            .allocate()
            .ok_or(TablePoolError::Exhausted(family))
    }

    /// Returns `table` of `family` to the pool.
    ///
    /// Returns `true` if the table was busy. Unknown families and out of range tables are
    /// ignored.
    pub fn release(&mut self, family: AddressFamily, table: u32) -> bool {
        self.pools
            .get_mut(&family)
            .is_some_and(|bitmap| bitmap.release(table))
    }

    /// Marks `table` of `family` busy.
    ///
    /// Returns `true` if the table was free. Unknown families and out of range tables are
    /// ignored.
    pub fn set(&mut self, family: AddressFamily, table: u32) -> bool {
        self.pools
            .get_mut(&family)
            .is_some_and(|bitmap| bitmap.set(table))
    }

    /// Returns `true` if `table` of `family` is free.
    pub fn is_free(&self, family: AddressFamily, table: u32) -> bool {
        self.pools
            .get(&family)
            .is_some_and(|bitmap| bitmap.is_free(table))
    }

    /// Returns `true` if `table` lies within the range of the `family` pool.
    pub fn contains(&self, family: AddressFamily, table: u32) -> bool {
        self.pools
            .get(&family)
            .is_some_and(|bitmap| bitmap.contains(table))
    }

    /// Number of free tables of `family`.
    pub fn free_count(&self, family: AddressFamily) -> u32 {
        self.pools.get(&family).map_or(0, TableBitmap::free_count)
    }

    /// Busy tables of `family` in ascending order.
    pub fn busy_tables(&self, family: AddressFamily) -> Vec<u32> {
        self.pools
            .get(&family)
            .map(|bitmap| bitmap.busy().collect())
            .unwrap_or_default()
    }
}
