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

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use table_allocator_utils::io::{read_json, write_json_atomic};

use crate::{
    key::LeaseKey,
    store::{Lease, LeaseStore, StoreError, dto::LeaseStoreDto, take_expired},
};

/// Lease store persisted as a JSON document.
///
/// Every mutation rewrites the whole document atomically before it is acknowledged. If the write
/// fails, the in-memory copy is rolled back so that memory and disk never disagree.
#[derive(Debug)]
pub struct FileLeaseStore {
    path: PathBuf,
    leases: BTreeMap<LeaseKey, Lease>,
}

impl FileLeaseStore {
    /// Opens the store at `path`. A missing file is treated as an empty store and created on the
    /// first mutation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let leases = match read_json::<_, LeaseStoreDto>(&path)? {
            Some(dto) => dto.try_into()?,
            None => BTreeMap::new(),
        };
        tracing::debug!(path=%path.display(), leases=leases.len(), "Opened lease store");
        Ok(Self { path, leases })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &LeaseStoreDto::from(&self.leases))?;
        Ok(())
    }
}

impl LeaseStore for FileLeaseStore {
    fn lookup(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.get(key).copied())
    }

    fn upsert(&mut self, key: &LeaseKey, lease: Lease) -> Result<(), StoreError> {
        let previous = self.leases.insert(key.clone(), lease);
        if previous == Some(lease) {
            return Ok(());
        }

        if let Err(e) = self.persist() {
            match previous {
                Some(previous) => self.leases.insert(key.clone(), previous),
                None => self.leases.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, key: &LeaseKey) -> Result<bool, StoreError> {
        let Some(removed) = self.leases.remove(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist() {
            self.leases.insert(key.clone(), removed);
            return Err(e);
        }
        Ok(true)
    }

    fn remove_expired(
        &mut self,
        now: u64,
        on_removed: &mut dyn FnMut(&LeaseKey, &Lease),
    ) -> Result<usize, StoreError> {
        let expired = take_expired(&mut self.leases, now);
        if expired.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist() {
            self.leases.extend(expired);
            return Err(e);
        }

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
