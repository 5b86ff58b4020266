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
//! Routing table lease management.
//!
//! The [TableManager] composes the [TablePool] and a [LeaseStore] into idempotent allocate,
//! renew and release operations. The store is the source of truth: whenever a store operation
//! fails, the pool is left in (or restored to) a state that is consistent with what the store
//! still contains.

use std::{collections::BTreeSet, time::Duration};

use thiserror::Error;

use crate::{
    allocator::{TablePool, TablePoolError},
    key::{AddressFamily, LeaseKey},
    store::{Lease, LeaseStore, StoreError},
};

/// Default lease duration.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(600);

/// Table manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableManagerConfig {
    /// Smallest table id handed out.
    pub table_offset: u32,
    /// Number of table ids per address family.
    pub table_count: u32,
    /// Duration of a lease.
    pub lease_timeout: Duration,
    /// Address families served.
    pub families: Vec<AddressFamily>,
}

impl TableManagerConfig {
    /// Creates a configuration serving all address families with the default lease timeout.
    pub fn new(table_offset: u32, table_count: u32) -> Self {
        Self {
            table_offset,
            table_count,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            families: AddressFamily::ALL.to_vec(),
        }
    }

    /// Set the lease timeout.
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Set the served address families.
    pub fn with_families(mut self, families: Vec<AddressFamily>) -> Self {
        self.families = families;
        self
    }

    /// Checks that the configuration describes a usable pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_count == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.table_offset.checked_add(self.table_count - 1).is_none() {
            return Err(ConfigError::RangeOverflow {
                offset: self.table_offset,
                count: self.table_count,
            });
        }
        if self.families.is_empty() {
            return Err(ConfigError::NoFamilies);
        }
        if self.lease_timeout.as_secs() == 0 {
            return Err(ConfigError::LeaseTimeoutTooShort(self.lease_timeout));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The pool has no tables.
    #[error("table count must be larger than zero")]
    EmptyPool,
    /// The last table id does not fit into 32 bits.
    #[error("table range starting at {offset} with {count} tables exceeds the table id space")]
    RangeOverflow {
        /// First table id.
        offset: u32,
        /// Number of tables.
        count: u32,
    },
    /// No address family configured.
    #[error("at least one address family must be served")]
    NoFamilies,
    /// Lease timeout below one second.
    #[error("lease timeout {0:?} is shorter than one second")]
    LeaseTimeoutTooShort(Duration),
}

/// Errors while creating a [TableManager].
#[derive(Debug, Error)]
pub enum TableManagerCreationError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Reconciling the pool with the lease store failed.
    #[error("recovering leases failed: {0}")]
    Recovery(#[from] StoreError),
}

/// Allocation errors.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The address family is not served.
    #[error("address family {0} is not served")]
    UnsupportedFamily(AddressFamily),
    /// No free table left.
    #[error("no free table for address family {0}")]
    PoolExhausted(AddressFamily),
    /// The lease store failed.
    #[error("lease store failed: {0}")]
    PersistenceFailed(#[source] StoreError),
}

impl From<TablePoolError> for AllocationError {
    fn from(err: TablePoolError) -> Self {
        match err {
            TablePoolError::UnsupportedFamily(family) => AllocationError::UnsupportedFamily(family),
            TablePoolError::Exhausted(family) => AllocationError::PoolExhausted(family),
        }
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Leased routing table.
    pub table: u32,
    /// Expiry of the lease.
    pub expires_at: u64,
    /// `true` if an existing lease was refreshed.
    pub renewed: bool,
}

/// Summary of the startup reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Leases whose tables were marked busy.
    pub restored: usize,
    /// Expired leases removed from the store.
    pub expired: usize,
    /// Leases removed because another lease already held their table.
    pub conflicting: usize,
    /// Leases removed because they expire further ahead than one lease timeout, which only
    /// happens when the clock restarted, e.g. after a reboot.
    pub stale: usize,
    /// Leases kept in the store that the pool does not track, because their family is not
    /// served or their table lies outside the configured range.
    pub untracked: usize,
}

/// Manages routing table leases.
#[derive(Debug)]
pub struct TableManager<S> {
    config: TableManagerConfig,
    pool: TablePool,
    store: S,
    last_recovery: RecoveryReport,
}

impl<S: LeaseStore> TableManager<S> {
    /// Creates a table manager and reconciles the pool with the leases in `store`.
    ///
    /// Expired leases are removed and every remaining lease marks its table busy before the
    /// manager is returned, so no request can be served from a pool that disagrees with the store.
    pub fn new(
        config: TableManagerConfig,
        store: S,
        now: u64,
    ) -> Result<Self, TableManagerCreationError> {
        config.validate()?;
        let pool = TablePool::new(
            config.table_offset,
            config.table_count,
            config.families.iter().copied(),
        );
        let mut manager = Self {
            config,
            pool,
            store,
            last_recovery: RecoveryReport::default(),
        };
        manager.last_recovery = manager.recover(now)?;
        Ok(manager)
    }

    fn recover(&mut self, now: u64) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport {
            expired: self.store.remove_expired(now, &mut |key, lease| {
                tracing::debug!(%key, table=lease.table, "Dropped lease that expired while stopped");
            })?,
            ..Default::default()
        };

        let latest_expiry = now.saturating_add(self.config.lease_timeout.as_secs());
        let mut conflicting = Vec::new();
        let mut stale = Vec::new();
        for (key, lease) in self.store.leases()? {
            if lease.expires_at > latest_expiry {
                tracing::warn!(%key, table=lease.table, expires_at=lease.expires_at, "Lease from an earlier clock epoch, dropping lease");
                stale.push(key);
            } else if !self.pool.contains(key.family, lease.table) {
                tracing::warn!(%key, table=lease.table, "Lease outside of the served pools, leaving it to expire");
                report.untracked += 1;
            } else if self.pool.set(key.family, lease.table) {
                report.restored += 1;
            } else {
                tracing::warn!(%key, table=lease.table, "Table already leased to another client, dropping lease");
                conflicting.push(key);
            }
        }

        for key in conflicting {
            self.store.delete(&key)?;
            report.conflicting += 1;
        }
        for key in stale {
            self.store.delete(&key)?;
            report.stale += 1;
        }

        tracing::info!(
            restored = report.restored,
            expired = report.expired,
            conflicting = report.conflicting,
            untracked = report.untracked,
            stale = report.stale,
            "Recovered leases"
        );
        Ok(report)
    }

    /// Allocates a table for `key` or renews its existing lease.
    ///
    /// A key that already holds a lease gets the same table back with a refreshed expiry, unless
    /// the table is no longer part of the pool. Such a key is moved to a table inside the pool.
    pub fn handle_allocate(&mut self, key: &LeaseKey, now: u64) -> Result<Grant, AllocationError> {
        if !self.pool.serves(key.family) {
            return Err(AllocationError::UnsupportedFamily(key.family));
        }

        let expires_at = now.saturating_add(self.config.lease_timeout.as_secs());

        let existing = self
            .store
            .lookup(key)
            .map_err(AllocationError::PersistenceFailed)?;

        if let Some(existing) = existing.filter(|lease| {
            let in_pool = self.pool.contains(key.family, lease.table);
            if !in_pool {
                tracing::info!(%key, table=lease.table, "Leased table left the pool, moving lease");
            }
            in_pool
        }) {
            // The bit can only be free here if reconciliation missed this lease.
            if self.pool.set(key.family, existing.table) {
                tracing::warn!(%key, table=existing.table, "Leased table was marked free, reclaimed it");
            }

            self.store
                .upsert(
                    key,
                    Lease {
                        table: existing.table,
                        expires_at,
                    },
                )
                .map_err(AllocationError::PersistenceFailed)?;

            tracing::info!(%key, table=existing.table, expires_at, "Renewed table lease");
            return Ok(Grant {
                table: existing.table,
                expires_at,
                renewed: true,
            });
        }

        // Replaces an out-of-pool lease of the same key, if any.
        let table = self.pool.allocate(key.family)?;

        if let Err(e) = self.store.upsert(key, Lease { table, expires_at }) {
            self.pool.release(key.family, table);
            tracing::error!(%key, table, error=%e, "Failed to persist lease, table returned to pool");
            return Err(AllocationError::PersistenceFailed(e));
        }

        tracing::info!(%key, table, expires_at, "Allocated table");
        Ok(Grant {
            table,
            expires_at,
            renewed: false,
        })
    }

    /// Releases the lease of `key`.
    ///
    /// Releasing an unknown key succeeds, so duplicated or late release requests are harmless.
    /// Returns `true` if a lease was removed.
    pub fn handle_release(&mut self, key: &LeaseKey) -> Result<bool, AllocationError> {
        if !self.pool.serves(key.family) {
            return Err(AllocationError::UnsupportedFamily(key.family));
        }

        let Some(lease) = self
            .store
            .lookup(key)
            .map_err(AllocationError::PersistenceFailed)?
        else {
            tracing::debug!(%key, "Release for unknown lease");
            return Ok(false);
        };

        // The table stays busy if the delete fails: leaking it is better than handing it out
        // while the record may still exist.
        self.store
            .delete(key)
            .map_err(AllocationError::PersistenceFailed)?;

        if !self.pool.release(key.family, lease.table) && self.pool.contains(key.family, lease.table)
        {
            tracing::warn!(%key, table=lease.table, "Released table was already free");
        }
        tracing::info!(%key, table=lease.table, "Released table");
        Ok(true)
    }

    /// Removes all leases that have expired at `now` and returns their tables to the pool.
    ///
    /// Returns the number of removed leases.
    pub fn reap_expired(&mut self, now: u64) -> Result<usize, AllocationError> {
        let pool = &mut self.pool;
        self.store
            .remove_expired(now, &mut |key, lease| {
                if pool.release(key.family, lease.table) {
                    tracing::info!(%key, table=lease.table, "Released expired lease");
                } else if pool.contains(key.family, lease.table) {
                    tracing::warn!(%key, table=lease.table, "Expired lease referenced a free table");
                } else {
                    tracing::debug!(%key, table=lease.table, "Removed expired untracked lease");
                }
            })
            .map_err(AllocationError::PersistenceFailed)
    }

    /// The configuration of this manager.
    pub fn config(&self) -> &TableManagerConfig {
        &self.config
    }

    /// The table pool.
    pub fn pool(&self) -> &TablePool {
        &self.pool
    }

    /// Number of busy tables across all served families.
    ///
    /// Leases on tables outside the pool are not counted.
    pub fn busy_count(&self) -> usize {
        self.pool
            .families()
            .map(|family| (self.config.table_count - self.pool.free_count(family)) as usize)
            .sum()
    }

    /// The lease store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The outcome of the startup reconciliation.
    pub fn last_recovery(&self) -> RecoveryReport {
        self.last_recovery
    }

    /// Consumes the manager and returns the lease store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Checks that every busy table is referenced by exactly one lease and vice versa.
    ///
    /// Intended for tests and debugging, this reads the whole store.
    pub fn check_consistency(&self) -> Result<(), String> {
        let leases = self.store.leases().map_err(|e| e.to_string())?;
        for family in self.pool.families() {
            let mut leased = BTreeSet::new();
            for (key, lease) in leases.iter().filter(|(key, _)| key.family == family) {
                if !self.pool.contains(family, lease.table) {
                    continue;
                }
                if !leased.insert(lease.table) {
                    return Err(format!("table {} of {family} leased twice ({key})", lease.table));
                }
            }
            let busy: BTreeSet<u32> = self.pool.busy_tables(family).into_iter().collect();
            if busy != leased {
                return Err(format!(
                    "busy tables {busy:?} of {family} do not match leased tables {leased:?}"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::store::MemoryLeaseStore;

    /// Lease store wrapper that fails selected operations.
    #[derive(Debug, Default)]
    struct FaultyStore {
        inner: MemoryLeaseStore,
        fail_lookup: bool,
        fail_upsert: bool,
        fail_delete: bool,
    }

    fn injected() -> StoreError {
        StoreError::Io(std::io::Error::other("injected failure"))
    }

    impl LeaseStore for FaultyStore {
        fn lookup(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError> {
            if self.fail_lookup {
                return Err(injected());
            }
            self.inner.lookup(key)
        }

        fn upsert(&mut self, key: &LeaseKey, lease: Lease) -> Result<(), StoreError> {
            if self.fail_upsert {
                return Err(injected());
            }
            self.inner.upsert(key, lease)
        }

        fn delete(&mut self, key: &LeaseKey) -> Result<bool, StoreError> {
            if self.fail_delete {
                return Err(injected());
            }
            self.inner.delete(key)
        }

        fn remove_expired(
            &mut self,
            now: u64,
            on_removed: &mut dyn FnMut(&LeaseKey, &Lease),
        ) -> Result<usize, StoreError> {
            self.inner.remove_expired(now, on_removed)
        }

        fn leases(&self) -> Result<Vec<(LeaseKey, Lease)>, StoreError> {
            self.inner.leases()
        }
    }

    const LEASE_SECS: u64 = 600;

    fn config() -> TableManagerConfig {
        TableManagerConfig::new(100, 4)
            .with_lease_timeout(Duration::from_secs(LEASE_SECS))
            .with_families(vec![AddressFamily::Inet, AddressFamily::Inet6])
    }

    fn manager() -> TableManager<MemoryLeaseStore> {
        TableManager::new(config(), MemoryLeaseStore::new(), 0).expect("valid config")
    }

    fn faulty_manager() -> TableManager<FaultyStore> {
        TableManager::new(config(), FaultyStore::default(), 0).expect("valid config")
    }

    fn key(tag: &str) -> LeaseKey {
        LeaseKey::new(AddressFamily::Inet, "192.168.0.2", "eth0", tag)
    }

    fn key6(tag: &str) -> LeaseKey {
        LeaseKey::new(AddressFamily::Inet6, "2001:db8::2", "eth0", tag)
    }

    #[test]
    fn should_reuse_lowest_free_table_and_keep_renewed_table() {
        let mut manager = manager();

        assert_eq!(manager.handle_allocate(&key("a"), 0).unwrap().table, 100);
        assert_eq!(manager.handle_allocate(&key("b"), 0).unwrap().table, 101);
        assert!(manager.handle_release(&key("a")).unwrap());
        assert!(manager.pool().is_free(AddressFamily::Inet, 100));
        assert_eq!(manager.handle_allocate(&key("c"), 0).unwrap().table, 100);

        let renewed = manager.handle_allocate(&key("b"), 100).unwrap();
        assert_eq!(
            renewed,
            Grant {
                table: 101,
                expires_at: 100 + LEASE_SECS,
                renewed: true,
            }
        );
        manager.check_consistency().unwrap();
    }

    #[test]
    fn should_fail_when_pool_is_exhausted_without_mutation() {
        let mut manager = manager();
        for tag in ["a", "b", "c", "d"] {
            manager.handle_allocate(&key(tag), 0).unwrap();
        }
        let pool_before = manager.pool().clone();
        let store_before = manager.store().clone();

        assert_matches!(
            manager.handle_allocate(&key("e"), 0),
            Err(AllocationError::PoolExhausted(AddressFamily::Inet))
        );
        assert_eq!(manager.pool(), &pool_before);
        assert_eq!(manager.store(), &store_before);

        // Another family has its own pool.
        assert_eq!(manager.handle_allocate(&key6("e"), 0).unwrap().table, 100);
    }

    #[test]
    fn should_reject_unsupported_family_without_mutation() {
        let mut manager = manager();
        let unspec = LeaseKey::new(AddressFamily::Unspec, "", "eth0", "a");

        assert_matches!(
            manager.handle_allocate(&unspec, 0),
            Err(AllocationError::UnsupportedFamily(AddressFamily::Unspec))
        );
        assert_matches!(
            manager.handle_release(&unspec),
            Err(AllocationError::UnsupportedFamily(AddressFamily::Unspec))
        );
        assert!(manager.store().is_empty());
    }

    #[test]
    fn should_release_idempotently() {
        let mut manager = manager();
        manager.handle_allocate(&key("a"), 0).unwrap();
        manager.handle_allocate(&key("b"), 0).unwrap();

        assert!(manager.handle_release(&key("a")).unwrap());
        let pool_after_first = manager.pool().clone();
        assert!(!manager.handle_release(&key("a")).unwrap());
        assert_eq!(manager.pool(), &pool_after_first);

        assert!(!manager.handle_release(&key("never-allocated")).unwrap());
        assert_eq!(manager.pool(), &pool_after_first);
        manager.check_consistency().unwrap();
    }

    #[test_log::test]
    fn should_return_table_when_persisting_fails() {
        let mut manager = faulty_manager();
        manager.store.fail_upsert = true;

        assert_matches!(
            manager.handle_allocate(&key("a"), 0),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert_eq!(manager.pool().free_count(AddressFamily::Inet), 4);
        assert!(manager.pool().is_free(AddressFamily::Inet, 100));

        manager.store.fail_upsert = false;
        assert_eq!(manager.handle_allocate(&key("a"), 0).unwrap().table, 100);
    }

    #[test]
    fn should_keep_table_busy_when_delete_fails() {
        let mut manager = faulty_manager();
        manager.handle_allocate(&key("a"), 0).unwrap();
        manager.store.fail_delete = true;

        assert_matches!(
            manager.handle_release(&key("a")),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert!(!manager.pool().is_free(AddressFamily::Inet, 100));
        assert!(manager.store().inner.lookup(&key("a")).unwrap().is_some());

        manager.store.fail_delete = false;
        assert!(manager.handle_release(&key("a")).unwrap());
        assert!(manager.pool().is_free(AddressFamily::Inet, 100));
    }

    #[test]
    fn should_not_touch_pool_when_lookup_fails() {
        let mut manager = faulty_manager();
        manager.store.fail_lookup = true;
        let pool_before = manager.pool().clone();

        assert_matches!(
            manager.handle_allocate(&key("a"), 0),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert_matches!(
            manager.handle_release(&key("a")),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert_eq!(manager.pool(), &pool_before);
    }

    #[test]
    fn should_keep_table_when_renewal_persist_fails() {
        let mut manager = faulty_manager();
        manager.handle_allocate(&key("a"), 0).unwrap();
        manager.store.fail_upsert = true;

        assert_matches!(
            manager.handle_allocate(&key("a"), 10),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert!(!manager.pool().is_free(AddressFamily::Inet, 100));
        assert_eq!(
            manager.store().inner.lookup(&key("a")).unwrap(),
            Some(Lease {
                table: 100,
                expires_at: LEASE_SECS,
            })
        );
    }

    #[test]
    fn should_reap_expired_leases() {
        let mut manager = manager();
        manager.handle_allocate(&key("a"), 0).unwrap();
        manager.handle_allocate(&key("b"), 0).unwrap();
        manager.handle_release(&key("a")).unwrap();
        let grant = manager.handle_allocate(&key("c"), 10).unwrap();
        assert_eq!(grant.table, 100);

        // Only b has expired.
        assert_eq!(manager.reap_expired(LEASE_SECS).unwrap(), 1);
        assert!(manager.pool().is_free(AddressFamily::Inet, 101));
        assert!(!manager.pool().is_free(AddressFamily::Inet, 100));

        assert_eq!(manager.reap_expired(grant.expires_at + 1).unwrap(), 1);
        assert!(manager.pool().is_free(AddressFamily::Inet, 100));
        assert!(manager.store().lookup(&key("c")).unwrap().is_none());
        manager.check_consistency().unwrap();
    }

    #[test_log::test]
    fn should_restore_pool_from_store() {
        let lease = |table, expires_at| Lease { table, expires_at };
        let store: MemoryLeaseStore = [
            (key("a"), lease(102, 1000)),
            (key("b"), lease(100, 1000)),
            (key6("a"), lease(103, 1000)),
            // expired
            (key("c"), lease(101, 10)),
        ]
        .into_iter()
        .collect();

        let mut manager = TableManager::new(config(), store, 500).unwrap();
        assert_eq!(
            manager.last_recovery(),
            RecoveryReport {
                restored: 3,
                expired: 1,
                conflicting: 0,
                untracked: 0,
                stale: 0,
            }
        );
        assert_eq!(manager.pool().busy_tables(AddressFamily::Inet), vec![100, 102]);
        assert_eq!(manager.pool().busy_tables(AddressFamily::Inet6), vec![103]);
        assert!(manager.store().lookup(&key("c")).unwrap().is_none());
        manager.check_consistency().unwrap();

        assert_eq!(manager.handle_allocate(&key("c"), 500).unwrap().table, 101);
        assert_eq!(manager.handle_allocate(&key("b"), 500).unwrap().table, 100);
    }

    #[test_log::test]
    fn should_drop_conflicting_and_keep_untracked_leases() {
        let lease = |table| Lease {
            table,
            expires_at: 1000,
        };
        let unspec = LeaseKey::new(AddressFamily::Unspec, "", "eth1", "x");
        let store: MemoryLeaseStore = [
            (key("a"), lease(101)),
            (key("b"), lease(101)),
            (key("c"), lease(500)),
            (unspec.clone(), lease(100)),
        ]
        .into_iter()
        .collect();

        let manager = TableManager::new(config(), store, 500).unwrap();
        assert_eq!(
            manager.last_recovery(),
            RecoveryReport {
                restored: 1,
                expired: 0,
                conflicting: 1,
                untracked: 2,
                stale: 0,
            }
        );
        assert!(manager.store().lookup(&key("a")).unwrap().is_some());
        assert!(manager.store().lookup(&key("b")).unwrap().is_none());
        assert!(manager.store().lookup(&unspec).unwrap().is_some());
        manager.check_consistency().unwrap();
    }

    #[test_log::test]
    fn should_move_lease_on_table_outside_the_pool() {
        let store: MemoryLeaseStore = [(
            key("a"),
            Lease {
                table: 500,
                expires_at: 1000,
            },
        )]
        .into_iter()
        .collect();
        let mut manager = TableManager::new(config(), store, 900).unwrap();
        assert_eq!(manager.last_recovery().untracked, 1);

        let grant = manager.handle_allocate(&key("a"), 900).unwrap();
        assert_eq!(
            grant,
            Grant {
                table: 100,
                expires_at: 900 + LEASE_SECS,
                renewed: false,
            }
        );
        assert_eq!(
            manager.store().lookup(&key("a")).unwrap(),
            Some(Lease {
                table: 100,
                expires_at: 900 + LEASE_SECS,
            })
        );

        // Further renewals keep the table inside the pool.
        let renewed = manager.handle_allocate(&key("a"), 1000).unwrap();
        assert_eq!(renewed.table, 100);
        assert!(renewed.renewed);
        manager.check_consistency().unwrap();
    }

    #[test]
    fn should_keep_lease_outside_the_pool_when_moving_fails() {
        let mut inner = MemoryLeaseStore::new();
        inner
            .upsert(
                &key("a"),
                Lease {
                    table: 500,
                    expires_at: 1000,
                },
            )
            .unwrap();
        let store = FaultyStore {
            inner,
            ..Default::default()
        };
        let mut manager = TableManager::new(config(), store, 900).unwrap();
        manager.store.fail_upsert = true;

        assert_matches!(
            manager.handle_allocate(&key("a"), 900),
            Err(AllocationError::PersistenceFailed(_))
        );
        assert_eq!(manager.pool().free_count(AddressFamily::Inet), 4);
        // The old lease is left to expire.
        assert_eq!(manager.reap_expired(1000).unwrap(), 1);
        assert!(manager.store().lookup(&key("a")).unwrap().is_none());
    }

    #[test_log::test]
    fn should_drop_leases_from_an_earlier_clock_epoch() {
        let lease = |table, expires_at| Lease { table, expires_at };
        // Written before a reboot, when the clock was far ahead of its current reading.
        let store: MemoryLeaseStore = [
            (key("a"), lease(100, 86_400)),
            (key("b"), lease(101, 50 + LEASE_SECS)),
        ]
        .into_iter()
        .collect();

        let mut manager = TableManager::new(config(), store, 50).unwrap();
        assert_eq!(
            manager.last_recovery(),
            RecoveryReport {
                restored: 1,
                expired: 0,
                conflicting: 0,
                untracked: 0,
                stale: 1,
            }
        );
        assert!(manager.store().lookup(&key("a")).unwrap().is_none());
        assert_eq!(manager.handle_allocate(&key("c"), 50).unwrap().table, 100);
        manager.check_consistency().unwrap();
    }

    #[test]
    fn should_reject_invalid_config() {
        let cases = [
            (TableManagerConfig::new(0, 0), ConfigError::EmptyPool),
            (
                TableManagerConfig::new(u32::MAX, 2),
                ConfigError::RangeOverflow {
                    offset: u32::MAX,
                    count: 2,
                },
            ),
            (
                TableManagerConfig::new(1, 1).with_families(vec![]),
                ConfigError::NoFamilies,
            ),
            (
                TableManagerConfig::new(1, 1).with_lease_timeout(Duration::from_millis(10)),
                ConfigError::LeaseTimeoutTooShort(Duration::from_millis(10)),
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected));
        }
        assert!(TableManagerConfig::new(u32::MAX, 1).validate().is_ok());
    }

    #[test]
    fn random_operations_never_share_a_table() {
        let mut rng = StdRng::seed_from_u64(42);
        let config = TableManagerConfig::new(1000, 30)
            .with_lease_timeout(Duration::from_secs(50))
            .with_families(AddressFamily::ALL.to_vec());
        let mut manager = TableManager::new(config, MemoryLeaseStore::new(), 0).unwrap();

        let keys: Vec<LeaseKey> = (0..120)
            .map(|i| {
                let family = AddressFamily::ALL[i % 3];
                LeaseKey::new(family, format!("10.0.{}.{}", i / 256, i % 256), "eth0", "")
            })
            .collect();

        let mut now = 0;
        for _ in 0..5000 {
            let key = &keys[rng.random_range(0..keys.len())];
            match rng.random_range(0..10) {
                0..=5 => {
                    let before = manager.store().lookup(key).unwrap();
                    match manager.handle_allocate(key, now) {
                        Ok(grant) => {
                            if let Some(before) = before {
                                assert_eq!(before.table, grant.table, "renewal changed the table");
                            }
                        }
                        Err(AllocationError::PoolExhausted(_)) => assert!(before.is_none()),
                        Err(e) => panic!("unexpected error {e}"),
                    }
                }
                6..=8 => {
                    manager.handle_release(key).unwrap();
                }
                _ => {
                    now += rng.random_range(0..20);
                    manager.reap_expired(now).unwrap();
                }
            }
            manager.check_consistency().unwrap();
        }
    }
}
