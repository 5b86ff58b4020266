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
//! Server configuration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use table_allocator_utils::io::read_json;
use table_manager::{
    key::AddressFamily,
    manager::{ConfigError, DEFAULT_LEASE_TIMEOUT, TableManagerConfig},
};
use thiserror::Error;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 7653;
/// Default interval between two reaper runs.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Server configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to receive requests on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Smallest table id handed out.
    pub table_offset: u32,
    /// Number of tables per address family.
    pub table_count: u32,
    /// Lease duration in seconds.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Seconds between two reaper runs.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Served address families.
    #[serde(default = "default_families")]
    pub families: Vec<AddressFamily>,
    /// Lease database. Leases are kept in memory only if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT.as_secs()
}

fn default_reap_interval_secs() -> u64 {
    DEFAULT_REAP_INTERVAL.as_secs()
}

fn default_families() -> Vec<AddressFamily> {
    AddressFamily::ALL.to_vec()
}

impl ServerConfig {
    /// Creates a configuration with default values for everything but the table range.
    pub fn new(table_offset: u32, table_count: u32) -> Self {
        Self {
            listen_addr: default_listen_addr(),
            table_offset,
            table_count,
            lease_timeout_secs: default_lease_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            families: default_families(),
            db_path: None,
        }
    }

    /// Loads the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        read_json(path)
            .map_err(|source| {
                ConfigLoadError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            })?
            .ok_or_else(|| ConfigLoadError::NotFound(path.to_path_buf()))
    }

    /// Interval between two reaper runs, at least one second.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    /// The table manager configuration.
    pub fn table_manager_config(&self) -> Result<TableManagerConfig, ConfigError> {
        let mut families = self.families.clone();
        families.sort();
        families.dedup();

        let config = TableManagerConfig::new(self.table_offset, self.table_count)
            .with_lease_timeout(Duration::from_secs(self.lease_timeout_secs))
            .with_families(families);
        config.validate()?;
        Ok(config)
    }
}

/// Errors while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The file does not exist.
    #[error("config file {0} not found")]
    NotFound(PathBuf),
    /// The file cannot be read or parsed.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use table_allocator_utils::io::get_tmp_path;

    use super::*;

    #[test]
    fn applies_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"table_offset": 10000, "table_count": 256}"#)
                .expect("no fail");
        assert_eq!(config, ServerConfig::new(10000, 256));
        assert_eq!(config.reap_interval(), DEFAULT_REAP_INTERVAL);

        let manager_config = config.table_manager_config().expect("no fail");
        assert_eq!(manager_config.lease_timeout, DEFAULT_LEASE_TIMEOUT);
        assert_eq!(manager_config.families, AddressFamily::ALL.to_vec());
    }

    #[test]
    fn loads_config_file() {
        let path = get_tmp_path("server_config.json");
        fs::write(
            &path,
            r#"{
                "listen_addr": "[::1]:9999",
                "table_offset": 100,
                "table_count": 4,
                "lease_timeout_secs": 30,
                "reap_interval_secs": 0,
                "families": ["inet6", "inet", "inet6"],
                "db_path": "/var/lib/table-allocator/leases.json"
            }"#,
        )
        .expect("no fail");

        let config = ServerConfig::load(&path).expect("no fail");
        assert_eq!(config.listen_addr, "[::1]:9999".parse().expect("no fail"));
        assert_eq!(config.reap_interval(), Duration::from_secs(1));
        assert_eq!(
            config.db_path.as_deref(),
            Some(Path::new("/var/lib/table-allocator/leases.json"))
        );
        assert_eq!(
            config.table_manager_config().expect("no fail").families,
            vec![AddressFamily::Inet, AddressFamily::Inet6]
        );

        fs::remove_file(&path).expect("no fail");
    }

    #[test]
    fn reports_missing_and_invalid_files() {
        let path = get_tmp_path("missing_server_config.json");
        let _ = fs::remove_file(&path);
        assert_matches!(ServerConfig::load(&path), Err(ConfigLoadError::NotFound(_)));

        fs::write(&path, r#"{"table_offset": 1, "table_count": 1, "bogus": 1}"#)
            .expect("no fail");
        assert_matches!(ServerConfig::load(&path), Err(ConfigLoadError::Read { .. }));
        fs::remove_file(&path).expect("no fail");
    }

    #[test]
    fn rejects_invalid_table_range() {
        assert_eq!(
            ServerConfig::new(1, 0).table_manager_config(),
            Err(ConfigError::EmptyPool)
        );
    }
}
