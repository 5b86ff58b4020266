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
//! Route installation for leased tables.

use std::process::ExitStatus;

use table_allocator_proto::{AddressFamily, LeaseKey};
use thiserror::Error;
use tokio::process::Command;

/// Default priority of the policy routing rules.
pub const DEFAULT_RULE_PRIORITY: u32 = 10000;

/// Route installation errors.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// Command line.
        command: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The command failed.
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        /// Command line.
        command: String,
        /// Exit status.
        status: ExitStatus,
        /// Standard error output.
        stderr: String,
    },
}

/// Installs and removes routes for leased tables.
#[async_trait::async_trait]
pub trait RouteInstaller: Send + Sync {
    /// Routes traffic of `key` through `table`.
    async fn install(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError>;

    /// Removes the route of `key` through `table`.
    async fn remove(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError>;
}

/// Installer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRouteInstaller;

#[async_trait::async_trait]
impl RouteInstaller for LoggingRouteInstaller {
    async fn install(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        tracing::info!(table, %key, "Install route");
        Ok(())
    }

    async fn remove(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        tracing::info!(table, %key, "Remove route");
        Ok(())
    }
}

/// Installer that adds a policy routing rule with `ip rule`.
///
/// Concrete families get a rule for the source address. [AddressFamily::Unspec] leases get a
/// rule for the incoming interface.
#[derive(Debug, Clone)]
pub struct IpRuleInstaller {
    program: String,
    priority: u32,
}

impl IpRuleInstaller {
    /// Creates an installer adding rules with `priority`.
    pub fn new(priority: u32) -> Self {
        Self {
            program: "ip".to_string(),
            priority,
        }
    }

    /// Arguments of the `ip` invocation.
    pub fn args(&self, op: &str, table: u32, key: &LeaseKey) -> Vec<String> {
        let mut args = Vec::new();
        match key.family {
            AddressFamily::Inet => args.push("-4".to_string()),
            AddressFamily::Inet6 => args.push("-6".to_string()),
            AddressFamily::Unspec => {}
        }
        args.extend(["rule".to_string(), op.to_string()]);
        match key.family {
            AddressFamily::Unspec => args.extend(["iif".to_string(), key.ifname.clone()]),
            _ => args.extend(["from".to_string(), key.address.clone()]),
        }
        args.extend([
            "lookup".to_string(),
            table.to_string(),
            "priority".to_string(),
            self.priority.to_string(),
        ]);
        args
    }

    async fn run(&self, op: &str, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        let args = self.args(op, table, key);
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "Running");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| {
                RouteError::Spawn {
                    command: command.clone(),
                    source,
                }
            })?;

        if !output.status.success() {
            return Err(RouteError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RouteInstaller for IpRuleInstaller {
    async fn install(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        self.run("add", table, key).await
    }

    async fn remove(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        self.run("del", table, key).await
    }
}
