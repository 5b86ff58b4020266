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
//! Table allocator client CLI options.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use table_allocator_proto::{AddressFamily, LeaseKey};

use crate::{
    route::DEFAULT_RULE_PRIORITY,
    session::{DEFAULT_MAX_FAILURES, DEFAULT_MAX_RELEASE_FAILURES, SessionConfig},
};

/// Table allocator client
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log client output to stderr.
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    pub stderr: bool,

    /// Directory for the client log.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Lease a table and keep it until interrupted.
    Request {
        /// Lease identity.
        #[command(flatten)]
        lease: LeaseArgs,

        /// How to route traffic through the leased table.
        #[arg(long, value_enum, default_value_t = RouteMode::Log)]
        route_mode: RouteMode,

        /// Priority of the installed policy routing rule.
        #[arg(long, default_value_t = DEFAULT_RULE_PRIORITY)]
        rule_priority: u32,
    },
    /// Release a previously leased table.
    Release {
        /// Lease identity.
        #[command(flatten)]
        lease: LeaseArgs,
    },
}

/// How to route traffic through the leased table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RouteMode {
    /// Only log route changes.
    Log,
    /// Add `ip rule` policy routing rules.
    IpRule,
}

/// Identity of the lease and session options.
#[derive(Debug, Args)]
pub struct LeaseArgs {
    /// Address of the table allocator server.
    #[arg(long, default_value = "127.0.0.1:7653")]
    pub server: SocketAddr,

    /// Address family (unspec, inet, inet6).
    #[arg(long, default_value = "inet")]
    pub family: AddressFamily,

    /// Address the table is leased for.
    #[arg(long, default_value = "")]
    pub address: String,

    /// Interface the table is leased for.
    #[arg(long)]
    pub ifname: String,

    /// Tag distinguishing multiple leases on one interface.
    #[arg(long, default_value = "")]
    pub tag: String,

    /// Retransmission interval in milliseconds.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    pub retransmit_ms: u64,

    /// Unanswered transmissions after which a request fails.
    #[arg(long, default_value_t = DEFAULT_MAX_FAILURES, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_failures: u32,
}

impl LeaseArgs {
    /// The lease key.
    pub fn lease_key(&self) -> LeaseKey {
        LeaseKey::new(
            self.family,
            self.address.clone(),
            self.ifname.clone(),
            self.tag.clone(),
        )
    }

    /// The session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retransmit_interval: Duration::from_millis(self.retransmit_ms),
            max_failures: self.max_failures,
            max_release_failures: DEFAULT_MAX_RELEASE_FAILURES.min(self.max_failures),
        }
    }
}
