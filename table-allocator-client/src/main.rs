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
//! Table allocator client binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use table_allocator_client::{
    cli::{Commands, Opts, RouteMode},
    driver::LeaseClient,
    route::{IpRuleInstaller, LoggingRouteInstaller, RouteInstaller},
};
use table_allocator_observability::setup_tracing;
use table_allocator_utils::task_handler::CancelTaskSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(opts.logging.log_dir.as_ref(), opts.logging.stderr)?;

    match opts.command {
        Commands::Request {
            lease,
            route_mode,
            rule_priority,
        } => {
            let installer: Arc<dyn RouteInstaller> = match route_mode {
                RouteMode::Log => Arc::new(LoggingRouteInstaller),
                RouteMode::IpRule => Arc::new(IpRuleInstaller::new(rule_priority)),
            };
            let client = LeaseClient::new(
                lease.server,
                lease.lease_key(),
                lease.session_config(),
                installer,
            )?;

            // Cancelled on SIGINT or SIGTERM.
            let task_set = CancelTaskSet::new_with_signal_handler();
            let outcome = client
                .run(task_set.cancellation_token())
                .await
                .context("lease session")?;
            tracing::info!(released = outcome.released, "Client stopped");
        }
        Commands::Release { lease } => {
            let client = LeaseClient::new(
                lease.server,
                lease.lease_key(),
                lease.session_config(),
                Arc::new(LoggingRouteInstaller),
            )?;
            let outcome = client.release_only().await.context("release")?;
            if !outcome.released {
                anyhow::bail!("server did not confirm the release");
            }
        }
    }
    Ok(())
}
