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
//! Table allocator server binary.

use anyhow::Context;
use clap::Parser;
use table_allocator_observability::setup_tracing;
use table_allocator_server::{
    cli::{Commands, Opts},
    config::ServerConfig,
    runtime::ServerRuntime,
};
use table_allocator_utils::task_handler::CancelTaskSet;
use table_manager::store::{FileLeaseStore, MemoryLeaseStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(opts.logging.log_dir.as_ref(), opts.logging.stderr)?;

    match opts.command {
        Commands::Run {
            config,
            listen_addr,
            db_path,
        } => {
            let mut config = ServerConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(listen_addr) = listen_addr {
                config.listen_addr = listen_addr;
            }
            if db_path.is_some() {
                config.db_path = db_path;
            }
            run(config).await
        }
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let mut task_set = CancelTaskSet::new_with_signal_handler();

    match &config.db_path {
        Some(path) => {
            let store = FileLeaseStore::open(path)
                .with_context(|| format!("opening lease database {}", path.display()))?;
            ServerRuntime::start(&config, store, &mut task_set).await?;
        }
        None => {
            tracing::warn!("No lease database configured, leases are lost on restart");
            ServerRuntime::start(&config, MemoryLeaseStore::new(), &mut task_set).await?;
        }
    }

    task_set.join_all().await.context("server task failed")
}
