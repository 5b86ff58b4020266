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
//! Table allocator server runtime.
//!
//! A single task owns the socket, the [TableManager] and the reaper interval. Requests and reaper
//! runs are therefore handled strictly one after another.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use table_allocator_proto::{Command, MAX_MESSAGE_SIZE, Request, Response, Status};
use table_allocator_utils::task_handler::CancelTaskSet;
use table_manager::{
    manager::{AllocationError, ConfigError, TableManager, TableManagerCreationError},
    store::LeaseStore,
};
use thiserror::Error;
use tokio::{net::UdpSocket, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Source of the current time in seconds.
pub trait Clock: Send + 'static {
    /// Current time in seconds.
    fn now(&self) -> u64;
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const BOOT_CLOCK_ID: libc::clockid_t = libc::CLOCK_BOOTTIME;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const BOOT_CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Monotonic clock, seconds since boot.
///
/// Unaffected by wall clock steps and keeps counting while the process is stopped, so persisted
/// expiries stay valid across restarts. Suspended time is included on Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootClock;

impl Clock for BootClock {
    fn now(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec and the clock id is supported on this target.
        let rc = unsafe { libc::clock_gettime(BOOT_CLOCK_ID, &mut ts) };
        if rc != 0 {
            tracing::error!(error=%std::io::Error::last_os_error(), "Failed to read boot clock");
            return 0;
        }
        u64::try_from(ts.tv_sec).unwrap_or(0)
    }
}

/// Manually advanced clock, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    /// Creates a clock showing `now`.
    pub fn new(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    /// Sets the current time.
    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::Relaxed);
    }

    /// Advances the clock by `secs`.
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Server runtime error.
#[derive(Error, Debug)]
pub enum ServerRuntimeError {
    /// Invalid table configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Creating the table manager failed.
    #[error("failed to create table manager: {0}")]
    Manager(#[from] TableManagerCreationError),
    /// I/O error.
    #[error("i/o error {0}")]
    IoError(#[from] std::io::Error),
}

/// Handles decoded requests on behalf of the dispatch loop.
pub struct RequestHandler<S, C> {
    manager: TableManager<S>,
    clock: C,
}

impl<S: LeaseStore, C: Clock> RequestHandler<S, C> {
    /// Creates a request handler. Reconciles the table pool with `store`.
    pub fn new(config: &ServerConfig, store: S, clock: C) -> Result<Self, ServerRuntimeError> {
        let manager = TableManager::new(config.table_manager_config()?, store, clock.now())?;
        Ok(Self { manager, clock })
    }

    /// The table manager.
    pub fn manager(&self) -> &TableManager<S> {
        &self.manager
    }

    /// Handles a datagram and returns the response to send back.
    ///
    /// Malformed datagrams yield no response, as no sequence number can be echoed.
    pub fn handle_datagram(&mut self, buf: &[u8], src: SocketAddr) -> Option<Response> {
        match Request::decode(buf) {
            Ok(request) => Some(self.handle_request(&request)),
            Err(e) => {
                tracing::warn!(error=%e, %src, "Dropping malformed request");
                None
            }
        }
    }

    /// Handles a request. Every request yields exactly one response.
    pub fn handle_request(&mut self, request: &Request) -> Response {
        let key = match request.lease_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::info!(seq=request.seq, error=%e, "Rejecting request");
                return Response::status(request, Status::UnsupportedFamily);
            }
        };

        let now = self.clock.now();
        let result = match request.command {
            Command::Request => {
                self.manager.handle_allocate(&key, now).map(|grant| {
                    Response::granted(request, grant.table, grant.expires_at.saturating_sub(now))
                })
            }
            Command::Release => {
                self.manager
                    .handle_release(&key)
                    .map(|_| Response::status(request, Status::Ok))
            }
        };

        result.unwrap_or_else(|e| {
            match &e {
                AllocationError::PersistenceFailed(_) => {
                    tracing::error!(seq=request.seq, %key, error=%e, "Failed to handle request");
                }
                _ => tracing::info!(seq=request.seq, %key, error=%e, "Rejecting request"),
            }
            Response::status(request, status_of(&e))
        })
    }

    /// Reaps expired leases.
    pub fn reap(&mut self) {
        match self.manager.reap_expired(self.clock.now()) {
            Ok(0) => {}
            Ok(reaped) => tracing::info!(reaped, "Reaped expired leases"),
            Err(e) => tracing::error!(error=%e, "Failed to reap expired leases"),
        }
    }
}

fn status_of(err: &AllocationError) -> Status {
    match err {
        AllocationError::UnsupportedFamily(_) => Status::UnsupportedFamily,
        AllocationError::PoolExhausted(_) => Status::PoolExhausted,
        AllocationError::PersistenceFailed(_) => Status::PersistenceFailed,
    }
}

/// Table allocator server.
pub struct ServerRuntime<S, C> {
    socket: UdpSocket,
    handler: RequestHandler<S, C>,
    reap_interval: Duration,
}

impl<S> ServerRuntime<S, BootClock>
where
    S: LeaseStore + Send + 'static,
{
    /// Starts the server on `task_set` using the [BootClock].
    ///
    /// Returns the address the server is bound to.
    pub async fn start(
        config: &ServerConfig,
        store: S,
        task_set: &mut CancelTaskSet,
    ) -> Result<SocketAddr, ServerRuntimeError> {
        Self::start_with_clock(config, store, BootClock, task_set).await
    }
}

impl<S, C> ServerRuntime<S, C>
where
    S: LeaseStore + Send + 'static,
    C: Clock,
{
    /// Starts the server on `task_set` using `clock`.
    ///
    /// The lease store is reconciled before the socket is bound, so no request is served from a
    /// pool that disagrees with the store.
    pub async fn start_with_clock(
        config: &ServerConfig,
        store: S,
        clock: C,
        task_set: &mut CancelTaskSet,
    ) -> Result<SocketAddr, ServerRuntimeError> {
        let handler = RequestHandler::new(config, store, clock)?;
        let socket = UdpSocket::bind(config.listen_addr).await.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {e}", config.listen_addr),
            )
        })?;
        let local_addr = socket.local_addr()?;

        let runtime = Self {
            socket,
            handler,
            reap_interval: config.reap_interval(),
        };
        let token = task_set.cancellation_token();
        task_set.join_set.spawn(runtime.run(token));

        tracing::info!(%local_addr, "Table allocator server started");
        Ok(local_addr)
    }

    async fn run(mut self, token: CancellationToken) -> std::io::Result<()> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut reaper = tokio::time::interval(self.reap_interval);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        reaper.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Table allocator server shutting down");
                    return Ok(());
                }
                _ = reaper.tick() => self.handler.reap(),
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((size, src)) => self.dispatch(&buf[..size], src).await,
                        Err(e) => tracing::error!(error=%e, "Failed to receive request"),
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, buf: &[u8], src: SocketAddr) {
        let Some(response) = self.handler.handle_datagram(buf, src) else {
            return;
        };
        let raw = match response.encode() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error=%e, %src, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&raw, src).await {
            tracing::error!(error=%e, %src, seq=response.seq, "Failed to send response");
        }
    }
}
