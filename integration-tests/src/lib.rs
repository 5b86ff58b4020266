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

//! Integration tests for the table allocator components
//!
//! This crate contains helpers for tests that run servers and clients together over loopback
//! UDP.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use table_allocator_client::route::{RouteError, RouteInstaller};
use table_allocator_proto::{LeaseKey, MAX_MESSAGE_SIZE, Request, Response};
use table_allocator_server::{
    config::ServerConfig,
    runtime::{Clock, ServerRuntime},
};
use table_allocator_utils::task_handler::CancelTaskSet;
use table_manager::store::LeaseStore;
use tokio::net::UdpSocket;

/// Server configuration listening on an ephemeral loopback port.
pub fn loopback_config(table_offset: u32, table_count: u32) -> ServerConfig {
    let mut config = ServerConfig::new(table_offset, table_count);
    config.listen_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    config
}

/// Test server with its own task set.
pub struct TestServer {
    /// Address the server listens on.
    pub addr: SocketAddr,
    /// Task set running the server.
    pub task_set: CancelTaskSet,
}

impl TestServer {
    /// Starts a server on `store` using `clock`.
    pub async fn start<S, C>(config: &ServerConfig, store: S, clock: C) -> Self
    where
        S: LeaseStore + Send + 'static,
        C: Clock,
    {
        let mut task_set = CancelTaskSet::new();
        let addr = ServerRuntime::start_with_clock(config, store, clock, &mut task_set)
            .await
            .expect("server should start");
        Self { addr, task_set }
    }

    /// Stops the server and waits until its task finished.
    pub async fn stop(mut self) {
        self.task_set.cancellation_token().cancel();
        self.task_set
            .join_all()
            .await
            .expect("server should stop cleanly");
    }
}

/// Sends `request` and waits for the matching response.
pub async fn exchange(server: SocketAddr, request: &Request) -> Response {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("no fail");
    socket.connect(server).await.expect("no fail");
    socket
        .send(&request.encode().expect("no fail"))
        .await
        .expect("no fail");

    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
            .await
            .expect("server should answer")
            .expect("no fail");
        let response = Response::decode(&buf[..n]).expect("no fail");
        if response.matches(request) {
            return response;
        }
    }
}

/// Datagram loss and duplication applied by a [LossyRelay].
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayPolicy {
    /// Number of requests to drop before forwarding.
    pub drop_requests: usize,
    /// Number of responses to drop before forwarding.
    pub drop_replies: usize,
    /// Forward every request twice.
    pub duplicate_requests: bool,
}

/// Counters of a [LossyRelay].
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Requests received from the client.
    pub requests: AtomicUsize,
    /// Responses received from the server.
    pub replies: AtomicUsize,
}

/// UDP relay between one client and a server that drops or duplicates datagrams.
pub struct LossyRelay {
    /// Address clients send to.
    pub addr: SocketAddr,
    /// Relay counters.
    pub stats: Arc<RelayStats>,
}

impl LossyRelay {
    /// Starts a relay to `server` on `task_set`.
    pub async fn start(
        server: SocketAddr,
        policy: RelayPolicy,
        task_set: &mut CancelTaskSet,
    ) -> std::io::Result<Self> {
        let downstream = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let upstream = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        upstream.connect(server).await?;
        let addr = downstream.local_addr()?;
        let stats = Arc::new(RelayStats::default());

        task_set.spawn_cancellable_task(relay(downstream, upstream, policy, stats.clone()));

        Ok(Self { addr, stats })
    }
}

async fn relay(
    downstream: UdpSocket,
    upstream: UdpSocket,
    mut policy: RelayPolicy,
    stats: Arc<RelayStats>,
) -> std::io::Result<()> {
    let mut client = None;
    let mut down_buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
    let mut up_buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
    loop {
        tokio::select! {
            received = downstream.recv_from(&mut down_buf) => {
                let (n, src) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::debug!(error=%e, "Relay failed to receive request");
                        continue;
                    }
                };
                client = Some(src);
                stats.requests.fetch_add(1, Ordering::SeqCst);
                if policy.drop_requests > 0 {
                    policy.drop_requests -= 1;
                    tracing::debug!("Relay dropped request");
                    continue;
                }
                upstream.send(&down_buf[..n]).await?;
                if policy.duplicate_requests {
                    upstream.send(&down_buf[..n]).await?;
                }
            }
            received = upstream.recv(&mut up_buf) => {
                let n = match received {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(error=%e, "Relay failed to receive reply");
                        continue;
                    }
                };
                stats.replies.fetch_add(1, Ordering::SeqCst);
                if policy.drop_replies > 0 {
                    policy.drop_replies -= 1;
                    tracing::debug!("Relay dropped reply");
                    continue;
                }
                if let Some(client) = client {
                    downstream.send_to(&up_buf[..n], client).await?;
                }
            }
        }
    }
}

/// Route change observed by a [RecordingRouteInstaller].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    /// A route was installed.
    Install(u32, LeaseKey),
    /// A route was removed.
    Remove(u32, LeaseKey),
}

/// Route installer that records every change.
#[derive(Debug, Clone, Default)]
pub struct RecordingRouteInstaller {
    events: Arc<Mutex<Vec<RouteEvent>>>,
}

impl RecordingRouteInstaller {
    /// Recorded events.
    pub fn events(&self) -> Vec<RouteEvent> {
        self.events.lock().expect("no fail").clone()
    }

    /// Waits until a route is installed and returns its table.
    pub async fn wait_for_install(&self) -> u32 {
        let wait = async {
            loop {
                let installed = self.events().iter().find_map(|event| {
                    match event {
                        RouteEvent::Install(table, _) => Some(*table),
                        RouteEvent::Remove(..) => None,
                    }
                });
                if let Some(table) = installed {
                    return table;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("route should be installed")
    }
}

#[async_trait::async_trait]
impl RouteInstaller for RecordingRouteInstaller {
    async fn install(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        self.events
            .lock()
            .expect("no fail")
            .push(RouteEvent::Install(table, key.clone()));
        Ok(())
    }

    async fn remove(&self, table: u32, key: &LeaseKey) -> Result<(), RouteError> {
        self.events
            .lock()
            .expect("no fail")
            .push(RouteEvent::Remove(table, key.clone()));
        Ok(())
    }
}
