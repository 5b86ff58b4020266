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

//! Integration tests for retransmissions over a lossy transport.

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use assert_matches::assert_matches;
use integration_tests::{
    LossyRelay, RecordingRouteInstaller, RelayPolicy, TestServer, exchange, loopback_config,
};
use table_allocator_client::{
    driver::{ClientError, LeaseClient},
    session::{SessionConfig, SessionError},
};
use table_allocator_proto::{AddressFamily, Command, LeaseKey, Request};
use table_allocator_server::runtime::BootClock;
use table_allocator_utils::task_handler::CancelTaskSet;
use table_manager::store::MemoryLeaseStore;
use test_log::test;
use tokio_util::sync::CancellationToken;

fn key(tag: &str) -> LeaseKey {
    LeaseKey::new(AddressFamily::Inet6, "2001:db8::7", "wwan0", tag)
}

#[test(tokio::test)]
async fn lost_and_duplicated_datagrams_yield_one_lease() {
    let config = loopback_config(100, 8);
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    let mut relay_tasks = CancelTaskSet::new();
    let policy = RelayPolicy {
        drop_requests: 1,
        drop_replies: 2,
        duplicate_requests: true,
    };
    let relay = LossyRelay::start(server.addr, policy, &mut relay_tasks)
        .await
        .expect("no fail");

    let installer = RecordingRouteInstaller::default();
    let client = LeaseClient::new(
        relay.addr,
        key("data"),
        SessionConfig {
            retransmit_interval: Duration::from_millis(100),
            ..Default::default()
        },
        Arc::new(installer.clone()),
    )
    .expect("no fail");
    let cancel = CancellationToken::new();
    let client_cancel = cancel.clone();
    let client_task = tokio::spawn(async move { client.run(client_cancel).await });

    assert_eq!(installer.wait_for_install().await, 100);
    // One dropped request, one request whose duplicated replies were dropped, one answered.
    assert!(relay.stats.requests.load(Ordering::SeqCst) >= 3);

    // Every retransmission hit the same lease.
    let response = exchange(server.addr, &Request::new(1, Command::Request, &key("other"))).await;
    assert_eq!(response.table, Some(101));

    cancel.cancel();
    let outcome = client_task.await.expect("no panic").expect("no fail");
    assert!(outcome.released);

    drop(relay_tasks);
    server.stop().await;
}

#[test(tokio::test)]
async fn unanswered_requests_stop_at_failure_limit() {
    let config = loopback_config(100, 8);
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    let mut relay_tasks = CancelTaskSet::new();
    let policy = RelayPolicy {
        drop_requests: usize::MAX,
        ..Default::default()
    };
    let relay = LossyRelay::start(server.addr, policy, &mut relay_tasks)
        .await
        .expect("no fail");

    let installer = RecordingRouteInstaller::default();
    let client = LeaseClient::new(
        relay.addr,
        key("data"),
        SessionConfig {
            retransmit_interval: Duration::from_millis(50),
            max_failures: 3,
            max_release_failures: 1,
        },
        Arc::new(installer.clone()),
    )
    .expect("no fail");

    assert_matches!(
        client.run(CancellationToken::new()).await,
        Err(ClientError::Session(SessionError::NoReply(3)))
    );
    assert_eq!(relay.stats.requests.load(Ordering::SeqCst), 3);
    assert!(installer.events().is_empty());

    drop(relay_tasks);
    server.stop().await;
}
