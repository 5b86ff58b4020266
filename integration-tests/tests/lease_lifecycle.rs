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

//! Integration tests for the lease lifecycle between client and server.

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use integration_tests::{
    LossyRelay, RecordingRouteInstaller, RelayPolicy, RouteEvent, TestServer, exchange,
    loopback_config,
};
use table_allocator_client::{
    driver::{ClientError, ClientOutcome, LeaseClient},
    session::{SessionConfig, SessionError},
};
use table_allocator_proto::{AddressFamily, Command, LeaseKey, Request, Status};
use table_allocator_server::runtime::BootClock;
use table_allocator_utils::task_handler::CancelTaskSet;
use table_manager::store::MemoryLeaseStore;
use test_log::test;
use tokio_util::sync::CancellationToken;

fn key(tag: &str) -> LeaseKey {
    LeaseKey::new(AddressFamily::Inet, "192.0.2.1", "eth0", tag)
}

fn fast_session() -> SessionConfig {
    SessionConfig {
        retransmit_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

#[test(tokio::test)]
async fn client_leases_renews_and_releases() {
    let mut config = loopback_config(100, 4);
    config.lease_timeout_secs = 2;
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    let mut relay_tasks = CancelTaskSet::new();
    let relay = LossyRelay::start(server.addr, RelayPolicy::default(), &mut relay_tasks)
        .await
        .expect("no fail");

    let installer = RecordingRouteInstaller::default();
    let client = LeaseClient::new(
        relay.addr,
        key("a"),
        fast_session(),
        Arc::new(installer.clone()),
    )
    .expect("no fail");
    let cancel = CancellationToken::new();
    let client_cancel = cancel.clone();
    let client_task = tokio::spawn(async move { client.run(client_cancel).await });

    assert_eq!(installer.wait_for_install().await, 100);

    // A 2s lease is renewed after 1s.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(
        relay
            .stats
            .requests
            .load(std::sync::atomic::Ordering::SeqCst)
            >= 2
    );

    cancel.cancel();
    let outcome = client_task.await.expect("no panic").expect("no fail");
    assert_eq!(
        outcome,
        ClientOutcome {
            released: true,
            table: Some(100),
        }
    );
    assert_eq!(
        installer.events(),
        vec![
            RouteEvent::Install(100, key("a")),
            RouteEvent::Remove(100, key("a")),
        ]
    );

    // The released table is handed out again.
    let response = exchange(server.addr, &Request::new(1, Command::Request, &key("b"))).await;
    assert_eq!(response.table, Some(100));

    drop(relay_tasks);
    server.stop().await;
}

#[test(tokio::test)]
async fn exhausted_pool_fails_the_session() {
    let config = loopback_config(100, 2);
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    for (seq, tag) in [(1, "a"), (2, "b")] {
        let response = exchange(server.addr, &Request::new(seq, Command::Request, &key(tag))).await;
        assert_eq!(response.status, Status::Ok);
    }

    let installer = RecordingRouteInstaller::default();
    let client = LeaseClient::new(
        server.addr,
        key("c"),
        fast_session(),
        Arc::new(installer.clone()),
    )
    .expect("no fail");
    assert_matches!(
        client.run(CancellationToken::new()).await,
        Err(ClientError::Session(SessionError::Rejected(
            Status::PoolExhausted
        )))
    );
    assert!(installer.events().is_empty());

    // Retrying an allocated key still renews its lease.
    let response = exchange(server.addr, &Request::new(3, Command::Request, &key("a"))).await;
    assert_eq!(response.table, Some(100));

    server.stop().await;
}

#[test(tokio::test)]
async fn unsupported_family_fails_the_session() {
    let mut config = loopback_config(100, 2);
    config.families = vec![AddressFamily::Inet];
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    let client = LeaseClient::new(
        server.addr,
        LeaseKey::new(AddressFamily::Inet6, "2001:db8::1", "eth0", ""),
        fast_session(),
        Arc::new(RecordingRouteInstaller::default()),
    )
    .expect("no fail");
    assert_matches!(
        client.run(CancellationToken::new()).await,
        Err(ClientError::Session(SessionError::Rejected(
            Status::UnsupportedFamily
        )))
    );

    server.stop().await;
}

#[test(tokio::test)]
async fn release_command_frees_the_table() {
    let config = loopback_config(100, 2);
    let server = TestServer::start(&config, MemoryLeaseStore::new(), BootClock).await;

    let response = exchange(server.addr, &Request::new(1, Command::Request, &key("a"))).await;
    assert_eq!(response.table, Some(100));

    let client = LeaseClient::new(
        server.addr,
        key("a"),
        fast_session(),
        Arc::new(RecordingRouteInstaller::default()),
    )
    .expect("no fail");
    assert!(client.release_only().await.expect("no fail").released);

    let response = exchange(server.addr, &Request::new(2, Command::Request, &key("b"))).await;
    assert_eq!(response.table, Some(100));

    server.stop().await;
}
