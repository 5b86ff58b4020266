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

//! Integration tests for server restarts with a durable lease store.

use std::fs;

use integration_tests::{TestServer, exchange, loopback_config};
use table_allocator_proto::{AddressFamily, Command, LeaseKey, Request, Status};
use table_allocator_server::runtime::ManualClock;
use table_allocator_utils::io::get_tmp_path;
use table_manager::store::FileLeaseStore;
use test_log::test;

fn key(tag: &str) -> LeaseKey {
    LeaseKey::new(AddressFamily::Inet, "198.51.100.1", "eth0", tag)
}

async fn request(server: &TestServer, seq: u32, tag: &str) -> (Option<u32>, Option<u64>) {
    let response = exchange(server.addr, &Request::new(seq, Command::Request, &key(tag))).await;
    assert_eq!(response.status, Status::Ok);
    (response.table, response.lease_secs)
}

#[test(tokio::test)]
async fn leases_survive_restart() {
    let path = get_tmp_path("leases_survive_restart.json");
    let _ = fs::remove_file(&path);
    let mut config = loopback_config(100, 4);
    config.lease_timeout_secs = 600;
    let clock = ManualClock::new(1000);

    let server = TestServer::start(
        &config,
        FileLeaseStore::open(&path).expect("no fail"),
        clock.clone(),
    )
    .await;
    assert_eq!(request(&server, 1, "a").await, (Some(100), Some(600)));
    assert_eq!(request(&server, 2, "b").await, (Some(101), Some(600)));
    let release = exchange(server.addr, &Request::new(3, Command::Release, &key("b"))).await;
    assert_eq!(release.status, Status::Ok);
    server.stop().await;

    // The restarted server knows that table 100 is leased.
    clock.set(1100);
    let server = TestServer::start(
        &config,
        FileLeaseStore::open(&path).expect("no fail"),
        clock.clone(),
    )
    .await;
    assert_eq!(request(&server, 4, "c").await, (Some(101), Some(600)));
    assert_eq!(request(&server, 5, "a").await, (Some(100), Some(600)));
    server.stop().await;

    // Leases that expired while the server was down are dropped on startup.
    clock.set(1700);
    let server = TestServer::start(
        &config,
        FileLeaseStore::open(&path).expect("no fail"),
        clock.clone(),
    )
    .await;
    assert_eq!(request(&server, 6, "d").await, (Some(100), Some(600)));
    server.stop().await;

    fs::remove_file(&path).expect("no fail");
}
