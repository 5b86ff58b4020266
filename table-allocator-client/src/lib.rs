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
//! # Table allocator client
//!
//! Leases a routing table from a table allocator server, installs a route through it and keeps
//! the lease alive until shut down.
//!
//! The protocol logic lives in the I/O free [session::LeaseSession]. [driver::LeaseClient] runs a
//! session over UDP and applies its route actions through a [route::RouteInstaller].

pub mod cli;
pub mod driver;
pub mod route;
pub mod session;
pub mod timer;
