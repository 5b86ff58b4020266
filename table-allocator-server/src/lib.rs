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
//! # Table allocator server
//!
//! Leases Linux policy routing tables to clients. Clients identify a lease by address family,
//! address, interface name and tag, and must renew it before it expires. Expired leases are
//! reaped periodically.

pub mod cli;
pub mod config;
pub mod runtime;
