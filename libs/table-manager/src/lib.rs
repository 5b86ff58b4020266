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
//! # Table Manager
//!
//! Manage a pool of Linux policy routing tables.
//!
//! The [manager::TableManager] allocates tables and associates each allocation with a
//! [key::LeaseKey]. A successful allocation results in a [manager::Grant] which has a limited
//! lifetime and must be renewed.
//!
//! The state of the table pool (which table to allocate next) is managed by
//! [allocator::TablePool]. Outstanding leases are persisted in a [store::LeaseStore].

pub mod allocator;
pub mod key;
pub mod manager;
pub mod store;
