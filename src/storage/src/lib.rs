// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Multitenant table virtualization in front of a DynamoDB-modeled backing
//! store.
//!
//! Tenants each see a private namespace of virtual tables; this crate
//! multiplexes all of them onto a small fixed set of shared physical tables.
//! Keys are tenant-prefixed on the way down, request expressions and index
//! names are rewritten to their physical forms, and results are mapped back
//! to the tenant's view on the way up.
//!
//! The entry point is [`mux::TableMux`]; the mapping engine underneath lives
//! in [`mapping`].

pub mod descriptions;
pub mod error;
mod expression;
pub mod mapping;
pub mod mux;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use mux::{MuxOptions, TableMux};
