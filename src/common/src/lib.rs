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

//! Shared data model for the tablemux virtualization layer.
//!
//! This crate holds everything the mapping engine and its collaborators agree
//! on: attribute values and scalar kinds, the virtual and physical table
//! catalog, tenant identity and the tenant-context provider, composite stream
//! ARNs, and the injectable clock.

pub mod arn;
pub mod catalog;
pub mod context;
pub mod types;
pub mod util;
