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

use serde::{Deserialize, Serialize};

use super::{PrimaryKey, SecondaryIndex};

/// Descriptor of a physical table in the backing store.
///
/// Physical tables are provisioned out of band and shared by all tenants.
/// Their hash keys are always of kind `S` or `B` so that tenant-prefixed
/// values fit; the full set is fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalTableDesc {
    pub name: String,
    pub primary_key: PrimaryKey,
    /// Fixed secondary indexes, in the order virtual indexes are assigned to
    /// them.
    pub secondary_indexes: Vec<SecondaryIndex>,
    /// ARN of the table's change stream, when one is provisioned.
    pub stream_arn: Option<String>,
}

impl PhysicalTableDesc {
    pub fn new(name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            name: name.into(),
            primary_key,
            secondary_indexes: Vec::new(),
            stream_arn: None,
        }
    }

    pub fn with_secondary_index(mut self, index: SecondaryIndex) -> Self {
        self.secondary_indexes.push(index);
        self
    }

    pub fn with_stream_arn(mut self, arn: impl Into<String>) -> Self {
        self.stream_arn = Some(arn.into());
        self
    }

    pub fn secondary_index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.secondary_indexes.iter().find(|i| i.name == name)
    }
}
