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

//! Catalog types for virtual tables (as tenants see them) and the fixed
//! physical tables they are multiplexed onto.

use serde::{Deserialize, Serialize};

use crate::types::ScalarKind;

mod physical_table;

pub use physical_table::PhysicalTableDesc;

/// A key attribute: name plus declared scalar kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub kind: ScalarKind,
}

impl KeyAttribute {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A hash attribute and an optional range attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub hash_key: KeyAttribute,
    pub range_key: Option<KeyAttribute>,
}

impl PrimaryKey {
    pub fn hash_only(hash_key: KeyAttribute) -> Self {
        Self {
            hash_key,
            range_key: None,
        }
    }

    pub fn hash_and_range(hash_key: KeyAttribute, range_key: KeyAttribute) -> Self {
        Self {
            hash_key,
            range_key: Some(range_key),
        }
    }

    /// Names of the key attributes, hash first.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash_key.name.as_str())
            .chain(self.range_key.iter().map(|k| k.name.as_str()))
    }
}

/// Which non-key attributes a secondary index materializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// A secondary index of a virtual or physical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub name: String,
    pub key: PrimaryKey,
    pub projection: Projection,
}

/// The schema of a virtual table, owned by one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: PrimaryKey,
    /// Declaration order is meaningful: physical indexes are assigned to
    /// virtual indexes in this order.
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub stream_enabled: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            name: name.into(),
            primary_key,
            secondary_indexes: Vec::new(),
            stream_enabled: false,
        }
    }

    pub fn with_secondary_index(mut self, index: SecondaryIndex) -> Self {
        self.secondary_indexes.push(index);
        self
    }

    pub fn with_streams(mut self) -> Self {
        self.stream_enabled = true;
        self
    }

    pub fn secondary_index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.secondary_indexes.iter().find(|i| i.name == name)
    }
}

/// Lifecycle state reported by `DescribeTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Creating,
    Active,
    Deleting,
}

/// What the description repository knows about a virtual table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub schema: TableSchema,
    pub status: TableStatus,
    /// Composite stream ARN, present when streams are enabled. See
    /// [`crate::arn::StreamArn`].
    pub latest_stream_arn: Option<String>,
}

impl TableDescription {
    pub fn active(schema: TableSchema) -> Self {
        Self {
            schema,
            status: TableStatus::Active,
            latest_stream_arn: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.schema.name
    }
}
