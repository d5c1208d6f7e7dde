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

//! The table-description repository: persistence of virtual-table schemas.
//!
//! Production deployments back this with a durable store; the in-memory
//! implementation here serves tests and single-process embeddings.

use std::collections::HashMap;

use parking_lot::RwLock;
use tablemux_common::catalog::{TableDescription, TableSchema};
use tablemux_common::context::TenantId;

use crate::error::{StorageError, StorageResult};

/// Black-box repository of virtual-table schemas, keyed by tenant and table
/// name. Two tenants may own unrelated tables of the same name.
#[async_trait::async_trait]
pub trait TableDescriptionRepo: Send + Sync + 'static {
    async fn create_table(
        &self,
        tenant: &TenantId,
        schema: TableSchema,
    ) -> StorageResult<TableDescription>;

    async fn get_table_description(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> StorageResult<TableDescription>;

    /// Removes the schema and returns its last description.
    async fn delete_table(&self, tenant: &TenantId, name: &str)
        -> StorageResult<TableDescription>;
}

/// A process-local description repo.
#[derive(Default)]
pub struct InMemoryTableDescriptionRepo {
    tables: RwLock<HashMap<(TenantId, String), TableDescription>>,
}

impl InMemoryTableDescriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TableDescriptionRepo for InMemoryTableDescriptionRepo {
    async fn create_table(
        &self,
        tenant: &TenantId,
        schema: TableSchema,
    ) -> StorageResult<TableDescription> {
        let key = (tenant.clone(), schema.name.clone());
        let description = TableDescription::active(schema);
        let mut tables = self.tables.write();
        if tables.contains_key(&key) {
            return Err(StorageError::invalid_argument(format!(
                "table `{}` already exists for tenant `{}`",
                key.1, tenant
            )));
        }
        tables.insert(key, description.clone());
        Ok(description)
    }

    async fn get_table_description(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> StorageResult<TableDescription> {
        self.tables
            .read()
            .get(&(tenant.clone(), name.to_owned()))
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(name.to_owned()))
    }

    async fn delete_table(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> StorageResult<TableDescription> {
        self.tables
            .write()
            .remove(&(tenant.clone(), name.to_owned()))
            .ok_or_else(|| StorageError::TableNotFound(name.to_owned()))
    }
}
