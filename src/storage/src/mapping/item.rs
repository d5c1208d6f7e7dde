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

//! Whole-item translation between virtual and physical attribute layouts.

use std::sync::Arc;

use tablemux_common::context::TenantId;
use tablemux_common::types::Item;

use super::field::FieldMapper;
use super::table::{IndexMapping, TableMapping};
use crate::error::{StorageError, StorageResult};

/// Rewrites items: key attributes are renamed to their physical counterparts
/// and tenant-prefixed; everything else passes through unchanged.
#[derive(Clone)]
pub struct ItemMapper {
    mapping: Arc<TableMapping>,
}

impl ItemMapper {
    pub(crate) fn new(mapping: Arc<TableMapping>) -> Self {
        Self { mapping }
    }

    /// Virtual → physical. The table's own key attributes are required;
    /// index key attributes are mapped when present.
    pub fn apply(&self, tenant: &TenantId, item: &Item) -> StorageResult<Item> {
        for name in self.mapping.virtual_table().primary_key.attribute_names() {
            if !item.contains_key(name) {
                return Err(StorageError::invalid_argument(format!(
                    "item is missing key attribute `{}`",
                    name
                )));
            }
        }
        self.apply_present(tenant, item)
    }

    /// Virtual → physical for a resumption cursor: the target index's key
    /// attributes are required instead of the table's.
    pub fn apply_start_key(
        &self,
        tenant: &TenantId,
        index: &IndexMapping,
        key: &Item,
    ) -> StorageResult<Item> {
        for name in index.virtual_key_names() {
            if !key.contains_key(name) {
                return Err(StorageError::invalid_argument(format!(
                    "exclusive start key is missing key attribute `{}`",
                    name
                )));
            }
        }
        self.apply_present(tenant, key)
    }

    fn apply_present(&self, tenant: &TenantId, item: &Item) -> StorageResult<Item> {
        let mut out = Item::with_capacity(item.len());
        for (name, value) in item {
            match self.mapping.field_mappings(name) {
                Some(mappings) => {
                    // One virtual value may feed several physical attributes
                    // (the table key plus any index keys over the same field).
                    for mapping in mappings {
                        out.insert(
                            mapping.target.name.clone(),
                            FieldMapper::apply(tenant, mapping, value)?,
                        );
                    }
                }
                None => {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }

    /// Physical → virtual, verifying that every decoded prefix names
    /// `tenant`.
    pub fn reverse(&self, tenant: &TenantId, item: &Item) -> StorageResult<Item> {
        self.reverse_inner(Some(tenant), item)
    }

    /// Physical → virtual without the tenant check. Only used to hand an
    /// opaque physical scan cursor back to the caller, where the cursor row
    /// may legitimately belong to another tenant.
    pub fn reverse_lenient(&self, item: &Item) -> StorageResult<Item> {
        self.reverse_inner(None, item)
    }

    fn reverse_inner(&self, tenant: Option<&TenantId>, item: &Item) -> StorageResult<Item> {
        let mut out = Item::with_capacity(item.len());
        for (name, value) in item {
            match self.mapping.reverse_mapping(name) {
                Some(reversed) => {
                    out.insert(
                        reversed.target.name.clone(),
                        FieldMapper::reverse(tenant, reversed, value)?,
                    );
                }
                None => {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }
}

/// [`ItemMapper`] restricted to the table's primary key attributes. Used for
/// `BatchGetItem` keys, where anything beyond the key is malformed.
#[derive(Clone)]
pub struct KeyMapper {
    mapping: Arc<TableMapping>,
}

impl KeyMapper {
    pub(crate) fn new(mapping: Arc<TableMapping>) -> Self {
        Self { mapping }
    }

    pub fn apply_key(&self, tenant: &TenantId, key: &Item) -> StorageResult<Item> {
        let primary = self.mapping.primary_index();
        let expected = 1 + primary.range.iter().count();
        if key.len() != expected {
            return Err(StorageError::invalid_argument(format!(
                "key must contain exactly the key attributes, got {} attributes",
                key.len()
            )));
        }
        let mut out = Item::with_capacity(expected);
        for mapping in std::iter::once(&primary.hash).chain(primary.range.iter()) {
            let value = key.get(&mapping.source.name).ok_or_else(|| {
                StorageError::invalid_argument(format!(
                    "key is missing attribute `{}`",
                    mapping.source.name
                ))
            })?;
            out.insert(
                mapping.target.name.clone(),
                FieldMapper::apply(tenant, mapping, value)?,
            );
        }
        Ok(out)
    }

    pub fn reverse_key(&self, tenant: &TenantId, key: &Item) -> StorageResult<Item> {
        let primary = self.mapping.primary_index();
        let mut out = Item::with_capacity(key.len());
        for mapping in std::iter::once(&primary.hash).chain(primary.range.iter()) {
            let value = key.get(&mapping.target.name).ok_or_else(|| {
                StorageError::internal(format!(
                    "physical key is missing attribute `{}`",
                    mapping.target.name
                ))
            })?;
            out.insert(
                mapping.source.name.clone(),
                FieldMapper::reverse(Some(tenant), &mapping.reversed(), value)?,
            );
        }
        Ok(out)
    }
}
