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

//! Selection of a physical table for a virtual schema, and the bundle of
//! field mappings that results.

use std::collections::HashMap;
use std::sync::Arc;

use tablemux_common::catalog::{
    KeyAttribute, PhysicalTableDesc, PrimaryKey, Projection, SecondaryIndex, TableSchema,
};
use tablemux_common::types::ScalarKind;

use super::condition::ConditionMapper;
use super::field::{FieldMapping, IndexType};
use super::item::{ItemMapper, KeyMapper};
use super::query::QueryAndScanMapper;
use crate::error::{StorageError, StorageResult};

/// The fixed, ordered set of physical tables available at startup.
///
/// Selection walks the list in order and picks the first compatible table, so
/// the choice is deterministic from the virtual schema alone.
#[derive(Debug, Clone)]
pub struct PhysicalTableCatalog {
    tables: Vec<PhysicalTableDesc>,
}

impl PhysicalTableCatalog {
    pub fn new(tables: Vec<PhysicalTableDesc>) -> StorageResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for table in &tables {
            if !seen.insert(table.name.clone()) {
                return Err(StorageError::invalid_argument(format!(
                    "duplicate physical table `{}`",
                    table.name
                )));
            }
            if table.primary_key.hash_key.kind == ScalarKind::N {
                return Err(StorageError::invalid_argument(format!(
                    "physical table `{}` has a numeric hash key; prefixed hash keys must be S or B",
                    table.name
                )));
            }
        }
        Ok(Self { tables })
    }

    /// The default shared tables, one per primary-key shape, string-keyed
    /// shapes first.
    pub fn standard() -> Self {
        let gsi = |name: &str, key: PrimaryKey| SecondaryIndex {
            name: name.to_owned(),
            key,
            projection: Projection::All,
        };
        let s = |name: &str| KeyAttribute::new(name, ScalarKind::S);
        let tables = vec![
            PhysicalTableDesc::new("mt_shared_s", PrimaryKey::hash_only(s("hk")))
                .with_secondary_index(gsi("gsi_s_1", PrimaryKey::hash_only(s("gsi1_hk"))))
                .with_secondary_index(gsi(
                    "gsi_s_s_1",
                    PrimaryKey::hash_and_range(s("gsi2_hk"), s("gsi2_rk")),
                )),
            PhysicalTableDesc::new(
                "mt_shared_s_s",
                PrimaryKey::hash_and_range(s("hk"), s("rk")),
            )
            .with_secondary_index(gsi("gsi_s_1", PrimaryKey::hash_only(s("gsi1_hk"))))
            .with_secondary_index(gsi(
                "gsi_s_s_1",
                PrimaryKey::hash_and_range(s("gsi2_hk"), s("gsi2_rk")),
            )),
            PhysicalTableDesc::new(
                "mt_shared_s_n",
                PrimaryKey::hash_and_range(s("hk"), KeyAttribute::new("rk", ScalarKind::N)),
            )
            .with_secondary_index(gsi(
                "gsi_s_n_1",
                PrimaryKey::hash_and_range(s("gsi1_hk"), KeyAttribute::new("gsi1_rk", ScalarKind::N)),
            )),
            PhysicalTableDesc::new(
                "mt_shared_s_b",
                PrimaryKey::hash_and_range(s("hk"), KeyAttribute::new("rk", ScalarKind::B)),
            ),
            PhysicalTableDesc::new(
                "mt_shared_b",
                PrimaryKey::hash_only(KeyAttribute::new("hk", ScalarKind::B)),
            ),
            PhysicalTableDesc::new(
                "mt_shared_b_b",
                PrimaryKey::hash_and_range(
                    KeyAttribute::new("hk", ScalarKind::B),
                    KeyAttribute::new("rk", ScalarKind::B),
                ),
            ),
        ];
        Self::new(tables).expect("standard catalog is well-formed")
    }

    pub fn tables(&self) -> &[PhysicalTableDesc] {
        &self.tables
    }

    /// First physical table whose signature is compatible with `schema`,
    /// together with the assignment of virtual secondary indexes to physical
    /// ones (by position, in declaration order).
    fn select(&self, schema: &TableSchema) -> StorageResult<(&PhysicalTableDesc, Vec<usize>)> {
        for table in &self.tables {
            if !key_compatible(&schema.primary_key, &table.primary_key) {
                continue;
            }
            if let Some(assignment) = assign_indexes(schema, table) {
                return Ok((table, assignment));
            }
        }
        Err(StorageError::NoPhysicalTable(schema.name.clone()))
    }
}

fn hash_compatible(virtual_kind: ScalarKind, physical_kind: ScalarKind) -> bool {
    match physical_kind {
        // Numeric virtual keys ride string columns via their canonical
        // decimal form.
        ScalarKind::S => matches!(virtual_kind, ScalarKind::S | ScalarKind::N),
        // Binary columns hold anything as UTF-8 bytes.
        ScalarKind::B => true,
        ScalarKind::N => false,
    }
}

fn key_compatible(virtual_key: &PrimaryKey, physical_key: &PrimaryKey) -> bool {
    if !hash_compatible(virtual_key.hash_key.kind, physical_key.hash_key.kind) {
        return false;
    }
    match (&virtual_key.range_key, &physical_key.range_key) {
        (None, None) => true,
        (Some(v), Some(p)) => v.kind == p.kind,
        _ => false,
    }
}

fn projection_compatible(virtual_proj: &Projection, physical_proj: &Projection) -> bool {
    matches!(physical_proj, Projection::All) || virtual_proj == physical_proj
}

/// Greedy in-order assignment of virtual secondary indexes onto unused
/// compatible physical ones. `None` when the table cannot host them all.
fn assign_indexes(schema: &TableSchema, table: &PhysicalTableDesc) -> Option<Vec<usize>> {
    let mut used = vec![false; table.secondary_indexes.len()];
    let mut assignment = Vec::with_capacity(schema.secondary_indexes.len());
    for virtual_index in &schema.secondary_indexes {
        let position = table.secondary_indexes.iter().enumerate().position(
            |(i, physical_index)| {
                !used[i]
                    && key_compatible(&virtual_index.key, &physical_index.key)
                    && projection_compatible(&virtual_index.projection, &physical_index.projection)
            },
        )?;
        used[position] = true;
        assignment.push(position);
    }
    Some(assignment)
}

/// Field mappings of one index (the table itself, or a secondary index).
#[derive(Debug, Clone)]
pub struct IndexMapping {
    /// `None` for the table's own primary key.
    pub virtual_name: Option<String>,
    pub physical_name: Option<String>,
    pub hash: FieldMapping,
    pub range: Option<FieldMapping>,
}

impl IndexMapping {
    /// Virtual names of this index's key attributes, hash first.
    pub fn virtual_key_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash.source.name.as_str())
            .chain(self.range.iter().map(|m| m.source.name.as_str()))
    }
}

/// The full mapping bundle for one virtual table: the chosen physical table
/// plus per-field and per-index mapping tables. Built once, then shared
/// immutably; tenants never appear here (the same virtual schema maps the
/// same way for everyone).
#[derive(Debug)]
pub struct TableMapping {
    virtual_table: TableSchema,
    physical_table: PhysicalTableDesc,
    /// Virtual field name → mappings using it, table key first.
    field_mappings: HashMap<String, Vec<FieldMapping>>,
    /// Physical field name → reversed mapping, for the read path.
    reverse_mappings: HashMap<String, FieldMapping>,
    primary: IndexMapping,
    /// Virtual secondary-index name → its mapping.
    indexes: HashMap<String, IndexMapping>,
}

impl TableMapping {
    pub fn virtual_table(&self) -> &TableSchema {
        &self.virtual_table
    }

    pub fn physical_table(&self) -> &PhysicalTableDesc {
        &self.physical_table
    }

    pub fn primary_index(&self) -> &IndexMapping {
        &self.primary
    }

    /// Resolves the target index of a query or scan: the primary key when no
    /// index is named, else the named virtual secondary index.
    pub fn index(&self, name: Option<&str>) -> StorageResult<&IndexMapping> {
        match name {
            None => Ok(&self.primary),
            Some(name) => self.indexes.get(name).ok_or_else(|| {
                StorageError::invalid_argument(format!(
                    "table `{}` has no index `{}`",
                    self.virtual_table.name, name
                ))
            }),
        }
    }

    /// All mappings of a virtual field, table key first.
    pub fn field_mappings(&self, virtual_name: &str) -> Option<&[FieldMapping]> {
        self.field_mappings.get(virtual_name).map(Vec::as_slice)
    }

    /// The mapping to use for a reference to `virtual_name` inside an
    /// expression: the index's own mapping when an index context applies,
    /// otherwise the field's first (table-key-first) mapping.
    pub fn field_mapping_in_context<'a>(
        &'a self,
        virtual_name: &str,
        index: Option<&'a IndexMapping>,
    ) -> Option<&'a FieldMapping> {
        if let Some(index) = index {
            if index.hash.source.name == virtual_name {
                return Some(&index.hash);
            }
            if let Some(range) = &index.range {
                if range.source.name == virtual_name {
                    return Some(range);
                }
            }
        }
        self.field_mappings
            .get(virtual_name)
            .and_then(|mappings| mappings.first())
    }

    /// The reversed mapping registered for a physical field name.
    pub fn reverse_mapping(&self, physical_name: &str) -> Option<&FieldMapping> {
        self.reverse_mappings.get(physical_name)
    }

    pub fn item_mapper(self: &Arc<Self>) -> ItemMapper {
        ItemMapper::new(self.clone())
    }

    pub fn key_mapper(self: &Arc<Self>) -> KeyMapper {
        KeyMapper::new(self.clone())
    }

    pub fn condition_mapper(self: &Arc<Self>) -> ConditionMapper {
        ConditionMapper::new(self.clone())
    }

    pub fn query_and_scan_mapper(self: &Arc<Self>) -> QueryAndScanMapper {
        QueryAndScanMapper::new(self.clone())
    }
}

/// Builds [`TableMapping`]s against a fixed catalog.
#[derive(Clone)]
pub struct TableMappingFactory {
    catalog: Arc<PhysicalTableCatalog>,
}

impl TableMappingFactory {
    pub fn new(catalog: PhysicalTableCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &PhysicalTableCatalog {
        &self.catalog
    }

    pub fn create_table_mapping(&self, schema: &TableSchema) -> StorageResult<TableMapping> {
        let (physical, assignment) = self.catalog.select(schema)?;

        let mut field_mappings: HashMap<String, Vec<FieldMapping>> = HashMap::new();
        let mut reverse_mappings = HashMap::new();
        let mut record = |mapping: &FieldMapping| {
            field_mappings
                .entry(mapping.source.name.clone())
                .or_default()
                .push(mapping.clone());
            reverse_mappings.insert(mapping.target.name.clone(), mapping.reversed());
        };

        let primary = build_index_mapping(
            &schema.primary_key,
            &physical.primary_key,
            // The table's own hash keys are qualified by the virtual table
            // name itself.
            &schema.name,
            &physical.name,
            None,
            IndexType::Table,
        );
        record(&primary.hash);
        if let Some(range) = &primary.range {
            record(range);
        }

        let mut indexes = HashMap::new();
        for (virtual_index, physical_position) in
            schema.secondary_indexes.iter().zip(assignment)
        {
            let physical_index = &physical.secondary_indexes[physical_position];
            let index_mapping = build_index_mapping(
                &virtual_index.key,
                &physical_index.key,
                &virtual_index.name,
                &physical_index.name,
                Some((&virtual_index.name, &physical_index.name)),
                IndexType::SecondaryIndex,
            );
            record(&index_mapping.hash);
            if let Some(range) = &index_mapping.range {
                record(range);
            }
            indexes.insert(virtual_index.name.clone(), index_mapping);
        }

        Ok(TableMapping {
            virtual_table: schema.clone(),
            physical_table: physical.clone(),
            field_mappings,
            reverse_mappings,
            primary,
            indexes,
        })
    }
}

fn build_index_mapping(
    virtual_key: &PrimaryKey,
    physical_key: &PrimaryKey,
    virtual_qualifier: &str,
    physical_qualifier: &str,
    names: Option<(&str, &str)>,
    index_type: IndexType,
) -> IndexMapping {
    let hash = FieldMapping {
        source: virtual_key.hash_key.clone(),
        target: physical_key.hash_key.clone(),
        virtual_index_name: virtual_qualifier.to_owned(),
        physical_index_name: physical_qualifier.to_owned(),
        index_type,
        context_aware: true,
    };
    let range = virtual_key.range_key.as_ref().map(|virtual_range| FieldMapping {
        source: virtual_range.clone(),
        target: physical_key
            .range_key
            .clone()
            .expect("range compatibility checked during selection"),
        virtual_index_name: virtual_qualifier.to_owned(),
        physical_index_name: physical_qualifier.to_owned(),
        index_type,
        context_aware: false,
    });
    IndexMapping {
        virtual_name: names.map(|(v, _)| v.to_owned()),
        physical_name: names.map(|(_, p)| p.to_owned()),
        hash,
        range,
    }
}
