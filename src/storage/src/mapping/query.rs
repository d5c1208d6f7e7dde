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

//! Whole-request rewriting for Query and Scan: index resolution, condition
//! and filter rewriting, cursor mapping, and the tenant-isolation filter
//! that keeps scans from seeing other tenants' rows.

use std::collections::HashSet;
use std::sync::Arc;

use tablemux_common::context::TenantId;
use tablemux_common::types::{AttributeValue, Item, ScalarKind};

use super::condition::{
    fresh_placeholder, fresh_value_placeholder, ConditionMapper, QueryRequestWrapper,
    ScanRequestWrapper,
};
use super::item::ItemMapper;
use super::prefix::{BinaryPrefixFunction, StringPrefixFunction};
use super::table::{IndexMapping, TableMapping};
use crate::error::{StorageError, StorageResult};
use crate::store::{ExpressionAttributeNames, QueryRequest, ScanRequest};

/// Restricts a virtual item to an index's key attributes; this is what a
/// tenant-visible `lastEvaluatedKey` looks like.
pub(crate) fn restrict_to_index_keys(index: &IndexMapping, item: &Item) -> StorageResult<Item> {
    let mut key = Item::new();
    for name in index.virtual_key_names() {
        let value = item.get(name).ok_or_else(|| {
            StorageError::internal(format!(
                "returned item is missing the key attribute `{}`",
                name
            ))
        })?;
        key.insert(name.to_owned(), value.clone());
    }
    Ok(key)
}

/// Rewrites Query and Scan requests into their physical form.
#[derive(Clone)]
pub struct QueryAndScanMapper {
    mapping: Arc<TableMapping>,
}

impl QueryAndScanMapper {
    pub(crate) fn new(mapping: Arc<TableMapping>) -> Self {
        Self { mapping }
    }

    pub fn apply_query(&self, tenant: &TenantId, request: &mut QueryRequest) -> StorageResult<()> {
        let index = self.mapping.index(request.index_name.as_deref())?.clone();

        ConditionMapper::new(self.mapping.clone()).apply(
            tenant,
            &mut QueryRequestWrapper(request),
            Some(&index),
        )?;

        if let Some(physical_name) = index.physical_name.clone() {
            request.index_name = Some(physical_name);
        }
        if let Some(start_key) = request.exclusive_start_key.take() {
            request.exclusive_start_key = Some(
                ItemMapper::new(self.mapping.clone())
                    .apply_start_key(tenant, &index, &start_key)?,
            );
        }
        Ok(())
    }

    pub fn apply_scan(&self, tenant: &TenantId, request: &mut ScanRequest) -> StorageResult<()> {
        let index = self.mapping.index(request.index_name.as_deref())?.clone();

        // Validate the projection against the *virtual* attribute names
        // before anything is rewritten.
        self.check_projection_covers_keys(request, &index)?;
        let original_names = request
            .expression_attribute_names
            .clone()
            .unwrap_or_default();

        ConditionMapper::new(self.mapping.clone()).apply(
            tenant,
            &mut ScanRequestWrapper(request),
            Some(&index),
        )?;
        self.rewrite_projection(tenant, request, &index, &original_names)?;
        self.add_tenant_filter(tenant, request, &index)?;

        if let Some(physical_name) = index.physical_name.clone() {
            request.index_name = Some(physical_name);
        }
        if let Some(start_key) = request.exclusive_start_key.take() {
            request.exclusive_start_key = Some(
                ItemMapper::new(self.mapping.clone())
                    .apply_start_key(tenant, &index, &start_key)?,
            );
        }
        Ok(())
    }

    /// A scan that narrows its output must still return the target index's
    /// key attributes, or no resumption cursor could be derived from the
    /// result items.
    ///
    /// The projection-expression check is a plain substring test over the
    /// expression text and its alias table, not a parser; an attribute whose
    /// name embeds the key name also passes.
    fn check_projection_covers_keys(
        &self,
        request: &ScanRequest,
        index: &IndexMapping,
    ) -> StorageResult<()> {
        let missing = |name: &str| {
            StorageError::invalid_argument(format!(
                "scan projection must include the key attribute `{}`",
                name
            ))
        };
        if let Some(attributes) = &request.attributes_to_get {
            for name in index.virtual_key_names() {
                if !attributes.iter().any(|a| a == name) {
                    return Err(missing(name));
                }
            }
        }
        if let Some(projection) = &request.projection_expression {
            let names = request.expression_attribute_names.as_ref();
            for name in index.virtual_key_names() {
                let direct = projection.contains(name);
                let via_alias = names.is_some_and(|map| {
                    map.iter()
                        .any(|(placeholder, attr)| attr == name && projection.contains(placeholder))
                });
                if !direct && !via_alias {
                    return Err(missing(name));
                }
            }
        }
        Ok(())
    }

    /// Repoints projection references at the physical attribute names so the
    /// backing store returns the projected columns.
    fn rewrite_projection(
        &self,
        tenant: &TenantId,
        request: &mut ScanRequest,
        index: &IndexMapping,
        original_names: &ExpressionAttributeNames,
    ) -> StorageResult<()> {
        if let Some(attributes) = &mut request.attributes_to_get {
            for attribute in attributes.iter_mut() {
                if let Some(mapping) =
                    self.mapping.field_mapping_in_context(attribute, Some(index))
                {
                    *attribute = mapping.target.name.clone();
                }
            }
        }
        let Some(projection) = request.projection_expression.clone() else {
            return Ok(());
        };
        let mut names = request
            .expression_attribute_names
            .clone()
            .unwrap_or_default();
        let mut referenced = HashSet::new();
        let (rewritten, _) = ConditionMapper::new(self.mapping.clone()).rewrite_expression(
            tenant,
            &projection,
            original_names,
            &mut names,
            &Default::default(),
            Some(index),
            &mut referenced,
        )?;
        request.projection_expression = Some(rewritten);
        if !names.is_empty() {
            request.expression_attribute_names = Some(names);
        }
        Ok(())
    }

    /// AND-composes `begins_with(<physical hash>, "<tenant>.<index>.")` with
    /// whatever filter the caller supplied, so a physical page never leaks
    /// another tenant's rows.
    fn add_tenant_filter(
        &self,
        tenant: &TenantId,
        request: &mut ScanRequest,
        index: &IndexMapping,
    ) -> StorageResult<()> {
        let hash = &index.hash;
        let prefix = match hash.target.kind {
            ScalarKind::S => AttributeValue::S(StringPrefixFunction.apply(
                tenant,
                &hash.virtual_index_name,
                "",
            )?),
            ScalarKind::B => AttributeValue::B(BinaryPrefixFunction.apply(
                tenant,
                &hash.virtual_index_name,
                b"",
            )?),
            ScalarKind::N => {
                return Err(StorageError::internal(
                    "physical hash keys are never numeric",
                ))
            }
        };

        let names = request
            .expression_attribute_names
            .get_or_insert_with(Default::default);
        let name_placeholder = fresh_placeholder(names, &format!("mt_{}", hash.target.name));
        names.insert(name_placeholder.clone(), hash.target.name.clone());

        let values = request
            .expression_attribute_values
            .get_or_insert_with(Default::default);
        let value_placeholder = fresh_value_placeholder(values, "mt_prefix");
        values.insert(value_placeholder.clone(), prefix);

        request.filter_expression = Some(match request.filter_expression.take() {
            Some(user_filter) => format!(
                "({}) AND begins_with({}, {})",
                user_filter, name_placeholder, value_placeholder
            ),
            None => format!(
                "begins_with({}, {})",
                name_placeholder, value_placeholder
            ),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use tablemux_common::catalog::{
        KeyAttribute, PrimaryKey, Projection, SecondaryIndex, TableSchema,
    };

    use super::*;
    use crate::mapping::table::{PhysicalTableCatalog, TableMappingFactory};

    fn t(id: &str) -> TenantId {
        TenantId::new(id)
    }

    fn mapping() -> Arc<TableMapping> {
        let schema = TableSchema::new(
            "V",
            PrimaryKey::hash_only(KeyAttribute::new("pk", ScalarKind::S)),
        )
        .with_secondary_index(SecondaryIndex {
            name: "by_owner".to_owned(),
            key: PrimaryKey::hash_only(KeyAttribute::new("owner", ScalarKind::S)),
            projection: Projection::All,
        });
        Arc::new(
            TableMappingFactory::new(PhysicalTableCatalog::standard())
                .create_table_mapping(&schema)
                .unwrap(),
        )
    }

    #[test]
    fn test_query_key_condition_rewritten() {
        let mapping = mapping();
        let mut request = QueryRequest {
            key_condition_expression: Some("#p = :h".to_owned()),
            expression_attribute_names: Some(hashmap! { "#p".to_owned() => "pk".to_owned() }),
            expression_attribute_values: Some(hashmap! {
                ":h".to_owned() => AttributeValue::S("a".to_owned()),
            }),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_query(&t("t1"), &mut request)
            .unwrap();

        assert_eq!(
            request
                .expression_attribute_names
                .unwrap()
                .get("#p")
                .map(String::as_str),
            Some("hk")
        );
        assert_eq!(
            request.expression_attribute_values.unwrap().get(":h"),
            Some(&AttributeValue::S("t1.V.a".to_owned()))
        );
        // The primary key is not a named index.
        assert_eq!(request.index_name, None);
    }

    #[test]
    fn test_query_on_secondary_index() {
        let mapping = mapping();
        let mut request = QueryRequest {
            index_name: Some("by_owner".to_owned()),
            key_condition_expression: Some("owner = :o".to_owned()),
            expression_attribute_values: Some(hashmap! {
                ":o".to_owned() => AttributeValue::S("alice".to_owned()),
            }),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_query(&t("t1"), &mut request)
            .unwrap();

        assert_eq!(request.index_name.as_deref(), Some("gsi_s_1"));
        assert_eq!(
            request.key_condition_expression.as_deref(),
            Some("#owner = :o")
        );
        assert_eq!(
            request
                .expression_attribute_names
                .unwrap()
                .get("#owner")
                .map(String::as_str),
            Some("gsi1_hk")
        );
        // Index hash values are qualified by the index name.
        assert_eq!(
            request.expression_attribute_values.unwrap().get(":o"),
            Some(&AttributeValue::S("t1.by_owner.alice".to_owned()))
        );
    }

    #[test]
    fn test_scan_gets_tenant_filter() {
        let mapping = mapping();
        let mut request = ScanRequest::default();
        mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .unwrap();

        assert_eq!(
            request.filter_expression.as_deref(),
            Some("begins_with(#mt_hk, :mt_prefix)")
        );
        assert_eq!(
            request
                .expression_attribute_names
                .unwrap()
                .get("#mt_hk")
                .map(String::as_str),
            Some("hk")
        );
        assert_eq!(
            request.expression_attribute_values.unwrap().get(":mt_prefix"),
            Some(&AttributeValue::S("t1.V.".to_owned()))
        );
    }

    #[test]
    fn test_scan_composes_user_filter() {
        let mapping = mapping();
        let mut request = ScanRequest {
            filter_expression: Some("v = :x".to_owned()),
            expression_attribute_values: Some(hashmap! {
                ":x".to_owned() => AttributeValue::S("1".to_owned()),
            }),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .unwrap();

        assert_eq!(
            request.filter_expression.as_deref(),
            Some("(v = :x) AND begins_with(#mt_hk, :mt_prefix)")
        );
        // The non-key user value is untouched.
        assert_eq!(
            request.expression_attribute_values.unwrap().get(":x"),
            Some(&AttributeValue::S("1".to_owned()))
        );
    }

    #[test]
    fn test_scan_projection_must_cover_keys() {
        let mapping = mapping();
        let mut request = ScanRequest {
            projection_expression: Some("v, other".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            mapping
                .query_and_scan_mapper()
                .apply_scan(&t("t1"), &mut request),
            Err(StorageError::InvalidArgument(_))
        ));

        let mut request = ScanRequest {
            attributes_to_get: Some(vec!["v".to_owned()]),
            ..Default::default()
        };
        assert!(matches!(
            mapping
                .query_and_scan_mapper()
                .apply_scan(&t("t1"), &mut request),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_scan_projection_accepts_alias_and_rewrites() {
        let mapping = mapping();
        let mut request = ScanRequest {
            projection_expression: Some("#key, v".to_owned()),
            expression_attribute_names: Some(hashmap! {
                "#key".to_owned() => "pk".to_owned(),
            }),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .unwrap();
        assert_eq!(
            request.projection_expression.as_deref(),
            Some("#key, v")
        );
        assert_eq!(
            request
                .expression_attribute_names
                .unwrap()
                .get("#key")
                .map(String::as_str),
            Some("hk")
        );
    }

    #[test]
    fn test_scan_projection_substring_check_is_naive() {
        // `pk_alias` embeds `pk`, so the membership test lets it through.
        // This mirrors the source behavior; the cursor derivation will fail
        // later if the key truly is not projected.
        let mapping = mapping();
        let mut request = ScanRequest {
            projection_expression: Some("pk_alias".to_owned()),
            ..Default::default()
        };
        assert!(mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .is_ok());
    }

    #[test]
    fn test_scan_attributes_to_get_renamed() {
        let mapping = mapping();
        let mut request = ScanRequest {
            attributes_to_get: Some(vec!["pk".to_owned(), "v".to_owned()]),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .unwrap();
        assert_eq!(
            request.attributes_to_get,
            Some(vec!["hk".to_owned(), "v".to_owned()])
        );
    }

    #[test]
    fn test_scan_start_key_mapped() {
        let mapping = mapping();
        let mut request = ScanRequest {
            exclusive_start_key: Some(hashmap! {
                "pk".to_owned() => AttributeValue::S("a".to_owned()),
            }),
            ..Default::default()
        };
        mapping
            .query_and_scan_mapper()
            .apply_scan(&t("t1"), &mut request)
            .unwrap();
        assert_eq!(
            request.exclusive_start_key,
            Some(hashmap! {
                "hk".to_owned() => AttributeValue::S("t1.V.a".to_owned()),
            })
        );
    }

    #[test]
    fn test_restrict_to_index_keys() {
        let mapping = mapping();
        let index = mapping.index(None).unwrap();
        let item = hashmap! {
            "pk".to_owned() => AttributeValue::S("a".to_owned()),
            "v".to_owned() => AttributeValue::S("x".to_owned()),
        };
        assert_eq!(
            restrict_to_index_keys(index, &item).unwrap(),
            hashmap! { "pk".to_owned() => AttributeValue::S("a".to_owned()) }
        );
    }
}
