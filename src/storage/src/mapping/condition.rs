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

//! Rewriting of condition, key-condition, filter, and update expressions.
//!
//! Condition rewriting is generic over the mutating request shapes, whose
//! "primary expression" slots have different names and whose ancillary
//! fields overlap only partially. [`RequestWrapper`] is the capability
//! interface over those shapes; accessors that do not apply to a carrier
//! return [`StorageError::Unsupported`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tablemux_common::context::TenantId;
use tablemux_common::types::{AttributeValue, Item};

use super::field::{FieldMapper, FieldMapping};
use super::table::{IndexMapping, TableMapping};
use crate::error::{StorageError, StorageResult};
use crate::expression::{splice, tokenize, TokenKind};
use crate::store::{
    ComparisonOperator, Condition, DeleteItemRequest, ExpressionAttributeNames,
    ExpressionAttributeValues, LegacyConditions, PutItemRequest, QueryRequest, ScanRequest,
    UpdateItemRequest,
};

/// Reserved words that can never be attribute references.
const KEYWORDS: &[&str] = &[
    "AND", "OR", "NOT", "BETWEEN", "IN", "SET", "REMOVE", "ADD", "DELETE",
];

/// Capability view of one mutating request. One implementation exists per
/// request shape; accessors that the shape does not carry return
/// `Unsupported`.
pub trait RequestWrapper {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames>;
    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames);
    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues>;
    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue);
    /// The update expression for Update, the condition expression otherwise,
    /// the filter expression for Scan.
    fn primary_expression(&self) -> Option<&str>;
    fn set_primary_expression(&mut self, expression: String);
    fn filter_expression(&self) -> StorageResult<Option<&str>>;
    fn set_filter_expression(&mut self, expression: String) -> StorageResult<()>;
    fn index_name(&self) -> StorageResult<Option<&str>>;
    fn set_index_name(&mut self, name: String) -> StorageResult<()>;
    fn exclusive_start_key(&self) -> StorageResult<Option<&Item>>;
    fn set_exclusive_start_key(&mut self, key: Item) -> StorageResult<()>;
    fn legacy_conditions(&self) -> StorageResult<Option<&LegacyConditions>>;
    fn set_legacy_conditions(&mut self, conditions: LegacyConditions) -> StorageResult<()>;
}

fn not_carried(shape: &str, what: &str) -> StorageError {
    StorageError::unsupported(format!("{} requests carry no {}", shape, what))
}

macro_rules! unsupported_accessor {
    ($shape:literal, $what:literal, $get:ident -> $ty:ty, $set:ident($arg:ty)) => {
        fn $get(&self) -> StorageResult<$ty> {
            Err(not_carried($shape, $what))
        }
        fn $set(&mut self, _: $arg) -> StorageResult<()> {
            Err(not_carried($shape, $what))
        }
    };
}

pub struct PutRequestWrapper<'a>(pub &'a mut PutItemRequest);

impl RequestWrapper for PutRequestWrapper<'_> {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames> {
        self.0.expression_attribute_names.as_ref()
    }

    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames) {
        self.0.expression_attribute_names = Some(names);
    }

    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues> {
        self.0.expression_attribute_values.as_ref()
    }

    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue) {
        self.0
            .expression_attribute_values
            .get_or_insert_with(Default::default)
            .insert(placeholder, value);
    }

    fn primary_expression(&self) -> Option<&str> {
        self.0.condition_expression.as_deref()
    }

    fn set_primary_expression(&mut self, expression: String) {
        self.0.condition_expression = Some(expression);
    }

    unsupported_accessor!("PutItem", "filter expression",
        filter_expression -> Option<&str>, set_filter_expression(String));
    unsupported_accessor!("PutItem", "index name",
        index_name -> Option<&str>, set_index_name(String));
    unsupported_accessor!("PutItem", "exclusive start key",
        exclusive_start_key -> Option<&Item>, set_exclusive_start_key(Item));

    fn legacy_conditions(&self) -> StorageResult<Option<&LegacyConditions>> {
        Ok(self.0.expected.as_ref())
    }

    fn set_legacy_conditions(&mut self, conditions: LegacyConditions) -> StorageResult<()> {
        self.0.expected = Some(conditions);
        Ok(())
    }
}

pub struct UpdateRequestWrapper<'a>(pub &'a mut UpdateItemRequest);

impl RequestWrapper for UpdateRequestWrapper<'_> {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames> {
        self.0.expression_attribute_names.as_ref()
    }

    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames) {
        self.0.expression_attribute_names = Some(names);
    }

    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues> {
        self.0.expression_attribute_values.as_ref()
    }

    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue) {
        self.0
            .expression_attribute_values
            .get_or_insert_with(Default::default)
            .insert(placeholder, value);
    }

    fn primary_expression(&self) -> Option<&str> {
        self.0.update_expression.as_deref()
    }

    fn set_primary_expression(&mut self, expression: String) {
        self.0.update_expression = Some(expression);
    }

    // The condition expression rides in the filter slot: it is the
    // "secondary" condition next to the update expression.
    fn filter_expression(&self) -> StorageResult<Option<&str>> {
        Ok(self.0.condition_expression.as_deref())
    }

    fn set_filter_expression(&mut self, expression: String) -> StorageResult<()> {
        self.0.condition_expression = Some(expression);
        Ok(())
    }

    unsupported_accessor!("UpdateItem", "index name",
        index_name -> Option<&str>, set_index_name(String));
    unsupported_accessor!("UpdateItem", "exclusive start key",
        exclusive_start_key -> Option<&Item>, set_exclusive_start_key(Item));

    fn legacy_conditions(&self) -> StorageResult<Option<&LegacyConditions>> {
        Ok(self.0.expected.as_ref())
    }

    fn set_legacy_conditions(&mut self, conditions: LegacyConditions) -> StorageResult<()> {
        self.0.expected = Some(conditions);
        Ok(())
    }
}

pub struct DeleteRequestWrapper<'a>(pub &'a mut DeleteItemRequest);

impl RequestWrapper for DeleteRequestWrapper<'_> {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames> {
        self.0.expression_attribute_names.as_ref()
    }

    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames) {
        self.0.expression_attribute_names = Some(names);
    }

    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues> {
        self.0.expression_attribute_values.as_ref()
    }

    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue) {
        self.0
            .expression_attribute_values
            .get_or_insert_with(Default::default)
            .insert(placeholder, value);
    }

    fn primary_expression(&self) -> Option<&str> {
        self.0.condition_expression.as_deref()
    }

    fn set_primary_expression(&mut self, expression: String) {
        self.0.condition_expression = Some(expression);
    }

    unsupported_accessor!("DeleteItem", "filter expression",
        filter_expression -> Option<&str>, set_filter_expression(String));
    unsupported_accessor!("DeleteItem", "index name",
        index_name -> Option<&str>, set_index_name(String));
    unsupported_accessor!("DeleteItem", "exclusive start key",
        exclusive_start_key -> Option<&Item>, set_exclusive_start_key(Item));

    fn legacy_conditions(&self) -> StorageResult<Option<&LegacyConditions>> {
        Ok(self.0.expected.as_ref())
    }

    fn set_legacy_conditions(&mut self, conditions: LegacyConditions) -> StorageResult<()> {
        self.0.expected = Some(conditions);
        Ok(())
    }
}

pub struct QueryRequestWrapper<'a>(pub &'a mut QueryRequest);

impl RequestWrapper for QueryRequestWrapper<'_> {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames> {
        self.0.expression_attribute_names.as_ref()
    }

    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames) {
        self.0.expression_attribute_names = Some(names);
    }

    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues> {
        self.0.expression_attribute_values.as_ref()
    }

    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue) {
        self.0
            .expression_attribute_values
            .get_or_insert_with(Default::default)
            .insert(placeholder, value);
    }

    fn primary_expression(&self) -> Option<&str> {
        self.0.key_condition_expression.as_deref()
    }

    fn set_primary_expression(&mut self, expression: String) {
        self.0.key_condition_expression = Some(expression);
    }

    fn filter_expression(&self) -> StorageResult<Option<&str>> {
        Ok(self.0.filter_expression.as_deref())
    }

    fn set_filter_expression(&mut self, expression: String) -> StorageResult<()> {
        self.0.filter_expression = Some(expression);
        Ok(())
    }

    fn index_name(&self) -> StorageResult<Option<&str>> {
        Ok(self.0.index_name.as_deref())
    }

    fn set_index_name(&mut self, name: String) -> StorageResult<()> {
        self.0.index_name = Some(name);
        Ok(())
    }

    fn exclusive_start_key(&self) -> StorageResult<Option<&Item>> {
        Ok(self.0.exclusive_start_key.as_ref())
    }

    fn set_exclusive_start_key(&mut self, key: Item) -> StorageResult<()> {
        self.0.exclusive_start_key = Some(key);
        Ok(())
    }

    fn legacy_conditions(&self) -> StorageResult<Option<&LegacyConditions>> {
        Ok(self.0.key_conditions.as_ref())
    }

    fn set_legacy_conditions(&mut self, conditions: LegacyConditions) -> StorageResult<()> {
        self.0.key_conditions = Some(conditions);
        Ok(())
    }
}

pub struct ScanRequestWrapper<'a>(pub &'a mut ScanRequest);

impl RequestWrapper for ScanRequestWrapper<'_> {
    fn expression_attribute_names(&self) -> Option<&ExpressionAttributeNames> {
        self.0.expression_attribute_names.as_ref()
    }

    fn set_expression_attribute_names(&mut self, names: ExpressionAttributeNames) {
        self.0.expression_attribute_names = Some(names);
    }

    fn expression_attribute_values(&self) -> Option<&ExpressionAttributeValues> {
        self.0.expression_attribute_values.as_ref()
    }

    fn set_expression_attribute_value(&mut self, placeholder: String, value: AttributeValue) {
        self.0
            .expression_attribute_values
            .get_or_insert_with(Default::default)
            .insert(placeholder, value);
    }

    // A scan's only condition is its filter, so it rides in the primary slot.
    fn primary_expression(&self) -> Option<&str> {
        self.0.filter_expression.as_deref()
    }

    fn set_primary_expression(&mut self, expression: String) {
        self.0.filter_expression = Some(expression);
    }

    unsupported_accessor!("Scan", "second filter expression",
        filter_expression -> Option<&str>, set_filter_expression(String));

    fn index_name(&self) -> StorageResult<Option<&str>> {
        Ok(self.0.index_name.as_deref())
    }

    fn set_index_name(&mut self, name: String) -> StorageResult<()> {
        self.0.index_name = Some(name);
        Ok(())
    }

    fn exclusive_start_key(&self) -> StorageResult<Option<&Item>> {
        Ok(self.0.exclusive_start_key.as_ref())
    }

    fn set_exclusive_start_key(&mut self, key: Item) -> StorageResult<()> {
        self.0.exclusive_start_key = Some(key);
        Ok(())
    }

    unsupported_accessor!("Scan", "legacy condition map",
        legacy_conditions -> Option<&LegacyConditions>, set_legacy_conditions(LegacyConditions));
}

/// Rewrites every reference to a mapped key attribute — by `#placeholder`,
/// by bare name, or through the legacy condition map — to its physical name,
/// and tenant-encodes the values compared against context-aware keys.
#[derive(Clone)]
pub struct ConditionMapper {
    mapping: Arc<TableMapping>,
}

impl ConditionMapper {
    pub(crate) fn new(mapping: Arc<TableMapping>) -> Self {
        Self { mapping }
    }

    pub fn apply(
        &self,
        tenant: &TenantId,
        wrapper: &mut dyn RequestWrapper,
        index: Option<&IndexMapping>,
    ) -> StorageResult<()> {
        let had_names = wrapper.expression_attribute_names().is_some();
        let mut names = wrapper
            .expression_attribute_names()
            .cloned()
            .unwrap_or_default();
        // References resolve against the caller's original alias table even
        // after earlier rewrites repoint entries to physical names.
        let original_names = names.clone();
        let values = wrapper
            .expression_attribute_values()
            .cloned()
            .unwrap_or_default();
        let mut referenced = HashSet::new();

        if let Some(expr) = wrapper.primary_expression().map(str::to_owned) {
            let (rewritten, value_edits) = self.rewrite_expression(
                tenant,
                &expr,
                &original_names,
                &mut names,
                &values,
                index,
                &mut referenced,
            )?;
            wrapper.set_primary_expression(rewritten);
            for (placeholder, value) in value_edits {
                wrapper.set_expression_attribute_value(placeholder, value);
            }
        }

        let filter = match wrapper.filter_expression() {
            Ok(filter) => filter.map(str::to_owned),
            Err(e) if e.is_unsupported() => None,
            Err(e) => return Err(e),
        };
        if let Some(expr) = filter {
            let (rewritten, value_edits) = self.rewrite_expression(
                tenant,
                &expr,
                &original_names,
                &mut names,
                &values,
                index,
                &mut referenced,
            )?;
            wrapper.set_filter_expression(rewritten)?;
            for (placeholder, value) in value_edits {
                wrapper.set_expression_attribute_value(placeholder, value);
            }
        }

        let legacy = match wrapper.legacy_conditions() {
            Ok(legacy) => legacy.cloned(),
            Err(e) if e.is_unsupported() => None,
            Err(e) => return Err(e),
        };
        if let Some(conditions) = legacy {
            let rewritten = self.rewrite_legacy(tenant, conditions, index, &referenced)?;
            wrapper.set_legacy_conditions(rewritten)?;
        }

        if had_names || !names.is_empty() {
            wrapper.set_expression_attribute_names(names);
        }
        Ok(())
    }

    /// Rewrites one expression. Returns the new text plus the
    /// `:placeholder → encoded value` substitutions it requires. `names` is
    /// updated in place with repointed and freshly introduced placeholders.
    pub(crate) fn rewrite_expression(
        &self,
        tenant: &TenantId,
        expr: &str,
        original_names: &ExpressionAttributeNames,
        names: &mut ExpressionAttributeNames,
        values: &ExpressionAttributeValues,
        index: Option<&IndexMapping>,
        referenced: &mut HashSet<String>,
    ) -> StorageResult<(String, Vec<(String, AttributeValue)>)> {
        struct FieldRef {
            virtual_name: String,
            mapping: FieldMapping,
        }

        let tokens = tokenize(expr)?;

        // Resolve which tokens reference mapped key attributes.
        let mut refs: Vec<Option<FieldRef>> = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let resolved = match &token.kind {
                TokenKind::Name(_) => {
                    let placeholder = &expr[token.start..token.end];
                    original_names.get(placeholder).and_then(|attr| {
                        self.mapping
                            .field_mapping_in_context(attr, index)
                            .map(|m| FieldRef {
                                virtual_name: attr.clone(),
                                mapping: m.clone(),
                            })
                    })
                }
                TokenKind::Ident(ident) => {
                    let is_function = matches!(
                        tokens.get(i + 1).map(|t| &t.kind),
                        Some(TokenKind::LParen)
                    );
                    if is_function || KEYWORDS.contains(&ident.to_ascii_uppercase().as_str()) {
                        None
                    } else {
                        self.mapping
                            .field_mapping_in_context(ident, index)
                            .map(|m| FieldRef {
                                virtual_name: ident.clone(),
                                mapping: m.clone(),
                            })
                    }
                }
                _ => None,
            };
            refs.push(resolved);
        }

        // Repoint placeholders and splice bare names.
        let mut edits = Vec::new();
        let mut alias_for: HashMap<String, String> = HashMap::new();
        for (token, field_ref) in tokens.iter().zip(&refs) {
            let Some(field_ref) = field_ref else { continue };
            referenced.insert(field_ref.virtual_name.clone());
            match &token.kind {
                TokenKind::Name(_) => {
                    let placeholder = expr[token.start..token.end].to_owned();
                    names.insert(placeholder, field_ref.mapping.target.name.clone());
                }
                TokenKind::Ident(_) => {
                    let placeholder = alias_for
                        .entry(field_ref.virtual_name.clone())
                        .or_insert_with(|| {
                            let placeholder =
                                fresh_placeholder(names, &field_ref.virtual_name);
                            names.insert(
                                placeholder.clone(),
                                field_ref.mapping.target.name.clone(),
                            );
                            placeholder
                        })
                        .clone();
                    edits.push((token.start, token.end, placeholder));
                }
                _ => unreachable!("only name and ident tokens resolve to fields"),
            }
        }

        // Encode values compared for equality against context-aware keys.
        let mut value_edits = Vec::new();
        for i in 0..tokens.len() {
            let is_eq = tokens
                .get(i + 1)
                .is_some_and(|t| matches!(&t.kind, TokenKind::Op(op) if op.as_str() == "="));
            if !is_eq {
                continue;
            }
            let (ref_idx, value_idx) = match (&tokens[i].kind, tokens.get(i + 2).map(|t| &t.kind))
            {
                (_, Some(TokenKind::Value(_))) if refs[i].is_some() => (i, i + 2),
                (TokenKind::Value(_), _) if refs.get(i + 2).is_some_and(Option::is_some) => {
                    (i + 2, i)
                }
                _ => continue,
            };
            let mapping = &refs[ref_idx].as_ref().unwrap().mapping;
            if !mapping.context_aware {
                continue;
            }
            let value_token = &tokens[value_idx];
            let placeholder = expr[value_token.start..value_token.end].to_owned();
            let current = values.get(&placeholder).ok_or_else(|| {
                StorageError::invalid_argument(format!(
                    "expression references undefined value `{}`",
                    placeholder
                ))
            })?;
            value_edits.push((
                placeholder,
                FieldMapper::apply(tenant, mapping, current)?,
            ));
        }

        Ok((splice(expr, edits), value_edits))
    }

    fn rewrite_legacy(
        &self,
        tenant: &TenantId,
        conditions: LegacyConditions,
        index: Option<&IndexMapping>,
        referenced: &HashSet<String>,
    ) -> StorageResult<LegacyConditions> {
        let mut rewritten = LegacyConditions::with_capacity(conditions.len());
        for (attr, condition) in conditions {
            let Some(mapping) = self.mapping.field_mapping_in_context(&attr, index) else {
                rewritten.insert(attr, condition);
                continue;
            };
            if referenced.contains(&attr) {
                return Err(StorageError::invalid_argument(format!(
                    "attribute `{}` is constrained by both the legacy and the expression form",
                    attr
                )));
            }
            let mapping = mapping.clone();
            if mapping.context_aware
                && condition.comparison_operator != ComparisonOperator::Eq
            {
                return Err(StorageError::unsupported(format!(
                    "only equality conditions apply to the prefixed key attribute `{}`",
                    attr
                )));
            }
            let attribute_value_list = condition
                .attribute_value_list
                .iter()
                .map(|value| FieldMapper::apply(tenant, &mapping, value))
                .collect::<StorageResult<Vec<_>>>()?;
            rewritten.insert(
                mapping.target.name.clone(),
                Condition {
                    comparison_operator: condition.comparison_operator,
                    attribute_value_list,
                },
            );
        }
        Ok(rewritten)
    }
}

/// Picks a `#placeholder` not yet present in `names`.
pub(crate) fn fresh_placeholder(names: &ExpressionAttributeNames, hint: &str) -> String {
    let sanitized: String = hint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let base = format!("#{}", sanitized);
    if !names.contains_key(&base) {
        return base;
    }
    for n in 2.. {
        let candidate = format!("{}_{}", base, n);
        if !names.contains_key(&candidate) {
            return candidate;
        }
    }
    unreachable!()
}

/// Picks a `:placeholder` not yet present in `values`.
pub(crate) fn fresh_value_placeholder(values: &ExpressionAttributeValues, hint: &str) -> String {
    let base = format!(":{}", hint);
    if !values.contains_key(&base) {
        return base;
    }
    for n in 2.. {
        let candidate = format!("{}_{}", base, n);
        if !values.contains_key(&candidate) {
            return candidate;
        }
    }
    unreachable!()
}
