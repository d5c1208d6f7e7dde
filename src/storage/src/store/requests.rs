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

//! Request and response shapes of the backing store's data plane, modeled on
//! the DynamoDB API. The same types describe both virtual requests (as
//! tenants issue them) and physical requests (after the mapping engine has
//! rewritten them).

use std::collections::HashMap;

use tablemux_common::types::{AttributeValue, Item};

/// `#placeholder` → attribute name substitutions.
pub type ExpressionAttributeNames = HashMap<String, String>;
/// `:placeholder` → attribute value substitutions.
pub type ExpressionAttributeValues = HashMap<String, AttributeValue>;

/// Comparison operators of the legacy `{attribute → Condition}` request form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BeginsWith,
    Between,
}

/// One entry of the legacy condition form.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub comparison_operator: ComparisonOperator,
    pub attribute_value_list: Vec<AttributeValue>,
}

impl Condition {
    pub fn eq(value: AttributeValue) -> Self {
        Self {
            comparison_operator: ComparisonOperator::Eq,
            attribute_value_list: vec![value],
        }
    }
}

pub type LegacyConditions = HashMap<String, Condition>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemRequest {
    pub table_name: String,
    pub key: Item,
    pub consistent_read: Option<bool>,
    pub attributes_to_get: Option<Vec<String>>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemResponse {
    pub item: Option<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutItemRequest {
    pub table_name: String,
    pub item: Item,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
    pub expression_attribute_values: Option<ExpressionAttributeValues>,
    /// Legacy `Expected` condition form.
    pub expected: Option<LegacyConditions>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutItemResponse {
    pub attributes: Option<Item>,
}

/// Legacy `AttributeUpdates` entry. The layer rejects requests carrying
/// these; the type exists so the option can be represented and refused.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueUpdate {
    pub value: Option<AttributeValue>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateItemRequest {
    pub table_name: String,
    pub key: Item,
    pub update_expression: Option<String>,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
    pub expression_attribute_values: Option<ExpressionAttributeValues>,
    pub attribute_updates: Option<HashMap<String, AttributeValueUpdate>>,
    pub expected: Option<LegacyConditions>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateItemResponse {
    pub attributes: Option<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteItemRequest {
    pub table_name: String,
    pub key: Item,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
    pub expression_attribute_values: Option<ExpressionAttributeValues>,
    pub expected: Option<LegacyConditions>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteItemResponse {
    pub attributes: Option<Item>,
}

/// Per-table slice of a batch get.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeysAndAttributes {
    pub keys: Vec<Item>,
    pub consistent_read: Option<bool>,
    pub attributes_to_get: Option<Vec<String>>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
}

impl KeysAndAttributes {
    pub fn of(keys: Vec<Item>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetItemRequest {
    pub request_items: HashMap<String, KeysAndAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetItemResponse {
    pub responses: HashMap<String, Vec<Item>>,
    pub unprocessed_keys: HashMap<String, KeysAndAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
    pub expression_attribute_values: Option<ExpressionAttributeValues>,
    /// Legacy key condition form.
    pub key_conditions: Option<LegacyConditions>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub attributes_to_get: Option<Vec<String>>,
    pub expression_attribute_names: Option<ExpressionAttributeNames>,
    pub expression_attribute_values: Option<ExpressionAttributeValues>,
    pub exclusive_start_key: Option<Item>,
    /// Maximum number of items the store may *evaluate* for this page, which
    /// is how the backing store's `Limit` behaves.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}
