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

//! An in-memory backing store.
//!
//! Keeps rows in `BTreeMap`s and models the paging contract faithfully:
//! `limit` bounds the number of *evaluated* rows per page, filters run after
//! pagination, and `last_evaluated_key` / `exclusive_start_key` cursors
//! resume mid-table. It only evaluates the expression subset the mapping
//! engine emits. For test purposes and single-process embeddings; never for
//! production.

use std::collections::HashMap;
use std::ops::Bound;

use anyhow::anyhow;
use itertools::Itertools;
use parking_lot::RwLock;
use tablemux_common::catalog::PhysicalTableDesc;
use tablemux_common::types::{AttributeValue, Item};

use super::requests::*;
use super::BackingStore;
use crate::error::{StorageError, StorageResult};
use crate::expression::{tokenize, Token, TokenKind};

/// Numeric sort key: numeric order first, canonical string as tie-breaker so
/// ordering stays consistent with equality.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NumKey(String);

impl Ord for NumKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.0.parse::<f64>(), other.0.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.total_cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for NumKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyScalar {
    S(String),
    N(NumKey),
    B(Vec<u8>),
}

type MemKey = (KeyScalar, Option<KeyScalar>);

fn scalar_key(value: &AttributeValue) -> Option<KeyScalar> {
    match value {
        AttributeValue::S(s) => Some(KeyScalar::S(s.clone())),
        AttributeValue::N(n) => Some(KeyScalar::N(NumKey(n.clone()))),
        AttributeValue::B(b) => Some(KeyScalar::B(b.to_vec())),
        _ => None,
    }
}

struct TableData {
    desc: PhysicalTableDesc,
    rows: std::collections::BTreeMap<MemKey, Item>,
}

impl TableData {
    fn key_of(&self, item: &Item) -> StorageResult<MemKey> {
        let hash_name = &self.desc.primary_key.hash_key.name;
        let hash = item
            .get(hash_name)
            .and_then(scalar_key)
            .ok_or_else(|| {
                StorageError::backend(anyhow!("missing or non-scalar key attribute `{hash_name}`"))
            })?;
        let range = match &self.desc.primary_key.range_key {
            None => None,
            Some(range_key) => Some(
                item.get(&range_key.name)
                    .and_then(scalar_key)
                    .ok_or_else(|| {
                        StorageError::backend(anyhow!(
                            "missing or non-scalar key attribute `{}`",
                            range_key.name
                        ))
                    })?,
            ),
        };
        Ok((hash, range))
    }

    fn key_item(&self, item: &Item) -> Item {
        self.desc
            .primary_key
            .attribute_names()
            .filter_map(|name| item.get(name).map(|v| (name.to_owned(), v.clone())))
            .collect()
    }
}

/// See the module docs.
#[derive(Default)]
pub struct MemoryBackingStore {
    tables: RwLock<HashMap<String, TableData>>,
    /// When set, a batch get processes at most this many keys and returns
    /// the rest unprocessed. Lets tests exercise retry handling.
    max_batch_items: RwLock<Option<usize>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: impl IntoIterator<Item = PhysicalTableDesc>) -> Self {
        let store = Self::new();
        for table in tables {
            store.register_table(table);
        }
        store
    }

    pub fn register_table(&self, desc: PhysicalTableDesc) {
        self.tables.write().insert(
            desc.name.clone(),
            TableData {
                desc,
                rows: Default::default(),
            },
        );
    }

    pub fn set_max_batch_items(&self, limit: Option<usize>) {
        *self.max_batch_items.write() = limit;
    }

    /// Raw row count of a physical table, across all tenants.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map_or(0, |data| data.rows.len())
    }

    fn with_table<R>(
        &self,
        name: &str,
        f: impl FnOnce(&TableData) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let tables = self.tables.read();
        let data = tables
            .get(name)
            .ok_or_else(|| StorageError::backend(anyhow!("unknown physical table `{name}`")))?;
        f(data)
    }

    fn with_table_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut TableData) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::backend(anyhow!("unknown physical table `{name}`")))?;
        f(data)
    }
}

/// One evaluated page: matching items plus the key to resume after, when the
/// page stopped before the end of the table.
fn evaluate_page(
    data: &TableData,
    exclusive_start_key: Option<&Item>,
    limit: Option<usize>,
    mut matches: impl FnMut(&Item) -> StorageResult<bool>,
) -> StorageResult<(Vec<Item>, Option<Item>)> {
    let start = match exclusive_start_key {
        Some(key) => Bound::Excluded(data.key_of(key)?),
        None => Bound::Unbounded,
    };
    let mut items = Vec::new();
    let mut evaluated = 0usize;
    let mut iter = data.rows.range((start, Bound::Unbounded)).peekable();
    while let Some((_, item)) = iter.next() {
        evaluated += 1;
        if matches(item)? {
            items.push(item.clone());
        }
        if limit.is_some_and(|limit| evaluated >= limit) {
            if iter.peek().is_some() {
                return Ok((items, Some(data.key_item(item))));
            }
            break;
        }
    }
    Ok((items, None))
}

#[async_trait::async_trait]
impl BackingStore for MemoryBackingStore {
    async fn get_item(&self, request: GetItemRequest) -> StorageResult<GetItemResponse> {
        self.with_table(&request.table_name, |data| {
            let key = data.key_of(&request.key)?;
            Ok(GetItemResponse {
                item: data.rows.get(&key).cloned(),
            })
        })
    }

    async fn put_item(&self, request: PutItemRequest) -> StorageResult<PutItemResponse> {
        self.with_table_mut(&request.table_name, |data| {
            let key = data.key_of(&request.item)?;
            let existing = data.rows.get(&key);
            check_conditions(
                request.condition_expression.as_deref(),
                request.expected.as_ref(),
                &ExpressionContext::of(&request.expression_attribute_names, &request.expression_attribute_values),
                existing,
            )?;
            data.rows.insert(key, request.item);
            Ok(PutItemResponse::default())
        })
    }

    async fn update_item(&self, request: UpdateItemRequest) -> StorageResult<UpdateItemResponse> {
        if request.attribute_updates.is_some() {
            return Err(StorageError::backend(anyhow!(
                "attribute updates are not modeled by the in-memory store"
            )));
        }
        self.with_table_mut(&request.table_name, |data| {
            let key = data.key_of(&request.key)?;
            let existing = data.rows.get(&key).cloned();
            let ctx = ExpressionContext::of(
                &request.expression_attribute_names,
                &request.expression_attribute_values,
            );
            check_conditions(
                request.condition_expression.as_deref(),
                request.expected.as_ref(),
                &ctx,
                existing.as_ref(),
            )?;
            let mut item = existing.unwrap_or_else(|| request.key.clone());
            if let Some(expression) = &request.update_expression {
                apply_update_expression(expression, &ctx, &mut item)?;
            }
            data.rows.insert(key, item);
            Ok(UpdateItemResponse::default())
        })
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> StorageResult<DeleteItemResponse> {
        self.with_table_mut(&request.table_name, |data| {
            let key = data.key_of(&request.key)?;
            let existing = data.rows.get(&key);
            check_conditions(
                request.condition_expression.as_deref(),
                request.expected.as_ref(),
                &ExpressionContext::of(&request.expression_attribute_names, &request.expression_attribute_values),
                existing,
            )?;
            data.rows.remove(&key);
            Ok(DeleteItemResponse::default())
        })
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> StorageResult<BatchGetItemResponse> {
        let budget = *self.max_batch_items.read();
        let mut processed = 0usize;
        let mut response = BatchGetItemResponse::default();
        for (table_name, keys_and_attributes) in request.request_items {
            let mut pending = keys_and_attributes.keys.iter();
            self.with_table(&table_name, |data| {
                for key in pending.by_ref() {
                    if budget.is_some_and(|budget| processed >= budget) {
                        break;
                    }
                    processed += 1;
                    if let Some(item) = data.rows.get(&data.key_of(key)?) {
                        response
                            .responses
                            .entry(table_name.clone())
                            .or_default()
                            .push(item.clone());
                    }
                }
                Ok(())
            })?;
            let remaining = pending.cloned().collect_vec();
            if !remaining.is_empty() {
                response.unprocessed_keys.insert(
                    table_name,
                    KeysAndAttributes {
                        keys: remaining,
                        ..keys_and_attributes
                    },
                );
            }
        }
        Ok(response)
    }

    async fn query(&self, request: QueryRequest) -> StorageResult<QueryResponse> {
        self.with_table(&request.table_name, |data| {
            let ctx = ExpressionContext::of(
                &request.expression_attribute_names,
                &request.expression_attribute_values,
            );
            // Secondary-index ordering is not modeled; rows come back in
            // primary-key order regardless of `index_name`.
            let (items, last_evaluated_key) = evaluate_page(
                data,
                request.exclusive_start_key.as_ref(),
                request.limit,
                |item| {
                    let mut matched = true;
                    if let Some(expression) = &request.key_condition_expression {
                        matched &= evaluate_condition(expression, &ctx, Some(item))?;
                    }
                    if let Some(conditions) = &request.key_conditions {
                        matched &= evaluate_legacy(conditions, item)?;
                    }
                    if matched {
                        if let Some(filter) = &request.filter_expression {
                            matched &= evaluate_condition(filter, &ctx, Some(item))?;
                        }
                    }
                    Ok(matched)
                },
            )?;
            Ok(QueryResponse {
                items,
                last_evaluated_key,
            })
        })
    }

    async fn scan(&self, request: ScanRequest) -> StorageResult<ScanResponse> {
        self.with_table(&request.table_name, |data| {
            let ctx = ExpressionContext::of(
                &request.expression_attribute_names,
                &request.expression_attribute_values,
            );
            let (mut items, last_evaluated_key) = evaluate_page(
                data,
                request.exclusive_start_key.as_ref(),
                request.limit,
                |item| match &request.filter_expression {
                    Some(filter) => evaluate_condition(filter, &ctx, Some(item)),
                    None => Ok(true),
                },
            )?;
            if let Some(attributes) = projected_attributes(&request, &ctx) {
                for item in &mut items {
                    item.retain(|name, _| attributes.iter().any(|a| a == name));
                }
            }
            Ok(ScanResponse {
                items,
                last_evaluated_key,
            })
        })
    }
}

fn projected_attributes(
    request: &ScanRequest,
    ctx: &ExpressionContext<'_>,
) -> Option<Vec<String>> {
    if let Some(attributes) = &request.attributes_to_get {
        return Some(attributes.clone());
    }
    let projection = request.projection_expression.as_ref()?;
    Some(
        projection
            .split(',')
            .map(str::trim)
            .map(|part| ctx.resolve_name(part).to_owned())
            .collect(),
    )
}

fn check_conditions(
    expression: Option<&str>,
    legacy: Option<&LegacyConditions>,
    ctx: &ExpressionContext<'_>,
    existing: Option<&Item>,
) -> StorageResult<()> {
    let failed = StorageError::backend(anyhow!("the conditional request failed"));
    if let Some(expression) = expression {
        if !evaluate_condition(expression, ctx, existing)? {
            return Err(failed);
        }
    }
    if let Some(conditions) = legacy {
        let empty = Item::new();
        if !evaluate_legacy(conditions, existing.unwrap_or(&empty))? {
            return Err(StorageError::backend(anyhow!(
                "the conditional request failed"
            )));
        }
    }
    Ok(())
}

struct ExpressionContext<'a> {
    names: Option<&'a ExpressionAttributeNames>,
    values: Option<&'a ExpressionAttributeValues>,
}

impl<'a> ExpressionContext<'a> {
    fn of(
        names: &'a Option<ExpressionAttributeNames>,
        values: &'a Option<ExpressionAttributeValues>,
    ) -> Self {
        Self {
            names: names.as_ref(),
            values: values.as_ref(),
        }
    }

    /// `#alias` → attribute name; anything else is already a name.
    fn resolve_name<'b>(&'b self, reference: &'b str) -> &'b str {
        if reference.starts_with('#') {
            if let Some(name) = self.names.and_then(|names| names.get(reference)) {
                return name;
            }
        }
        reference
    }

    fn value(&self, placeholder: &str) -> StorageResult<&AttributeValue> {
        self.values
            .and_then(|values| values.get(placeholder))
            .ok_or_else(|| {
                StorageError::backend(anyhow!("undefined value placeholder `{placeholder}`"))
            })
    }
}

/// Evaluates the expression subset the engine emits: `AND` conjunctions of
/// comparisons (`=`, `<>`), `begins_with`, `attribute_exists`, and
/// `attribute_not_exists`, with optional parentheses.
fn evaluate_condition(
    expression: &str,
    ctx: &ExpressionContext<'_>,
    item: Option<&Item>,
) -> StorageResult<bool> {
    let tokens = tokenize(expression)?;
    let mut parser = ConditionParser {
        expression,
        tokens: &tokens,
        pos: 0,
        ctx,
        item,
    };
    let result = parser.conjunction()?;
    if parser.pos != tokens.len() {
        return Err(parser.unsupported());
    }
    Ok(result)
}

struct ConditionParser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a ExpressionContext<'a>,
    item: Option<&'a Item>,
}

impl<'a> ConditionParser<'a> {
    fn unsupported(&self) -> StorageError {
        StorageError::backend(anyhow!(
            "expression `{}` is not supported by the in-memory store",
            self.expression
        ))
    }

    fn peek(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn bump(&mut self) -> Option<&'a TokenKind> {
        let token = self.tokens.get(self.pos).map(|t| &t.kind);
        self.pos += 1;
        token
    }

    fn expect(&mut self, kind: &TokenKind) -> StorageResult<()> {
        if self.bump() == Some(kind) {
            Ok(())
        } else {
            Err(self.unsupported())
        }
    }

    fn conjunction(&mut self) -> StorageResult<bool> {
        let mut result = self.term()?;
        while matches!(self.peek(), Some(TokenKind::Ident(word)) if word.eq_ignore_ascii_case("AND"))
        {
            self.pos += 1;
            // No short-circuit: the right side may still be malformed.
            result &= self.term()?;
        }
        Ok(result)
    }

    fn term(&mut self) -> StorageResult<bool> {
        match self.peek() {
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.conjunction()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            Some(TokenKind::Ident(word))
                if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::LParen)) =>
            {
                let function = word.clone();
                self.pos += 2;
                self.function(&function)
            }
            _ => self.comparison(),
        }
    }

    fn function(&mut self, function: &str) -> StorageResult<bool> {
        match function {
            "begins_with" => {
                let subject = self.operand()?;
                self.expect(&TokenKind::Comma)?;
                let prefix = self.operand()?;
                self.expect(&TokenKind::RParen)?;
                Ok(match (subject, prefix) {
                    (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => s.starts_with(&p),
                    (Some(AttributeValue::B(s)), Some(AttributeValue::B(p))) => {
                        s.starts_with(p.as_ref())
                    }
                    _ => false,
                })
            }
            "attribute_exists" | "attribute_not_exists" => {
                let subject = self.operand()?;
                self.expect(&TokenKind::RParen)?;
                let exists = subject.is_some();
                Ok(if function == "attribute_exists" {
                    exists
                } else {
                    !exists
                })
            }
            _ => Err(self.unsupported()),
        }
    }

    fn comparison(&mut self) -> StorageResult<bool> {
        let left = self.operand()?;
        let op = match self.bump() {
            Some(TokenKind::Op(op)) => op.clone(),
            _ => return Err(self.unsupported()),
        };
        let right = self.operand()?;
        match op.as_str() {
            "=" => Ok(matches!((&left, &right), (Some(a), Some(b)) if a == b)),
            "<>" => Ok(matches!((&left, &right), (Some(a), Some(b)) if a != b)),
            _ => Err(self.unsupported()),
        }
    }

    /// Resolves the next token to a value: an item attribute (by alias or
    /// bare name) or a bound value placeholder.
    fn operand(&mut self) -> StorageResult<Option<AttributeValue>> {
        let token = self.tokens.get(self.pos).ok_or_else(|| self.unsupported())?;
        self.pos += 1;
        match &token.kind {
            TokenKind::Name(_) => {
                let reference = &self.expression[token.start..token.end];
                let name = self.ctx.resolve_name(reference);
                Ok(self.item.and_then(|item| item.get(name)).cloned())
            }
            TokenKind::Ident(name) => Ok(self.item.and_then(|item| item.get(name)).cloned()),
            TokenKind::Value(_) => {
                let placeholder = &self.expression[token.start..token.end];
                self.ctx.value(placeholder).map(|v| Some(v.clone()))
            }
            _ => Err(self.unsupported()),
        }
    }
}

fn evaluate_legacy(conditions: &LegacyConditions, item: &Item) -> StorageResult<bool> {
    for (attribute, condition) in conditions {
        let value = item.get(attribute);
        let expected = condition.attribute_value_list.first();
        let matched = match condition.comparison_operator {
            ComparisonOperator::Eq => matches!((value, expected), (Some(a), Some(b)) if a == b),
            ComparisonOperator::Ne => matches!((value, expected), (Some(a), Some(b)) if a != b),
            ComparisonOperator::BeginsWith => match (value, expected) {
                (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => s.starts_with(p),
                (Some(AttributeValue::B(s)), Some(AttributeValue::B(p))) => {
                    s.starts_with(p.as_ref())
                }
                _ => false,
            },
            _ => {
                return Err(StorageError::backend(anyhow!(
                    "legacy comparison {:?} is not supported by the in-memory store",
                    condition.comparison_operator
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Applies `SET path = :value, ...` and `REMOVE path, ...` clauses.
fn apply_update_expression(
    expression: &str,
    ctx: &ExpressionContext<'_>,
    item: &mut Item,
) -> StorageResult<()> {
    let unsupported = || {
        StorageError::backend(anyhow!(
            "update expression `{expression}` is not supported by the in-memory store"
        ))
    };
    let tokens = tokenize(expression)?;
    let mut pos = 0;
    while pos < tokens.len() {
        let keyword = match &tokens[pos].kind {
            TokenKind::Ident(word) => word.to_ascii_uppercase(),
            _ => return Err(unsupported()),
        };
        pos += 1;
        match keyword.as_str() {
            "SET" => loop {
                let name = resolve_path(&tokens, pos, expression, ctx).ok_or_else(unsupported)?;
                let Some(Token { kind: TokenKind::Op(op), .. }) = tokens.get(pos + 1) else {
                    return Err(unsupported());
                };
                if op.as_str() != "=" {
                    return Err(unsupported());
                }
                let Some(value_token) = tokens.get(pos + 2) else {
                    return Err(unsupported());
                };
                let value = match &value_token.kind {
                    TokenKind::Value(_) => ctx
                        .value(&expression[value_token.start..value_token.end])?
                        .clone(),
                    _ => return Err(unsupported()),
                };
                item.insert(name, value);
                pos += 3;
                if matches!(tokens.get(pos).map(|t| &t.kind), Some(TokenKind::Comma)) {
                    pos += 1;
                } else {
                    break;
                }
            },
            "REMOVE" => loop {
                let name = resolve_path(&tokens, pos, expression, ctx).ok_or_else(unsupported)?;
                item.remove(&name);
                pos += 1;
                if matches!(tokens.get(pos).map(|t| &t.kind), Some(TokenKind::Comma)) {
                    pos += 1;
                } else {
                    break;
                }
            },
            _ => return Err(unsupported()),
        }
    }
    Ok(())
}

fn resolve_path(
    tokens: &[Token],
    pos: usize,
    expression: &str,
    ctx: &ExpressionContext<'_>,
) -> Option<String> {
    let token = tokens.get(pos)?;
    match &token.kind {
        TokenKind::Name(_) => Some(
            ctx.resolve_name(&expression[token.start..token.end])
                .to_owned(),
        ),
        TokenKind::Ident(name) => Some(name.clone()),
        _ => None,
    }
}
