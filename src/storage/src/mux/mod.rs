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

//! The multiplexing façade.
//!
//! [`TableMux`] is what callers talk to. For every operation it resolves the
//! caller's tenant, looks up (or builds) the table mapping, rewrites the
//! request into physical form, invokes the backing store, and maps the
//! response back into the tenant's view. Scan additionally loops over
//! physical pages until something tenant-visible turns up or the cursor
//! ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use tablemux_common::arn::StreamArn;
use tablemux_common::catalog::{TableDescription, TableSchema, TableStatus};
use tablemux_common::context::{TenantContextProvider, TenantId};
use tablemux_common::types::{AttributeValue, Item, ScalarKind};
use tablemux_common::util::clock::{Clock, SystemClock};
use tokio::sync::mpsc;

use crate::descriptions::TableDescriptionRepo;
use crate::error::{StorageError, StorageResult};
use crate::mapping::{
    restrict_to_index_keys, BinaryPrefixFunction, DeleteRequestWrapper, PhysicalTableCatalog,
    PutRequestWrapper, StringPrefixFunction, TableMapping, TableMappingCache,
    TableMappingFactory, UpdateRequestWrapper,
};
use crate::store::{
    BackingStore, BatchGetItemRequest, BatchGetItemResponse, DeleteItemRequest,
    DeleteItemResponse, GetItemRequest, GetItemResponse, KeysAndAttributes, PutItemRequest,
    PutItemResponse, QueryRequest, QueryResponse, ScanRequest, ScanResponse, UpdateItemRequest,
    UpdateItemResponse,
};

mod delete_worker;

use delete_worker::DeleteJob;

/// Behavior knobs of the façade.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Identifier used in diagnostics only.
    pub name: String,
    /// When true, `delete_table` returns immediately and truncation plus
    /// schema removal run on the background worker.
    pub delete_table_async: bool,
    /// When false, `delete_table` leaves the tenant's rows orphaned in the
    /// physical table under the old prefix.
    pub truncate_on_delete_table: bool,
    /// Soft cap on how long Scan keeps chasing empty physical pages before
    /// handing the caller a resumption cursor.
    pub get_records_time_limit: Duration,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            name: "tablemux".to_owned(),
            delete_table_async: false,
            truncate_on_delete_table: true,
            get_records_time_limit: Duration::from_secs(10),
        }
    }
}

/// The multitenant virtualization façade over one backing store.
///
/// Cheap to share behind an `Arc`; all state on the hot path is immutable or
/// internally synchronized.
pub struct TableMux<S: BackingStore> {
    inner: Arc<MuxInner<S>>,
    delete_queue: Option<mpsc::UnboundedSender<DeleteJob>>,
}

impl<S: BackingStore> TableMux<S> {
    /// A façade reading real time. `delete_table_async = true` requires a
    /// running tokio runtime, since it spawns the delete worker.
    pub fn new(
        store: S,
        repo: Arc<dyn TableDescriptionRepo>,
        tenant_context: Arc<dyn TenantContextProvider>,
        catalog: PhysicalTableCatalog,
        options: MuxOptions,
    ) -> Self {
        Self::with_clock(
            store,
            repo,
            tenant_context,
            catalog,
            options,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        store: S,
        repo: Arc<dyn TableDescriptionRepo>,
        tenant_context: Arc<dyn TenantContextProvider>,
        catalog: PhysicalTableCatalog,
        options: MuxOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let delete_table_async = options.delete_table_async;
        let inner = Arc::new(MuxInner {
            store,
            repo,
            tenant_context,
            factory: TableMappingFactory::new(catalog),
            mappings: TableMappingCache::new(),
            clock,
            options,
        });
        let delete_queue = delete_table_async.then(|| delete_worker::spawn(inner.clone()));
        Self {
            inner,
            delete_queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    fn current_tenant(&self) -> StorageResult<TenantId> {
        self.inner.tenant_context.current_tenant().ok_or_else(|| {
            StorageError::invalid_argument("no tenant in the current context")
        })
    }

    pub async fn get_item(&self, request: GetItemRequest) -> StorageResult<GetItemResponse> {
        let tenant = self.current_tenant()?;
        self.inner.get_item(&tenant, request).await
    }

    pub async fn put_item(&self, request: PutItemRequest) -> StorageResult<PutItemResponse> {
        let tenant = self.current_tenant()?;
        self.inner.put_item(&tenant, request).await
    }

    pub async fn update_item(
        &self,
        request: UpdateItemRequest,
    ) -> StorageResult<UpdateItemResponse> {
        let tenant = self.current_tenant()?;
        self.inner.update_item(&tenant, request).await
    }

    pub async fn delete_item(
        &self,
        request: DeleteItemRequest,
    ) -> StorageResult<DeleteItemResponse> {
        let tenant = self.current_tenant()?;
        self.inner.delete_item(&tenant, request).await
    }

    pub async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> StorageResult<BatchGetItemResponse> {
        let tenant = self.current_tenant()?;
        self.inner.batch_get_item(&tenant, request).await
    }

    pub async fn query(&self, request: QueryRequest) -> StorageResult<QueryResponse> {
        let tenant = self.current_tenant()?;
        self.inner.query(&tenant, request).await
    }

    pub async fn scan(&self, request: ScanRequest) -> StorageResult<ScanResponse> {
        let tenant = self.current_tenant()?;
        self.inner.scan(&tenant, request).await
    }

    /// Registers a virtual table with the description repo. The physical
    /// table is chosen (and validated) here, but nothing is provisioned:
    /// physical tables pre-exist.
    pub async fn create_table(&self, schema: TableSchema) -> StorageResult<TableDescription> {
        let tenant = self.current_tenant()?;
        self.inner.create_table(&tenant, schema).await
    }

    pub async fn describe_table(&self, name: &str) -> StorageResult<TableDescription> {
        let tenant = self.current_tenant()?;
        self.inner.describe_table(&tenant, name).await
    }

    /// Deletes a virtual table: optionally truncates the tenant's rows, then
    /// removes the schema. With `delete_table_async` the last-known
    /// description returns immediately and the work happens on the
    /// background worker; its failures are logged, not surfaced.
    pub async fn delete_table(&self, name: &str) -> StorageResult<TableDescription> {
        let tenant = self.current_tenant()?;
        match &self.delete_queue {
            None => self.inner.delete_table_sync(&tenant, name).await,
            Some(queue) => {
                let mut description =
                    self.inner.repo.get_table_description(&tenant, name).await?;
                description.status = TableStatus::Deleting;
                queue
                    .send(DeleteJob {
                        tenant,
                        table: name.to_owned(),
                    })
                    .map_err(|_| StorageError::internal("delete worker has shut down"))?;
                Ok(description)
            }
        }
    }
}

pub(crate) struct MuxInner<S: BackingStore> {
    store: S,
    repo: Arc<dyn TableDescriptionRepo>,
    tenant_context: Arc<dyn TenantContextProvider>,
    factory: TableMappingFactory,
    mappings: TableMappingCache,
    clock: Arc<dyn Clock>,
    options: MuxOptions,
}

impl<S: BackingStore> MuxInner<S> {
    async fn table_mapping(
        &self,
        tenant: &TenantId,
        table: &str,
    ) -> StorageResult<Arc<TableMapping>> {
        let repo = self.repo.clone();
        let factory = self.factory.clone();
        let tenant_owned = tenant.clone();
        let table_owned = table.to_owned();
        self.mappings
            .get_or_build(tenant, table, move || async move {
                let description = repo
                    .get_table_description(&tenant_owned, &table_owned)
                    .await?;
                factory.create_table_mapping(&description.schema)
            })
            .await
    }

    async fn get_item(
        &self,
        tenant: &TenantId,
        request: GetItemRequest,
    ) -> StorageResult<GetItemResponse> {
        reject_read_options(
            "GetItem",
            request.consistent_read,
            request.attributes_to_get.is_some(),
            request.projection_expression.is_some(),
            request.expression_attribute_names.is_some(),
        )?;
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        let physical = GetItemRequest {
            table_name: mapping.physical_table().name.clone(),
            key: mapping.key_mapper().apply_key(tenant, &request.key)?,
            ..Default::default()
        };
        let response = self.store.get_item(physical).await?;
        let item = response
            .item
            .map(|item| mapping.item_mapper().reverse(tenant, &item))
            .transpose()?;
        Ok(GetItemResponse { item })
    }

    async fn put_item(
        &self,
        tenant: &TenantId,
        mut request: PutItemRequest,
    ) -> StorageResult<PutItemResponse> {
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        mapping
            .condition_mapper()
            .apply(tenant, &mut PutRequestWrapper(&mut request), None)?;
        request.item = mapping.item_mapper().apply(tenant, &request.item)?;
        request.table_name = mapping.physical_table().name.clone();
        self.store.put_item(request).await
    }

    async fn update_item(
        &self,
        tenant: &TenantId,
        mut request: UpdateItemRequest,
    ) -> StorageResult<UpdateItemResponse> {
        if request.attribute_updates.is_some() {
            return Err(StorageError::unsupported(
                "legacy attributeUpdates on UpdateItem",
            ));
        }
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        mapping
            .condition_mapper()
            .apply(tenant, &mut UpdateRequestWrapper(&mut request), None)?;
        request.key = mapping.key_mapper().apply_key(tenant, &request.key)?;
        request.table_name = mapping.physical_table().name.clone();
        let mut response = self.store.update_item(request).await?;
        response.attributes = response
            .attributes
            .map(|attributes| mapping.item_mapper().reverse(tenant, &attributes))
            .transpose()?;
        Ok(response)
    }

    async fn delete_item(
        &self,
        tenant: &TenantId,
        mut request: DeleteItemRequest,
    ) -> StorageResult<DeleteItemResponse> {
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        mapping
            .condition_mapper()
            .apply(tenant, &mut DeleteRequestWrapper(&mut request), None)?;
        request.key = mapping.key_mapper().apply_key(tenant, &request.key)?;
        request.table_name = mapping.physical_table().name.clone();
        let mut response = self.store.delete_item(request).await?;
        response.attributes = response
            .attributes
            .map(|attributes| mapping.item_mapper().reverse(tenant, &attributes))
            .transpose()?;
        Ok(response)
    }

    async fn batch_get_item(
        &self,
        tenant: &TenantId,
        request: BatchGetItemRequest,
    ) -> StorageResult<BatchGetItemResponse> {
        for keys_and_attributes in request.request_items.values() {
            reject_read_options(
                "BatchGetItem",
                keys_and_attributes.consistent_read,
                keys_and_attributes.attributes_to_get.is_some(),
                keys_and_attributes.projection_expression.is_some(),
                keys_and_attributes.expression_attribute_names.is_some(),
            )?;
        }

        let resolved = futures::future::try_join_all(request.request_items.keys().map(
            |table| {
                let table = table.clone();
                async move {
                    self.table_mapping(tenant, &table)
                        .await
                        .map(|mapping| (table, mapping))
                }
            },
        ))
        .await?;
        let mappings: HashMap<String, Arc<TableMapping>> = resolved.into_iter().collect();

        // Distinct virtual tables may share a physical table, so requests
        // merge going down and responses demultiplex by key prefix coming
        // back.
        let mut physical_items: HashMap<String, KeysAndAttributes> = HashMap::new();
        let mut sharing: HashMap<String, Vec<String>> = HashMap::new();
        for (table, keys_and_attributes) in request.request_items {
            let mapping = &mappings[&table];
            let key_mapper = mapping.key_mapper();
            let physical_name = mapping.physical_table().name.clone();
            let slot = physical_items.entry(physical_name.clone()).or_default();
            for key in &keys_and_attributes.keys {
                slot.keys.push(key_mapper.apply_key(tenant, key)?);
            }
            sharing.entry(physical_name).or_default().push(table);
        }

        let response = self
            .store
            .batch_get_item(BatchGetItemRequest {
                request_items: physical_items,
            })
            .await?;

        let mut result = BatchGetItemResponse::default();
        for (physical_table, items) in response.responses {
            let candidates = sharing.get(&physical_table).ok_or_else(|| {
                StorageError::internal(format!(
                    "batch response names unrequested table `{}`",
                    physical_table
                ))
            })?;
            for item in items {
                let (virtual_table, mapping) =
                    demux_by_prefix(tenant, &mappings, candidates, &item)?;
                result
                    .responses
                    .entry(virtual_table)
                    .or_default()
                    .push(mapping.item_mapper().reverse(tenant, &item)?);
            }
        }
        for (physical_table, keys_and_attributes) in response.unprocessed_keys {
            let candidates = sharing.get(&physical_table).ok_or_else(|| {
                StorageError::internal(format!(
                    "batch response names unrequested table `{}`",
                    physical_table
                ))
            })?;
            for key in keys_and_attributes.keys {
                let (virtual_table, mapping) =
                    demux_by_prefix(tenant, &mappings, candidates, &key)?;
                result
                    .unprocessed_keys
                    .entry(virtual_table)
                    .or_insert_with(Default::default)
                    .keys
                    .push(mapping.key_mapper().reverse_key(tenant, &key)?);
            }
        }
        Ok(result)
    }

    async fn query(
        &self,
        tenant: &TenantId,
        mut request: QueryRequest,
    ) -> StorageResult<QueryResponse> {
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        mapping
            .query_and_scan_mapper()
            .apply_query(tenant, &mut request)?;
        request.table_name = mapping.physical_table().name.clone();

        let response = self.store.query(request).await?;
        let item_mapper = mapping.item_mapper();
        let items: Vec<_> = response
            .items
            .iter()
            .map(|item| item_mapper.reverse(tenant, item))
            .try_collect()?;
        let last_evaluated_key = response
            .last_evaluated_key
            .map(|key| item_mapper.reverse(tenant, &key))
            .transpose()?;
        Ok(QueryResponse {
            items,
            last_evaluated_key,
        })
    }

    /// The scan-paging loop. A physical page may contain nothing but other
    /// tenants' rows, which the isolation filter eliminates; an empty page
    /// with a live cursor therefore means "keep going", not "end of data".
    async fn scan(&self, tenant: &TenantId, request: ScanRequest) -> StorageResult<ScanResponse> {
        let mapping = self.table_mapping(tenant, &request.table_name).await?;
        let index = mapping.index(request.index_name.as_deref())?.clone();
        let mut physical = request;
        mapping
            .query_and_scan_mapper()
            .apply_scan(tenant, &mut physical)?;
        physical.table_name = mapping.physical_table().name.clone();

        let item_mapper = mapping.item_mapper();
        let deadline = self.clock.now() + self.options.get_records_time_limit;
        loop {
            let response = self.store.scan(physical.clone()).await?;
            if !response.items.is_empty() {
                let items: Vec<_> = response
                    .items
                    .iter()
                    .map(|item| item_mapper.reverse(tenant, item))
                    .try_collect()?;
                // The physical cursor is scoped to the shared table; a
                // tenant-visible cursor is recomputed from the last item
                // instead.
                let last_evaluated_key = match response.last_evaluated_key {
                    Some(_) => Some(restrict_to_index_keys(
                        &index,
                        items.last().expect("items are non-empty"),
                    )?),
                    None => None,
                };
                return Ok(ScanResponse {
                    items,
                    last_evaluated_key,
                });
            }
            let Some(cursor) = response.last_evaluated_key else {
                return Ok(ScanResponse::default());
            };
            if self.clock.now() >= deadline {
                tracing::debug!(
                    mux = %self.options.name,
                    table = %physical.table_name,
                    "scan time budget exhausted, returning resumption cursor"
                );
                // The cursor row may belong to another tenant; decode it
                // structurally so the caller can resume.
                return Ok(ScanResponse {
                    items: Vec::new(),
                    last_evaluated_key: Some(item_mapper.reverse_lenient(&cursor)?),
                });
            }
            tracing::trace!(
                mux = %self.options.name,
                table = %physical.table_name,
                "physical page had no tenant-visible rows, continuing"
            );
            physical.exclusive_start_key = Some(cursor);
        }
    }

    async fn create_table(
        &self,
        tenant: &TenantId,
        schema: TableSchema,
    ) -> StorageResult<TableDescription> {
        // Fail before persisting anything when no physical table can host
        // the schema.
        self.factory.create_table_mapping(&schema)?;
        let mut description = self.repo.create_table(tenant, schema).await?;
        self.rewrite_stream_arn(tenant, &mut description)?;
        Ok(description)
    }

    async fn describe_table(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> StorageResult<TableDescription> {
        let mut description = self.repo.get_table_description(tenant, name).await?;
        // Virtual tables have no provisioning lifecycle of their own.
        description.status = TableStatus::Active;
        self.rewrite_stream_arn(tenant, &mut description)?;
        Ok(description)
    }

    pub(crate) async fn delete_table_sync(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> StorageResult<TableDescription> {
        if self.options.truncate_on_delete_table {
            self.truncate_table(tenant, name).await?;
        }
        let description = self.repo.delete_table(tenant, name).await?;
        self.mappings.evict(tenant, name);
        Ok(description)
    }

    /// Deletes every row of the tenant's virtual table, through the public
    /// Scan/DeleteItem path: the scan is tenant-filtered, so only the
    /// caller's rows are touched, and a large table is truncated page by
    /// page.
    async fn truncate_table(&self, tenant: &TenantId, name: &str) -> StorageResult<()> {
        let mapping = self.table_mapping(tenant, name).await?;
        let mut exclusive_start_key = None;
        loop {
            let page = self
                .scan(
                    tenant,
                    ScanRequest {
                        table_name: name.to_owned(),
                        exclusive_start_key,
                        ..Default::default()
                    },
                )
                .await?;
            for item in &page.items {
                let key = restrict_to_index_keys(mapping.primary_index(), item)?;
                self.delete_item(
                    tenant,
                    DeleteItemRequest {
                        table_name: name.to_owned(),
                        key,
                        ..Default::default()
                    },
                )
                .await?;
            }
            if page.last_evaluated_key.is_none() {
                return Ok(());
            }
            exclusive_start_key = page.last_evaluated_key;
        }
    }

    fn rewrite_stream_arn(
        &self,
        tenant: &TenantId,
        description: &mut TableDescription,
    ) -> StorageResult<()> {
        if !description.schema.stream_enabled {
            description.latest_stream_arn = None;
            return Ok(());
        }
        let mapping = self.factory.create_table_mapping(&description.schema)?;
        description.latest_stream_arn =
            mapping.physical_table().stream_arn.as_ref().map(|arn| {
                StreamArn::new(arn.clone(), tenant.clone(), description.schema.name.clone())
                    .to_string()
            });
        Ok(())
    }
}

fn reject_read_options(
    operation: &str,
    consistent_read: Option<bool>,
    attributes_to_get: bool,
    projection_expression: bool,
    expression_attribute_names: bool,
) -> StorageResult<()> {
    let reject = |option: &str| {
        Err(StorageError::unsupported(format!(
            "{} on {}",
            option, operation
        )))
    };
    if consistent_read == Some(true) {
        return reject("consistentRead");
    }
    if attributes_to_get {
        return reject("attributesToGet");
    }
    if projection_expression {
        return reject("projectionExpression");
    }
    if expression_attribute_names {
        return reject("expressionAttributeNames");
    }
    Ok(())
}

/// Figures out which of the `candidates` virtual tables a physical item (or
/// key) belongs to by decoding its hash-key prefix. All candidates share the
/// physical table, hence the physical hash attribute.
fn demux_by_prefix<'m>(
    tenant: &TenantId,
    mappings: &'m HashMap<String, Arc<TableMapping>>,
    candidates: &[String],
    item: &Item,
) -> StorageResult<(String, &'m Arc<TableMapping>)> {
    let hash = &mappings[&candidates[0]].primary_index().hash;
    let value = item.get(&hash.target.name).ok_or_else(|| {
        StorageError::internal(format!(
            "batch response item is missing the hash attribute `{}`",
            hash.target.name
        ))
    })?;
    let (decoded_tenant, virtual_table) = match (hash.target.kind, value) {
        (ScalarKind::S, AttributeValue::S(s)) => {
            let decoded = StringPrefixFunction.reverse(s)?;
            (decoded.tenant, decoded.virtual_index)
        }
        (ScalarKind::B, AttributeValue::B(b)) => {
            let decoded = BinaryPrefixFunction.reverse(b)?;
            (decoded.tenant, decoded.virtual_index)
        }
        _ => {
            return Err(StorageError::corrupt(format!(
                "hash attribute `{}` has an unexpected kind",
                hash.target.name
            )))
        }
    };
    if &decoded_tenant != tenant {
        return Err(StorageError::corrupt(format!(
            "batch response item belongs to tenant `{}`, not `{}`",
            decoded_tenant, tenant
        )));
    }
    let mapping = candidates
        .iter()
        .find(|candidate| **candidate == virtual_table)
        .and_then(|candidate| mappings.get(candidate))
        .ok_or_else(|| {
            StorageError::internal(format!(
                "batch response item belongs to unrequested table `{}`",
                virtual_table
            ))
        })?;
    Ok((virtual_table, mapping))
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;
    use tablemux_common::catalog::{
        KeyAttribute, PhysicalTableDesc, PrimaryKey, Projection, SecondaryIndex,
    };
    use tablemux_common::context::{scope, TaskLocalTenantContext};
    use tablemux_common::util::clock::ManualClock;

    use super::*;
    use crate::descriptions::InMemoryTableDescriptionRepo;
    use crate::store::MemoryBackingStore;

    struct TestEnv {
        mux: TableMux<Arc<MemoryBackingStore>>,
        store: Arc<MemoryBackingStore>,
        repo: Arc<InMemoryTableDescriptionRepo>,
    }

    fn env() -> TestEnv {
        env_with(
            MuxOptions::default(),
            PhysicalTableCatalog::standard(),
            Arc::new(SystemClock),
        )
    }

    fn env_with(
        options: MuxOptions,
        catalog: PhysicalTableCatalog,
        clock: Arc<dyn Clock>,
    ) -> TestEnv {
        let store = Arc::new(MemoryBackingStore::with_tables(
            catalog.tables().iter().cloned(),
        ));
        let repo = Arc::new(InMemoryTableDescriptionRepo::new());
        let mux = TableMux::with_clock(
            store.clone(),
            repo.clone(),
            Arc::new(TaskLocalTenantContext),
            catalog,
            options,
            clock,
        );
        TestEnv { mux, store, repo }
    }

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_owned())
    }

    fn n(value: &str) -> AttributeValue {
        AttributeValue::N(value.to_owned())
    }

    fn schema_s(name: &str) -> TableSchema {
        TableSchema::new(
            name,
            PrimaryKey::hash_only(KeyAttribute::new("pk", ScalarKind::S)),
        )
    }

    async fn create(env: &TestEnv, tenant: &str, schema: TableSchema) {
        scope(TenantId::new(tenant), env.mux.create_table(schema))
            .await
            .unwrap();
    }

    async fn put(env: &TestEnv, tenant: &str, table: &str, item: Item) {
        scope(
            TenantId::new(tenant),
            env.mux.put_item(PutItemRequest {
                table_name: table.to_owned(),
                item,
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    }

    async fn get(env: &TestEnv, tenant: &str, table: &str, key: Item) -> Option<Item> {
        scope(
            TenantId::new(tenant),
            env.mux.get_item(GetItemRequest {
                table_name: table.to_owned(),
                key,
                ..Default::default()
            }),
        )
        .await
        .unwrap()
        .item
    }

    async fn scan_all(env: &TestEnv, tenant: &str, request: ScanRequest) -> ScanResponse {
        scope(TenantId::new(tenant), env.mux.scan(request))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        let item = hashmap! { "pk".to_owned() => s("a"), "v".to_owned() => s("x") };
        put(&env, "t1", "V", item.clone()).await;

        assert_eq!(
            get(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await,
            Some(item)
        );

        // The backing store observed the tenant-prefixed hash key.
        let raw = env
            .store
            .get_item(GetItemRequest {
                table_name: "mt_shared_s".to_owned(),
                key: hashmap! { "hk".to_owned() => s("t1.V.a") },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(raw.item.unwrap().get("v"), Some(&s("x")));
    }

    #[tokio::test]
    async fn test_tenant_isolation_on_get() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        create(&env, "t2", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;

        assert_eq!(
            get(&env, "t2", "V", hashmap! { "pk".to_owned() => s("a") }).await,
            None
        );
    }

    #[tokio::test]
    async fn test_scan_skips_other_tenants() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        create(&env, "t2", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;
        put(&env, "t2", "V", hashmap! { "pk".to_owned() => s("b") }).await;

        let response = scan_all(
            &env,
            "t1",
            ScanRequest {
                table_name: "V".to_owned(),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(response.items, vec![hashmap! { "pk".to_owned() => s("a") }]);
        assert_eq!(response.last_evaluated_key, None);
    }

    #[tokio::test]
    async fn test_scan_pages_past_foreign_rows() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        create(&env, "t2", schema_s("V")).await;
        // t1's row sorts first in the shared table, so t2's scan sees a
        // physical page with zero visible items and must keep going.
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;
        put(&env, "t2", "V", hashmap! { "pk".to_owned() => s("b") }).await;

        let response = scan_all(
            &env,
            "t2",
            ScanRequest {
                table_name: "V".to_owned(),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(response.items, vec![hashmap! { "pk".to_owned() => s("b") }]);
        assert_eq!(response.last_evaluated_key, None);
    }

    #[tokio::test]
    async fn test_scan_cursor_is_virtual_and_resumable() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        for pk in ["a", "b", "c"] {
            put(&env, "t1", "V", hashmap! { "pk".to_owned() => s(pk) }).await;
        }

        let page = scan_all(
            &env,
            "t1",
            ScanRequest {
                table_name: "V".to_owned(),
                limit: Some(2),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(page.items.len(), 2);
        // The cursor is the last *virtual* item restricted to key
        // attributes, not the physical cursor.
        assert_eq!(
            page.last_evaluated_key,
            Some(hashmap! { "pk".to_owned() => s("b") })
        );

        let rest = scan_all(
            &env,
            "t1",
            ScanRequest {
                table_name: "V".to_owned(),
                exclusive_start_key: page.last_evaluated_key,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(rest.items, vec![hashmap! { "pk".to_owned() => s("c") }]);
        assert_eq!(rest.last_evaluated_key, None);
    }

    #[tokio::test]
    async fn test_scan_soft_time_limit_returns_cursor() {
        let clock = ManualClock::new();
        let env = env_with(
            MuxOptions {
                get_records_time_limit: Duration::ZERO,
                ..Default::default()
            },
            PhysicalTableCatalog::standard(),
            Arc::new(clock),
        );
        create(&env, "t1", schema_s("V")).await;
        create(&env, "t2", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("b") }).await;

        // t2 sees only foreign rows; with a zero budget the loop gives up
        // after the first empty page and hands back a resumption cursor.
        let response = scan_all(
            &env,
            "t2",
            ScanRequest {
                table_name: "V".to_owned(),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await;
        assert!(response.items.is_empty());
        assert!(response.last_evaluated_key.is_some());
    }

    #[tokio::test]
    async fn test_condition_rewrite_on_update() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        put(
            &env,
            "t1",
            "V",
            hashmap! { "pk".to_owned() => s("a"), "v".to_owned() => s("x") },
        )
        .await;

        scope(
            TenantId::new("t1"),
            env.mux.update_item(UpdateItemRequest {
                table_name: "V".to_owned(),
                key: hashmap! { "pk".to_owned() => s("a") },
                update_expression: Some("SET #v = :v".to_owned()),
                condition_expression: Some("attribute_exists(#k)".to_owned()),
                expression_attribute_names: Some(hashmap! {
                    "#k".to_owned() => "pk".to_owned(),
                    "#v".to_owned() => "v".to_owned(),
                }),
                expression_attribute_values: Some(hashmap! {
                    ":v".to_owned() => s("y"),
                }),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            get(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await,
            Some(hashmap! { "pk".to_owned() => s("a"), "v".to_owned() => s("y") })
        );
    }

    #[tokio::test]
    async fn test_update_condition_failure_surfaces_backend_error() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        let result = scope(
            TenantId::new("t1"),
            env.mux.update_item(UpdateItemRequest {
                table_name: "V".to_owned(),
                key: hashmap! { "pk".to_owned() => s("missing") },
                update_expression: Some("SET #v = :v".to_owned()),
                condition_expression: Some("attribute_exists(pk)".to_owned()),
                expression_attribute_names: Some(hashmap! {
                    "#v".to_owned() => "v".to_owned(),
                }),
                expression_attribute_values: Some(hashmap! {
                    ":v".to_owned() => s("y"),
                }),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_batch_get_demuxes_shared_physical_table() {
        let env = env();
        create(&env, "t1", schema_s("V1")).await;
        create(&env, "t1", schema_s("V2")).await;
        put(
            &env,
            "t1",
            "V1",
            hashmap! { "pk".to_owned() => s("a"), "v".to_owned() => s("1") },
        )
        .await;
        put(
            &env,
            "t1",
            "V2",
            hashmap! { "pk".to_owned() => s("b"), "v".to_owned() => s("2") },
        )
        .await;

        let response = scope(
            TenantId::new("t1"),
            env.mux.batch_get_item(BatchGetItemRequest {
                request_items: hashmap! {
                    "V1".to_owned() => KeysAndAttributes::of(vec![
                        hashmap! { "pk".to_owned() => s("a") },
                    ]),
                    "V2".to_owned() => KeysAndAttributes::of(vec![
                        hashmap! { "pk".to_owned() => s("b") },
                    ]),
                },
            }),
        )
        .await
        .unwrap();

        // Both virtual tables ride the same physical table; items come back
        // under their own names with their own keys.
        assert_eq!(
            response.responses.get("V1"),
            Some(&vec![
                hashmap! { "pk".to_owned() => s("a"), "v".to_owned() => s("1") }
            ])
        );
        assert_eq!(
            response.responses.get("V2"),
            Some(&vec![
                hashmap! { "pk".to_owned() => s("b"), "v".to_owned() => s("2") }
            ])
        );
        assert!(response.unprocessed_keys.is_empty());
    }

    #[tokio::test]
    async fn test_batch_get_unprocessed_keys_are_virtual() {
        let env = env();
        create(&env, "t1", schema_s("V1")).await;
        create(&env, "t1", schema_s("V2")).await;
        put(&env, "t1", "V1", hashmap! { "pk".to_owned() => s("a") }).await;
        put(&env, "t1", "V2", hashmap! { "pk".to_owned() => s("b") }).await;
        env.store.set_max_batch_items(Some(1));

        let response = scope(
            TenantId::new("t1"),
            env.mux.batch_get_item(BatchGetItemRequest {
                request_items: hashmap! {
                    "V1".to_owned() => KeysAndAttributes::of(vec![
                        hashmap! { "pk".to_owned() => s("a") },
                    ]),
                    "V2".to_owned() => KeysAndAttributes::of(vec![
                        hashmap! { "pk".to_owned() => s("b") },
                    ]),
                },
            }),
        )
        .await
        .unwrap();

        let returned: usize = response.responses.values().map(Vec::len).sum();
        let unprocessed: usize = response.unprocessed_keys.values().map(|k| k.keys.len()).sum();
        assert_eq!((returned, unprocessed), (1, 1));
        // The caller can retry verbatim: the unprocessed key is under the
        // virtual table name with the virtual key value.
        let (table, keys_and_attributes) =
            response.unprocessed_keys.into_iter().next().unwrap();
        let expected_pk = if table == "V1" { "a" } else { "b" };
        assert_eq!(
            keys_and_attributes.keys,
            vec![hashmap! { "pk".to_owned() => s(expected_pk) }]
        );
    }

    #[tokio::test]
    async fn test_query_hash_and_range() {
        let env = env();
        let schema = TableSchema::new(
            "Q",
            PrimaryKey::hash_and_range(
                KeyAttribute::new("pk", ScalarKind::S),
                KeyAttribute::new("rk", ScalarKind::N),
            ),
        );
        create(&env, "t1", schema).await;
        for (rk, v) in [("2", "second"), ("1", "first")] {
            put(
                &env,
                "t1",
                "Q",
                hashmap! {
                    "pk".to_owned() => s("a"),
                    "rk".to_owned() => n(rk),
                    "v".to_owned() => s(v),
                },
            )
            .await;
        }
        put(
            &env,
            "t1",
            "Q",
            hashmap! { "pk".to_owned() => s("other"), "rk".to_owned() => n("1") },
        )
        .await;

        let response = scope(
            TenantId::new("t1"),
            env.mux.query(QueryRequest {
                table_name: "Q".to_owned(),
                key_condition_expression: Some("#p = :h".to_owned()),
                expression_attribute_names: Some(hashmap! {
                    "#p".to_owned() => "pk".to_owned(),
                }),
                expression_attribute_values: Some(hashmap! {
                    ":h".to_owned() => s("a"),
                }),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.items.len(), 2);
        // Range keys pass through unprefixed and keep their order.
        assert_eq!(response.items[0].get("rk"), Some(&n("1")));
        assert_eq!(response.items[1].get("rk"), Some(&n("2")));
    }

    #[tokio::test]
    async fn test_query_on_secondary_index() {
        let env = env();
        let schema = schema_s("V").with_secondary_index(SecondaryIndex {
            name: "by_owner".to_owned(),
            key: PrimaryKey::hash_only(KeyAttribute::new("owner", ScalarKind::S)),
            projection: Projection::All,
        });
        create(&env, "t1", schema).await;
        put(
            &env,
            "t1",
            "V",
            hashmap! { "pk".to_owned() => s("1"), "owner".to_owned() => s("alice") },
        )
        .await;
        put(
            &env,
            "t1",
            "V",
            hashmap! { "pk".to_owned() => s("2"), "owner".to_owned() => s("bob") },
        )
        .await;

        let response = scope(
            TenantId::new("t1"),
            env.mux.query(QueryRequest {
                table_name: "V".to_owned(),
                index_name: Some("by_owner".to_owned()),
                key_condition_expression: Some("owner = :o".to_owned()),
                expression_attribute_values: Some(hashmap! {
                    ":o".to_owned() => s("alice"),
                }),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].get("pk"), Some(&s("1")));
        assert_eq!(response.items[0].get("owner"), Some(&s("alice")));
    }

    #[tokio::test]
    async fn test_delete_table_truncates_only_tenant_rows() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        create(&env, "t2", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("b") }).await;
        put(&env, "t2", "V", hashmap! { "pk".to_owned() => s("c") }).await;

        scope(TenantId::new("t1"), env.mux.delete_table("V"))
            .await
            .unwrap();

        assert!(matches!(
            env.repo
                .get_table_description(&TenantId::new("t1"), "V")
                .await,
            Err(StorageError::TableNotFound(_))
        ));
        // t2's row survived t1's truncate.
        assert_eq!(env.store.row_count("mt_shared_s"), 1);
        assert_eq!(
            get(&env, "t2", "V", hashmap! { "pk".to_owned() => s("c") }).await,
            Some(hashmap! { "pk".to_owned() => s("c") })
        );
    }

    #[tokio::test]
    async fn test_delete_table_without_truncate_keeps_rows() {
        let env = env_with(
            MuxOptions {
                truncate_on_delete_table: false,
                ..Default::default()
            },
            PhysicalTableCatalog::standard(),
            Arc::new(SystemClock),
        );
        create(&env, "t1", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;

        scope(TenantId::new("t1"), env.mux.delete_table("V"))
            .await
            .unwrap();

        // The schema is gone but the rows are orphaned under the old prefix.
        assert_eq!(env.store.row_count("mt_shared_s"), 1);
    }

    #[tokio::test]
    async fn test_delete_table_async_drains_in_background() {
        let env = env_with(
            MuxOptions {
                delete_table_async: true,
                ..Default::default()
            },
            PhysicalTableCatalog::standard(),
            Arc::new(SystemClock),
        );
        create(&env, "t1", schema_s("V")).await;
        put(&env, "t1", "V", hashmap! { "pk".to_owned() => s("a") }).await;

        let description = scope(TenantId::new("t1"), env.mux.delete_table("V"))
            .await
            .unwrap();
        assert_eq!(description.status, TableStatus::Deleting);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if env
                .repo
                .get_table_description(&TenantId::new("t1"), "V")
                .await
                .is_err()
            {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "background deletion did not finish"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(env.store.row_count("mt_shared_s"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_options_rejected() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;

        let get_request = |mutate: fn(&mut GetItemRequest)| {
            let mut request = GetItemRequest {
                table_name: "V".to_owned(),
                key: hashmap! { "pk".to_owned() => s("a") },
                ..Default::default()
            };
            mutate(&mut request);
            request
        };
        for request in [
            get_request(|r| r.consistent_read = Some(true)),
            get_request(|r| r.attributes_to_get = Some(vec!["v".to_owned()])),
            get_request(|r| r.projection_expression = Some("v".to_owned())),
            get_request(|r| {
                r.expression_attribute_names = Some(hashmap! {
                    "#v".to_owned() => "v".to_owned(),
                })
            }),
        ] {
            let result = scope(TenantId::new("t1"), env.mux.get_item(request)).await;
            assert!(matches!(result, Err(StorageError::Unsupported(_))));
        }

        let result = scope(
            TenantId::new("t1"),
            env.mux.update_item(UpdateItemRequest {
                table_name: "V".to_owned(),
                key: hashmap! { "pk".to_owned() => s("a") },
                attribute_updates: Some(HashMap::new()),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));

        let result = scope(
            TenantId::new("t1"),
            env.mux.batch_get_item(BatchGetItemRequest {
                request_items: hashmap! {
                    "V".to_owned() => KeysAndAttributes {
                        keys: vec![hashmap! { "pk".to_owned() => s("a") }],
                        projection_expression: Some("v".to_owned()),
                        ..Default::default()
                    },
                },
            }),
        )
        .await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_missing_tenant_context_rejected() {
        let env = env();
        let result = env
            .mux
            .get_item(GetItemRequest {
                table_name: "V".to_owned(),
                key: hashmap! { "pk".to_owned() => s("a") },
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_create_table_requires_physical_match() {
        let env = env();
        let mut schema = schema_s("V");
        for i in 0..10 {
            schema = schema.with_secondary_index(SecondaryIndex {
                name: format!("idx{}", i),
                key: PrimaryKey::hash_only(KeyAttribute::new("ik", ScalarKind::S)),
                projection: Projection::All,
            });
        }
        let result = scope(TenantId::new("t1"), env.mux.create_table(schema)).await;
        assert!(matches!(result, Err(StorageError::NoPhysicalTable(_))));
        // Nothing was persisted.
        assert!(matches!(
            scope(TenantId::new("t1"), env.mux.describe_table("V")).await,
            Err(StorageError::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_arn_rewrite_and_parse() {
        const PHYSICAL_ARN: &str =
            "arn:aws:dynamodb:us-east-1:123456789012:table/mt_shared_s/stream/2026";
        let catalog = PhysicalTableCatalog::new(vec![PhysicalTableDesc::new(
            "mt_shared_s",
            PrimaryKey::hash_only(KeyAttribute::new("hk", ScalarKind::S)),
        )
        .with_stream_arn(PHYSICAL_ARN)])
        .unwrap();
        let env = env_with(MuxOptions::default(), catalog, Arc::new(SystemClock));

        let description = scope(
            TenantId::new("t1"),
            env.mux.create_table(schema_s("V").with_streams()),
        )
        .await
        .unwrap();
        let arn = description.latest_stream_arn.unwrap();
        assert_eq!(arn, format!("{PHYSICAL_ARN}::t1::V"));

        let parsed: StreamArn = arn.parse().unwrap();
        assert_eq!(parsed.physical_arn, PHYSICAL_ARN);
        assert_eq!(parsed.tenant, TenantId::new("t1"));
        assert_eq!(parsed.virtual_table, "V");

        let described = scope(TenantId::new("t1"), env.mux.describe_table("V"))
            .await
            .unwrap();
        assert_eq!(described.status, TableStatus::Active);
        assert_eq!(described.latest_stream_arn, Some(arn));
    }

    #[tokio::test]
    async fn test_get_missing_item_is_none() {
        let env = env();
        create(&env, "t1", schema_s("V")).await;
        assert_eq!(
            get(&env, "t1", "V", hashmap! { "pk".to_owned() => s("nope") }).await,
            None
        );
    }
}
