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

//! Per-(tenant, table) memoization of [`TableMapping`]s with single-flight
//! population: concurrent misses for the same key collapse into one
//! construction, and everyone waits on its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tablemux_common::context::TenantId;

use super::table::TableMapping;
use crate::error::{StorageError, StorageResult};

type CacheKey = (TenantId, String);
type BuildResult = Result<Arc<TableMapping>, Arc<StorageError>>;
type BuildFuture = Shared<BoxFuture<'static, BuildResult>>;

enum CacheEntry {
    Ready(Arc<TableMapping>),
    Building(BuildFuture),
}

/// The only mutable shared state on the hot path. Readers take the lock just
/// long enough to clone an `Arc` or a shared future; construction itself runs
/// outside the lock.
///
/// Failed constructions are never stored: every waiter of the failed flight
/// sees the error, and the next caller starts a fresh one.
#[derive(Default)]
pub struct TableMappingCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl TableMappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached mapping for `(tenant, table)`, or runs `build` to
    /// produce it. Only ever observed fully constructed.
    pub async fn get_or_build<F, Fut>(
        &self,
        tenant: &TenantId,
        table: &str,
        build: F,
    ) -> StorageResult<Arc<TableMapping>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<TableMapping>> + Send + 'static,
    {
        let key = (tenant.clone(), table.to_owned());
        let flight = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(CacheEntry::Ready(mapping)) => return Ok(mapping.clone()),
                Some(CacheEntry::Building(flight)) => flight.clone(),
                None => {
                    tracing::debug!(tenant = %key.0, table = %key.1, "building table mapping");
                    let flight = build()
                        .map(|result| result.map(Arc::new).map_err(Arc::new))
                        .boxed()
                        .shared();
                    entries.insert(key.clone(), CacheEntry::Building(flight.clone()));
                    flight
                }
            }
        };

        let result = flight.clone().await;

        // Whoever gets here first publishes the outcome; the check against
        // the flight we actually awaited tolerates eviction races.
        let mut entries = self.entries.lock();
        if let Some(CacheEntry::Building(current)) = entries.get(&key) {
            if current.ptr_eq(&flight) {
                match &result {
                    Ok(mapping) => {
                        entries.insert(key, CacheEntry::Ready(mapping.clone()));
                    }
                    Err(_) => {
                        entries.remove(&key);
                    }
                }
            }
        }
        result.map_err(StorageError::Shared)
    }

    /// Drops the entry for `(tenant, table)`. A dropped mapping is simply
    /// rebuilt on next use.
    pub fn evict(&self, tenant: &TenantId, table: &str) {
        self.entries
            .lock()
            .remove(&(tenant.clone(), table.to_owned()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tablemux_common::catalog::{KeyAttribute, PrimaryKey, TableSchema};
    use tablemux_common::types::ScalarKind;

    use super::*;
    use crate::mapping::table::{PhysicalTableCatalog, TableMappingFactory};

    fn t(id: &str) -> TenantId {
        TenantId::new(id)
    }

    fn build_mapping() -> StorageResult<TableMapping> {
        let schema = TableSchema::new(
            "V",
            PrimaryKey::hash_only(KeyAttribute::new("pk", ScalarKind::S)),
        );
        TableMappingFactory::new(PhysicalTableCatalog::standard()).create_table_mapping(&schema)
    }

    #[tokio::test]
    async fn test_hit_returns_same_mapping() {
        let cache = Arc::new(TableMappingCache::new());
        let first = cache
            .get_or_build(&t("t1"), "V", || async { build_mapping() })
            .await
            .unwrap();
        let second = cache
            .get_or_build(&t("t1"), "V", || async {
                panic!("cached entry must not rebuild")
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_build_once() {
        let cache = Arc::new(TableMappingCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let builds = builds.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_build(&t("t1"), "V", move || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        build_mapping()
                    })
                    .await
            }));
        }
        let mappings: Vec<_> = futures::future::try_join_all(tasks)
            .await
            .unwrap()
            .into_iter()
            .collect::<StorageResult<_>>()
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        for mapping in &mappings[1..] {
            assert!(Arc::ptr_eq(&mappings[0], mapping));
        }
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = TableMappingCache::new();
        let builds = AtomicUsize::new(0);

        let result = cache
            .get_or_build(&t("t1"), "V", || {
                builds.fetch_add(1, Ordering::SeqCst);
                async { Err(StorageError::TableNotFound("V".to_owned())) }
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());

        let result = cache
            .get_or_build(&t("t1"), "V", || {
                builds.fetch_add(1, Ordering::SeqCst);
                async { build_mapping() }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keys_are_tenant_scoped() {
        let cache = TableMappingCache::new();
        let builds = AtomicUsize::new(0);
        for tenant in ["t1", "t2"] {
            cache
                .get_or_build(&t(tenant), "V", || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    async { build_mapping() }
                })
                .await
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_evicted_mapping_rebuilds() {
        let cache = TableMappingCache::new();
        cache
            .get_or_build(&t("t1"), "V", || async { build_mapping() })
            .await
            .unwrap();
        cache.evict(&t("t1"), "V");
        assert!(cache.is_empty());
        cache
            .get_or_build(&t("t1"), "V", || async { build_mapping() })
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }
}
