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

//! The backing-store client capability.

use crate::error::StorageResult;

mod memory;
mod requests;

pub use memory::MemoryBackingStore;
pub use requests::*;

/// Data-plane surface of the backing store, as the façade consumes it.
///
/// Physical tables are provisioned out of band, so no control-plane calls
/// appear here: virtual `CreateTable`/`DeleteTable`/`DescribeTable` traffic
/// terminates in the description repository.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn get_item(&self, request: GetItemRequest) -> StorageResult<GetItemResponse>;

    async fn put_item(&self, request: PutItemRequest) -> StorageResult<PutItemResponse>;

    async fn update_item(&self, request: UpdateItemRequest) -> StorageResult<UpdateItemResponse>;

    async fn delete_item(&self, request: DeleteItemRequest) -> StorageResult<DeleteItemResponse>;

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> StorageResult<BatchGetItemResponse>;

    async fn query(&self, request: QueryRequest) -> StorageResult<QueryResponse>;

    async fn scan(&self, request: ScanRequest) -> StorageResult<ScanResponse>;
}

#[async_trait::async_trait]
impl<S: BackingStore + ?Sized> BackingStore for std::sync::Arc<S> {
    async fn get_item(&self, request: GetItemRequest) -> StorageResult<GetItemResponse> {
        (**self).get_item(request).await
    }

    async fn put_item(&self, request: PutItemRequest) -> StorageResult<PutItemResponse> {
        (**self).put_item(request).await
    }

    async fn update_item(&self, request: UpdateItemRequest) -> StorageResult<UpdateItemResponse> {
        (**self).update_item(request).await
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> StorageResult<DeleteItemResponse> {
        (**self).delete_item(request).await
    }

    async fn batch_get_item(
        &self,
        request: BatchGetItemRequest,
    ) -> StorageResult<BatchGetItemResponse> {
        (**self).batch_get_item(request).await
    }

    async fn query(&self, request: QueryRequest) -> StorageResult<QueryResponse> {
        (**self).query(request).await
    }

    async fn scan(&self, request: ScanRequest) -> StorageResult<ScanResponse> {
        (**self).scan(request).await
    }
}
