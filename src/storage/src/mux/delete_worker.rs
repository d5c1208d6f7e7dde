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

//! The background table-deletion worker: one durable task consuming a queue
//! of delete jobs. Failures are logged and dropped; there is no retry. The
//! worker drains whatever is queued even after the façade is gone.

use std::sync::Arc;

use tablemux_common::context::{scope, TenantId};
use thiserror_ext::AsReport;
use tokio::sync::mpsc;

use super::MuxInner;
use crate::store::BackingStore;

pub(crate) struct DeleteJob {
    pub tenant: TenantId,
    pub table: String,
}

pub(crate) fn spawn<S: BackingStore>(
    inner: Arc<MuxInner<S>>,
) -> mpsc::UnboundedSender<DeleteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DeleteJob>();
    tokio::spawn(async move {
        while let Some(DeleteJob { tenant, table }) = rx.recv().await {
            tracing::debug!(%tenant, %table, "processing queued table deletion");
            let deletion = inner.delete_table_sync(&tenant, &table);
            if let Err(error) = scope(tenant.clone(), deletion).await {
                tracing::error!(
                    error = %error.as_report(),
                    %tenant,
                    %table,
                    "background table deletion failed"
                );
            }
        }
        tracing::debug!("delete worker drained and stopped");
    });
    tx
}
