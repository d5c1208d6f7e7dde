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

//! Tenant identity and the tenant-context provider.
//!
//! The mapping engine never reads the ambient context itself: the façade
//! resolves the tenant once per request through a [`TenantContextProvider`]
//! and threads it explicitly through every mapper call.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task::futures::TaskLocalFuture;

/// Opaque, non-empty identifier of the calling tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Returns the tenant on whose behalf the current unit of work runs.
///
/// `None` means the caller forgot to establish a tenant scope; every public
/// operation treats that as an error.
pub trait TenantContextProvider: Send + Sync + 'static {
    fn current_tenant(&self) -> Option<TenantId>;
}

tokio::task_local! {
    static TENANT: TenantId;
}

/// Runs `f` with `tenant` installed as the ambient tenant of the current
/// task. Used by callers at the request boundary and by background workers
/// re-entering a tenant's scope.
pub fn scope<F>(tenant: TenantId, f: F) -> TaskLocalFuture<TenantId, F>
where
    F: Future,
{
    TENANT.scope(tenant, f)
}

/// Reads the tenant installed by [`scope`] on the current task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalTenantContext;

impl TenantContextProvider for TaskLocalTenantContext {
    fn current_tenant(&self) -> Option<TenantId> {
        TENANT.try_with(Clone::clone).ok()
    }
}

/// A provider pinned to one tenant. Handy for single-tenant embeddings and
/// tests.
#[derive(Debug, Clone)]
pub struct StaticTenantContext(Option<TenantId>);

impl StaticTenantContext {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self(Some(tenant.into()))
    }

    /// A provider that never yields a tenant.
    pub fn empty() -> Self {
        Self(None)
    }
}

impl TenantContextProvider for StaticTenantContext {
    fn current_tenant(&self) -> Option<TenantId> {
        self.0.clone()
    }
}
