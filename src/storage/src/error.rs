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

use std::sync::Arc;

use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the virtualization layer.
///
/// Validation and mapping failures are raised before any backing-store call;
/// backend failures pass through unchanged.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed key, disallowed delimiter in a tenant or index name, or a
    /// missing required key attribute.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A rejected request option, or a request-wrapper accessor that does not
    /// apply to its carrier.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No physical table in the fixed set matches a virtual schema.
    #[error("no physical table matches the schema of `{0}`")]
    NoPhysicalTable(String),

    /// A decoded prefix lacks the expected delimiters or names a tenant other
    /// than the caller's.
    #[error("corrupt encoded value: {0}")]
    Corrupt(String),

    /// The description repository does not know the virtual table.
    #[error("virtual table `{0}` not found")]
    TableNotFound(String),

    /// Pass-through of a backing-store failure.
    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),

    /// Invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// A failure first observed by a concurrent request; see
    /// [`crate::mapping::TableMappingCache`].
    #[error(transparent)]
    Shared(Arc<StorageError>),
}

impl StorageError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn backend(e: impl Into<anyhow::Error>) -> Self {
        Self::Backend(e.into())
    }

    /// Whether this error (or the shared error it wraps) is of the
    /// `Unsupported` kind. Used by tests and by callers probing wrapper
    /// capabilities.
    pub fn is_unsupported(&self) -> bool {
        match self {
            Self::Unsupported(_) => true,
            Self::Shared(inner) => inner.is_unsupported(),
            _ => false,
        }
    }
}
