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

//! Per-attribute mapping between a virtual field and its physical
//! counterpart, including tenant-prefix application and scalar coercion.

use bytes::Bytes;
use tablemux_common::catalog::KeyAttribute;
use tablemux_common::context::TenantId;
use tablemux_common::types::{AttributeValue, ScalarKind};

use super::prefix::{BinaryPrefixFunction, StringPrefixFunction};
use crate::error::{StorageError, StorageResult};

/// Whether a field belongs to the table's own key or to a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Table,
    SecondaryIndex,
}

/// Ties one virtual attribute to one physical attribute.
///
/// `source` is the virtual side and `target` the physical side when mapping a
/// request down; [`FieldMapping::reversed`] swaps them for the way back up.
/// Context-aware mappings carry the tenant prefix (hash keys); the rest only
/// rename and coerce (range keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: KeyAttribute,
    pub target: KeyAttribute,
    pub virtual_index_name: String,
    pub physical_index_name: String,
    pub index_type: IndexType,
    pub context_aware: bool,
}

impl FieldMapping {
    pub fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            ..self.clone()
        }
    }
}

/// Applies and reverses [`FieldMapping`]s on individual attribute values.
/// Stateless; the tenant is threaded in by the caller.
pub struct FieldMapper;

impl FieldMapper {
    /// Maps a virtual value to its physical form: coerces to the target kind
    /// and, for context-aware mappings, prepends the tenant prefix.
    pub fn apply(
        tenant: &TenantId,
        mapping: &FieldMapping,
        value: &AttributeValue,
    ) -> StorageResult<AttributeValue> {
        let kind = value.scalar_kind().ok_or_else(|| {
            StorageError::unsupported(format!(
                "attribute `{}` must be scalar to be a key",
                mapping.source.name
            ))
        })?;
        if kind != mapping.source.kind {
            return Err(StorageError::unsupported(format!(
                "attribute `{}` has kind {}, expected {}",
                mapping.source.name, kind, mapping.source.kind
            )));
        }
        if !mapping.context_aware {
            return coerce(value, mapping.target.kind).ok_or_else(|| {
                StorageError::unsupported(format!(
                    "cannot coerce `{}` from {} to {}",
                    mapping.source.name, kind, mapping.target.kind
                ))
            });
        }
        match mapping.target.kind {
            ScalarKind::S => {
                let plain = match value {
                    AttributeValue::S(s) => s.as_str(),
                    AttributeValue::N(n) => n.as_str(),
                    _ => {
                        return Err(StorageError::unsupported(format!(
                            "cannot encode {} value of `{}` into a string column",
                            kind, mapping.source.name
                        )))
                    }
                };
                StringPrefixFunction
                    .apply(tenant, &mapping.virtual_index_name, plain)
                    .map(AttributeValue::S)
            }
            ScalarKind::B => {
                let plain: &[u8] = match value {
                    AttributeValue::S(s) => s.as_bytes(),
                    AttributeValue::N(n) => n.as_bytes(),
                    AttributeValue::B(b) => b,
                    _ => unreachable!("scalar kind checked above"),
                };
                BinaryPrefixFunction
                    .apply(tenant, &mapping.virtual_index_name, plain)
                    .map(AttributeValue::B)
            }
            ScalarKind::N => Err(StorageError::unsupported(format!(
                "physical hash column for `{}` cannot be numeric",
                mapping.source.name
            ))),
        }
    }

    /// Maps a physical value back to its virtual form. `mapping` must be the
    /// [`FieldMapping::reversed`] form, so its source is the physical side.
    ///
    /// When `expected_tenant` is given, a decoded tenant that differs from it
    /// is a corruption; `None` skips the check (used only for opaque scan
    /// cursors, which may point at another tenant's row).
    pub fn reverse(
        expected_tenant: Option<&TenantId>,
        mapping: &FieldMapping,
        value: &AttributeValue,
    ) -> StorageResult<AttributeValue> {
        if !mapping.context_aware {
            return coerce(value, mapping.target.kind).ok_or_else(|| {
                StorageError::corrupt(format!(
                    "stored `{}` does not decode back to {}",
                    mapping.source.name, mapping.target.kind
                ))
            });
        }
        let (decoded_tenant, plain) = match (mapping.source.kind, value) {
            (ScalarKind::S, AttributeValue::S(s)) => {
                let decoded = StringPrefixFunction.reverse(s)?;
                (decoded.tenant, string_to_kind(decoded.value, mapping.target.kind)?)
            }
            (ScalarKind::B, AttributeValue::B(b)) => {
                let decoded = BinaryPrefixFunction.reverse(b)?;
                (decoded.tenant, bytes_to_kind(decoded.value, mapping.target.kind)?)
            }
            _ => {
                return Err(StorageError::corrupt(format!(
                    "stored `{}` has unexpected kind",
                    mapping.source.name
                )))
            }
        };
        if let Some(expected) = expected_tenant {
            if &decoded_tenant != expected {
                return Err(StorageError::corrupt(format!(
                    "value of `{}` belongs to tenant `{}`, not `{}`",
                    mapping.source.name, decoded_tenant, expected
                )));
            }
        }
        Ok(plain)
    }
}

fn string_to_kind(value: String, kind: ScalarKind) -> StorageResult<AttributeValue> {
    Ok(match kind {
        ScalarKind::S => AttributeValue::S(value),
        ScalarKind::N => AttributeValue::N(value),
        ScalarKind::B => AttributeValue::B(Bytes::from(value.into_bytes())),
    })
}

fn bytes_to_kind(value: Bytes, kind: ScalarKind) -> StorageResult<AttributeValue> {
    Ok(match kind {
        ScalarKind::B => AttributeValue::B(value),
        ScalarKind::S | ScalarKind::N => {
            let s = String::from_utf8(value.to_vec()).map_err(|_| {
                StorageError::corrupt("binary payload is not valid UTF-8".to_owned())
            })?;
            if kind == ScalarKind::S {
                AttributeValue::S(s)
            } else {
                AttributeValue::N(s)
            }
        }
    })
}

/// Kind coercion for non-prefixed fields. Identity, plus the numeric→string
/// direction (and back) used when a numeric virtual key rides a string
/// physical column.
fn coerce(value: &AttributeValue, target: ScalarKind) -> Option<AttributeValue> {
    match (value, target) {
        (AttributeValue::S(s), ScalarKind::S) => Some(AttributeValue::S(s.clone())),
        (AttributeValue::N(n), ScalarKind::N) => Some(AttributeValue::N(n.clone())),
        (AttributeValue::B(b), ScalarKind::B) => Some(AttributeValue::B(b.clone())),
        (AttributeValue::N(n), ScalarKind::S) => Some(AttributeValue::S(n.clone())),
        (AttributeValue::S(s), ScalarKind::N) => Some(AttributeValue::N(s.clone())),
        _ => None,
    }
}
