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

//! Tenant-prefix encoding of key values.
//!
//! Every hash key written to a physical table has the form
//! `<tenant> <DELIM> <virtual-table-or-index-name> <DELIM> <value>`. The
//! original value bytes follow the second delimiter verbatim, so decoding is
//! exact even when the payload itself contains delimiters.

use bytes::{BufMut, Bytes, BytesMut};
use tablemux_common::context::TenantId;

use crate::error::{StorageError, StorageResult};

/// Delimiter between prefix segments in string keys.
pub const DELIMITER: char = '.';
/// Delimiter between prefix segments in binary keys, `b'.'`.
pub const DELIMITER_BYTE: u8 = 0x2E;

/// The decoded parts of a prefixed key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPrefix<V> {
    pub tenant: TenantId,
    pub virtual_index: String,
    pub value: V,
}

fn check_segment(segment: &str, what: &str) -> StorageResult<()> {
    if segment.is_empty() {
        return Err(StorageError::invalid_argument(format!("empty {}", what)));
    }
    if segment.contains(DELIMITER) {
        return Err(StorageError::invalid_argument(format!(
            "{} `{}` contains the reserved delimiter `{}`",
            what, segment, DELIMITER
        )));
    }
    Ok(())
}

/// Prefix codec for physical columns of kind `S`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringPrefixFunction;

impl StringPrefixFunction {
    pub fn apply(
        &self,
        tenant: &TenantId,
        virtual_index: &str,
        value: &str,
    ) -> StorageResult<String> {
        check_segment(tenant.as_str(), "tenant")?;
        check_segment(virtual_index, "virtual index name")?;
        let mut out = String::with_capacity(tenant.as_str().len() + virtual_index.len() + value.len() + 2);
        out.push_str(tenant.as_str());
        out.push(DELIMITER);
        out.push_str(virtual_index);
        out.push(DELIMITER);
        out.push_str(value);
        Ok(out)
    }

    pub fn reverse(&self, encoded: &str) -> StorageResult<DecodedPrefix<String>> {
        let mut parts = encoded.splitn(3, DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tenant), Some(virtual_index), Some(value))
                if !tenant.is_empty() && !virtual_index.is_empty() =>
            {
                Ok(DecodedPrefix {
                    tenant: TenantId::new(tenant),
                    virtual_index: virtual_index.to_owned(),
                    value: value.to_owned(),
                })
            }
            _ => Err(StorageError::corrupt(format!(
                "`{}` is not a tenant-prefixed string",
                encoded
            ))),
        }
    }
}

/// Prefix codec for physical columns of kind `B`. The prefix segments are
/// UTF-8; the payload is raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryPrefixFunction;

impl BinaryPrefixFunction {
    pub fn apply(
        &self,
        tenant: &TenantId,
        virtual_index: &str,
        value: &[u8],
    ) -> StorageResult<Bytes> {
        check_segment(tenant.as_str(), "tenant")?;
        check_segment(virtual_index, "virtual index name")?;
        let mut out =
            BytesMut::with_capacity(tenant.as_str().len() + virtual_index.len() + value.len() + 2);
        out.put_slice(tenant.as_str().as_bytes());
        out.put_u8(DELIMITER_BYTE);
        out.put_slice(virtual_index.as_bytes());
        out.put_u8(DELIMITER_BYTE);
        out.put_slice(value);
        Ok(out.freeze())
    }

    pub fn reverse(&self, encoded: &[u8]) -> StorageResult<DecodedPrefix<Bytes>> {
        let corrupt =
            || StorageError::corrupt("binary value is not tenant-prefixed".to_owned());
        let first = encoded
            .iter()
            .position(|&b| b == DELIMITER_BYTE)
            .ok_or_else(corrupt)?;
        let second_rel = encoded[first + 1..]
            .iter()
            .position(|&b| b == DELIMITER_BYTE)
            .ok_or_else(corrupt)?;
        let second = first + 1 + second_rel;
        if first == 0 || second == first + 1 {
            return Err(corrupt());
        }
        let tenant = std::str::from_utf8(&encoded[..first]).map_err(|_| corrupt())?;
        let virtual_index =
            std::str::from_utf8(&encoded[first + 1..second]).map_err(|_| corrupt())?;
        Ok(DecodedPrefix {
            tenant: TenantId::new(tenant),
            virtual_index: virtual_index.to_owned(),
            value: Bytes::copy_from_slice(&encoded[second + 1..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str) -> TenantId {
        TenantId::new(id)
    }

    #[test]
    fn test_string_roundtrip() {
        let f = StringPrefixFunction;
        let encoded = f.apply(&t("t1"), "V", "a").unwrap();
        assert_eq!(encoded, "t1.V.a");
        let decoded = f.reverse(&encoded).unwrap();
        assert_eq!(decoded.tenant, t("t1"));
        assert_eq!(decoded.virtual_index, "V");
        assert_eq!(decoded.value, "a");
    }

    #[test]
    fn test_string_payload_may_contain_delimiter() {
        let f = StringPrefixFunction;
        let encoded = f.apply(&t("t1"), "V", "a.b.c").unwrap();
        assert_eq!(encoded, "t1.V.a.b.c");
        assert_eq!(f.reverse(&encoded).unwrap().value, "a.b.c");
    }

    #[test]
    fn test_string_empty_payload_roundtrips() {
        let f = StringPrefixFunction;
        let encoded = f.apply(&t("t1"), "V", "").unwrap();
        assert_eq!(encoded, "t1.V.");
        assert_eq!(f.reverse(&encoded).unwrap().value, "");
    }

    #[test]
    fn test_distinct_tenants_encode_differently() {
        let f = StringPrefixFunction;
        assert_ne!(
            f.apply(&t("t1"), "V", "a").unwrap(),
            f.apply(&t("t2"), "V", "a").unwrap()
        );
    }

    #[test]
    fn test_delimiter_in_tenant_or_index_rejected() {
        let f = StringPrefixFunction;
        assert!(matches!(
            f.apply(&t("bad.tenant"), "V", "a"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.apply(&t("t1"), "bad.index", "a"),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_string_reverse_requires_two_delimiters() {
        let f = StringPrefixFunction;
        assert!(matches!(f.reverse("t1"), Err(StorageError::Corrupt(_))));
        assert!(matches!(f.reverse("t1.V"), Err(StorageError::Corrupt(_))));
        assert!(matches!(f.reverse(".V.a"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_binary_roundtrip_raw_payload() {
        let f = BinaryPrefixFunction;
        // Payload contains the delimiter byte and invalid UTF-8.
        let payload = [0x2E, 0xFF, 0x00, 0x2E];
        let encoded = f.apply(&t("t1"), "V", &payload).unwrap();
        assert_eq!(&encoded[..5], b"t1.V.");
        let decoded = f.reverse(&encoded).unwrap();
        assert_eq!(decoded.tenant, t("t1"));
        assert_eq!(decoded.virtual_index, "V");
        assert_eq!(decoded.value.as_ref(), payload);
    }

    #[test]
    fn test_binary_empty_payload_roundtrips() {
        let f = BinaryPrefixFunction;
        let encoded = f.apply(&t("t1"), "V", b"").unwrap();
        let decoded = f.reverse(&encoded).unwrap();
        assert!(decoded.value.is_empty());
    }
}
