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

use std::fmt;
use std::str::FromStr;

use crate::context::TenantId;

/// Separator between the physical ARN, the tenant, and the virtual table
/// name. Plain AWS ARNs only ever contain single colons, so the double colon
/// is unambiguous.
const SEPARATOR: &str = "::";

/// A tenant-qualified stream ARN, `<physical-arn>::<tenant>::<virtual-table>`.
///
/// Many tenants share one physical change stream; consumers demultiplex
/// records by parsing this composite back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamArn {
    pub physical_arn: String,
    pub tenant: TenantId,
    pub virtual_table: String,
}

impl StreamArn {
    pub fn new(
        physical_arn: impl Into<String>,
        tenant: TenantId,
        virtual_table: impl Into<String>,
    ) -> Self {
        Self {
            physical_arn: physical_arn.into(),
            tenant,
            virtual_table: virtual_table.into(),
        }
    }
}

impl fmt::Display for StreamArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.physical_arn,
            self.tenant,
            self.virtual_table,
            sep = SEPARATOR
        )
    }
}

/// Error returned when a string is not a composite stream ARN.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed composite stream arn: `{0}`")]
pub struct MalformedStreamArn(String);

impl FromStr for StreamArn {
    type Err = MalformedStreamArn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Rightmost two separators delimit tenant and virtual table; the
        // physical ARN keeps whatever is left.
        let mut parts = s.rsplitn(3, SEPARATOR);
        let (virtual_table, tenant, physical_arn) =
            match (parts.next(), parts.next(), parts.next()) {
                (Some(v), Some(t), Some(p)) if !v.is_empty() && !t.is_empty() && !p.is_empty() => {
                    (v, t, p)
                }
                _ => return Err(MalformedStreamArn(s.to_owned())),
            };
        Ok(StreamArn {
            physical_arn: physical_arn.to_owned(),
            tenant: TenantId::new(tenant),
            virtual_table: virtual_table.to_owned(),
        })
    }
}
