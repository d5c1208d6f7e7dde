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

//! The mapping engine: tenant-prefix encoding, per-field and per-item
//! translation, condition and query rewriting, physical-table selection, and
//! the single-flight mapping cache.

mod cache;
mod condition;
mod field;
mod item;
mod prefix;
mod query;
mod table;

pub use cache::TableMappingCache;
pub use condition::{
    ConditionMapper, DeleteRequestWrapper, PutRequestWrapper, QueryRequestWrapper,
    RequestWrapper, ScanRequestWrapper, UpdateRequestWrapper,
};
pub use field::{FieldMapper, FieldMapping, IndexType};
pub use item::{ItemMapper, KeyMapper};
pub use prefix::{
    BinaryPrefixFunction, DecodedPrefix, StringPrefixFunction, DELIMITER, DELIMITER_BYTE,
};
pub use query::QueryAndScanMapper;
pub(crate) use query::restrict_to_index_keys;
pub use table::{
    IndexMapping, PhysicalTableCatalog, TableMapping, TableMappingFactory,
};
