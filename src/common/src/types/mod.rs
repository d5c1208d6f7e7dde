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

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The scalar kinds a key attribute may have.
///
/// Numbers are carried as their canonical decimal string, following the
/// backing store's `N` representation, so cross-kind coercion is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// UTF-8 string.
    S,
    /// Number, canonical decimal string form.
    N,
    /// Raw bytes.
    B,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::S => "S",
            ScalarKind::N => "N",
            ScalarKind::B => "B",
        };
        write!(f, "{}", s)
    }
}

/// A single attribute value, the tagged union the backing store speaks.
///
/// Only the scalar variants (`S`, `N`, `B`) may appear as key attributes;
/// composite variants pass through the mapping layer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Bytes),
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Bytes>),
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
    Bool(bool),
    Null,
}

impl AttributeValue {
    /// The scalar kind of this value, or `None` for composite variants.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            AttributeValue::S(_) => Some(ScalarKind::S),
            AttributeValue::N(_) => Some(ScalarKind::N),
            AttributeValue::B(_) => Some(ScalarKind::B),
            _ => None,
        }
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&Bytes> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_owned())
    }
}

/// An item is a named collection of attribute values.
pub type Item = HashMap<String, AttributeValue>;
