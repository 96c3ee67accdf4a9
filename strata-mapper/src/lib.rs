// Copyright 2021-Present Datadog, Inc.
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

#![allow(clippy::bool_assert_comparison)]

//! Mapping layer of a document-oriented search engine.
//!
//! A [`Mapping`] describes how the fields of JSON documents are indexed. The
//! [`DocumentParser`] turns one JSON document into a [`ParsedDocument`]: a root
//! physical document plus one physical document per nested object, each one
//! carrying typed [`IndexedField`]s. Unmapped fields are mapped on the fly
//! (dynamic mapping), optionally driven by [`DynamicTemplate`]s, and the
//! resulting mapping update is merged back through the [`MapperService`].

mod content_path;
mod date_time;
mod dynamic;
mod error;
mod field_types;
mod mapping;
mod parser;
mod query;
mod runtime;
mod service;
mod tokens;

pub use content_path::ContentPath;
pub use date_time::DateTimeFormat;
pub use dynamic::{detect_dynamic_type, DetectedType, DynamicMode, DynamicTemplate, DynamicType};
pub use error::{DocParsingError, MappingError, QueryError};
pub use field_types::{
    BinaryOptions, BooleanOptions, CompletionOptions, DateOptions, FieldKind, FieldType,
    FieldValues, GeoPoint, GeoPointOptions, GeoShape, GeoShapeOptions, IndexOptions,
    IndexPrefixes, IndexedField, IndexedValue, KeywordOptions, NumberType, NumericOptions,
    TermVector, TextOptions, ValueError,
};
pub use mapping::{Mapping, NestedInclusion, NodeId};
pub use parser::{DocumentParser, ParsedDocument, PhysicalDocument};
pub use query::{Fuzziness, Query, RangeSpec, SearchExecutionContext};
pub use runtime::{
    FieldScript, RuntimeField, RuntimeFieldType, ScriptError, ValueEmitter,
    MAX_RUNTIME_FIELD_VALUES,
};
pub use service::{MapperService, MappingSnapshot};
pub use tokens::{
    DotExpandingTokenSource, JsonValueTokenSource, Token, TokenError, TokenLocation, TokenSource,
    VecTokenSource,
};

/// Alias for a JSON object, keys kept in insertion order.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Field listing the fields whose value was dropped while parsing a document.
pub const IGNORED_FIELD_NAME: &str = "_ignored";

/// Field marking every nested document with the path of its nested mapper.
pub const NESTED_PATH_FIELD_NAME: &str = "_nested_path";

/// Field listing the fields present in a document and that have no doc values.
pub const FIELD_NAMES_FIELD_NAME: &str = "_field_names";

/// Metadata fields: they cannot be declared in a mapping nor set in a document.
pub const METADATA_FIELD_NAMES: [&str; 3] = [
    IGNORED_FIELD_NAME,
    NESTED_PATH_FIELD_NAME,
    FIELD_NAMES_FIELD_NAME,
];

/// Returns true if `field_name` is reserved for a metadata field.
pub fn is_metadata_field(field_name: &str) -> bool {
    METADATA_FIELD_NAMES.contains(&field_name)
}
