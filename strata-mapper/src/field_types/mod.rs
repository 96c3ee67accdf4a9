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

//! Field types: how one JSON value of a mapped field becomes indexed fields,
//! and how queries against the field are built.

mod binary;
mod boolean;
mod completion;
mod date;
mod geo;
mod keyword;
mod numeric;
mod text;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use strata_config::IndexSettings;
use thiserror::Error;

pub use self::binary::{BinaryFieldType, BinaryOptions};
pub use self::boolean::{BooleanFieldType, BooleanOptions};
pub use self::completion::{CompletionFieldType, CompletionOptions};
pub use self::date::{DateFieldType, DateOptions};
pub use self::geo::{
    BoundingBox, GeoPoint, GeoPointFieldType, GeoPointOptions, GeoShape, GeoShapeFieldType,
    GeoShapeOptions,
};
pub use self::keyword::{KeywordFieldType, KeywordOptions};
pub use self::numeric::{NumberType, NumericFieldType, NumericOptions};
pub use self::text::{IndexOptions, IndexPrefixes, TermVector, TextFieldType, TextOptions};
use crate::error::{MappingError, QueryError};
use crate::query::{Fuzziness, Query, RangeSpec, SearchExecutionContext};
use crate::{JsonObject, FIELD_NAMES_FIELD_NAME};

/// Context available while parsing field definitions.
#[derive(Clone, Copy)]
pub(crate) struct MappingParserContext<'a> {
    pub settings: &'a IndexSettings,
}

/// The physical representation an indexed value is written to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FieldKind {
    /// Points for numeric, date and geo range lookups.
    Point,
    /// Column-oriented values for sorting and aggregations.
    DocValues,
    Stored,
    /// Terms of the inverted index.
    Indexed,
    /// Entries of the completion suggester.
    Suggest,
}

/// A typed value handed to the indexing engine.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexedValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the epoch.
    Date(i64),
    GeoPoint(GeoPoint),
    GeoShape(GeoShape, Option<BoundingBox>),
    Suggestion { input: String, weight: Option<u32> },
}

/// One entry of a physical document.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedField {
    pub name: String,
    pub kind: FieldKind,
    pub value: IndexedValue,
}

impl IndexedField {
    pub fn new(name: impl Into<String>, kind: FieldKind, value: IndexedValue) -> IndexedField {
        IndexedField {
            name: name.into(),
            kind,
            value,
        }
    }
}

/// Output of parsing one value of a field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldValues {
    pub fields: Vec<IndexedField>,
    /// Set when the value was dropped and the field must be listed in `_ignored`.
    pub ignored: bool,
}

impl FieldValues {
    pub(crate) fn ignored() -> FieldValues {
        FieldValues {
            fields: Vec::new(),
            ignored: true,
        }
    }

    pub(crate) fn push(&mut self, field_name: &str, kind: FieldKind, value: IndexedValue) {
        self.fields.push(IndexedField::new(field_name, kind, value));
    }

    /// Adds the point, doc values and stored representations of `value`.
    pub(crate) fn add_point_value(
        &mut self,
        field_name: &str,
        value: IndexedValue,
        index: bool,
        doc_values: bool,
        store: bool,
    ) {
        if index {
            self.push(field_name, FieldKind::Point, value.clone());
        }
        if doc_values {
            self.push(field_name, FieldKind::DocValues, value.clone());
        }
        if store {
            self.push(field_name, FieldKind::Stored, value);
        }
    }
}

/// Error raised when a value cannot be indexed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValueError {
    /// Dropped instead of failing the document when `ignore_malformed` is set.
    #[error("{0}")]
    Malformed(String),
    /// Always fails the document.
    #[error("{0}")]
    Illegal(String),
}

/// Checks the parameter names, then deserializes the options of a field.
pub(crate) fn deserialize_options<T: DeserializeOwned>(
    field_name: &str,
    type_name: &str,
    params: &JsonObject,
    known_params: &[&str],
) -> Result<T, MappingError> {
    if let Some(param) = params
        .keys()
        .find(|param| !known_params.contains(&param.as_str()))
    {
        return Err(MappingError::UnknownParameter {
            param: param.clone(),
            field: field_name.to_string(),
            field_type: type_name.to_string(),
        });
    }
    serde_json::from_value(JsonValue::Object(params.clone()))
        .map_err(|error| MappingError::invalid_parameter(field_name, error))
}

fn serialize_options<T: Serialize>(type_name: &str, options: &T) -> JsonObject {
    let mut json_obj = JsonObject::new();
    json_obj.insert("type".to_string(), JsonValue::String(type_name.to_string()));
    if let Ok(JsonValue::Object(params)) = serde_json::to_value(options) {
        json_obj.extend(params);
    }
    json_obj
}

/// Renders a scalar as a string, as keyword and text fields index it.
pub(crate) fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        JsonValue::Bool(bool_value) => Some(bool_value.to_string()),
        _ => None,
    }
}

/// A mapped field type and its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Numeric(NumericFieldType),
    Keyword(KeywordFieldType),
    Text(TextFieldType),
    Boolean(BooleanFieldType),
    Binary(BinaryFieldType),
    Date(DateFieldType),
    GeoPoint(GeoPointFieldType),
    GeoShape(GeoShapeFieldType),
    Completion(CompletionFieldType),
}

impl FieldType {
    /// Parses the parameters of a field of type `type_name`. `params` holds
    /// every parameter but `type` and `fields`.
    pub(crate) fn parse(
        field_name: &str,
        type_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<FieldType, MappingError> {
        if let Some(number_type) = NumberType::from_type_name(type_name) {
            return NumericFieldType::parse(field_name, number_type, params, ctx)
                .map(FieldType::Numeric);
        }
        let field_type = match type_name {
            "keyword" => FieldType::Keyword(KeywordFieldType::parse(field_name, params, ctx)?),
            "text" => FieldType::Text(TextFieldType::parse(field_name, params, ctx)?),
            "boolean" => FieldType::Boolean(BooleanFieldType::parse(field_name, params, ctx)?),
            "binary" => FieldType::Binary(BinaryFieldType::parse(field_name, params, ctx)?),
            "date" => FieldType::Date(DateFieldType::parse(field_name, params, ctx)?),
            "geo_point" => FieldType::GeoPoint(GeoPointFieldType::parse(field_name, params, ctx)?),
            "geo_shape" => FieldType::GeoShape(GeoShapeFieldType::parse(field_name, params, ctx)?),
            "completion" => {
                FieldType::Completion(CompletionFieldType::parse(field_name, params, ctx)?)
            }
            _ => {
                return Err(MappingError::UnknownFieldType {
                    field: field_name.to_string(),
                    field_type: type_name.to_string(),
                });
            }
        };
        Ok(field_type)
    }

    /// The `keyword` sub-field added to dynamically mapped strings.
    pub(crate) fn default_keyword_sub_field() -> FieldType {
        FieldType::Keyword(KeywordFieldType::with_ignore_above(256))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.number_type.type_name(),
            FieldType::Keyword(_) => "keyword",
            FieldType::Text(_) => "text",
            FieldType::Boolean(_) => "boolean",
            FieldType::Binary(_) => "binary",
            FieldType::Date(_) => "date",
            FieldType::GeoPoint(_) => "geo_point",
            FieldType::GeoShape(_) => "geo_shape",
            FieldType::Completion(_) => "completion",
        }
    }

    /// Serializes the field definition, `type` included.
    pub fn to_json(&self) -> JsonObject {
        let type_name = self.type_name();
        match self {
            FieldType::Numeric(numeric_type) => serialize_options(type_name, &numeric_type.options),
            FieldType::Keyword(keyword_type) => serialize_options(type_name, &keyword_type.options),
            FieldType::Text(text_type) => serialize_options(type_name, &text_type.options),
            FieldType::Boolean(boolean_type) => serialize_options(type_name, &boolean_type.options),
            FieldType::Binary(binary_type) => serialize_options(type_name, &binary_type.options),
            FieldType::Date(date_type) => serialize_options(type_name, &date_type.options),
            FieldType::GeoPoint(geo_point_type) => {
                serialize_options(type_name, &geo_point_type.options)
            }
            FieldType::GeoShape(geo_shape_type) => {
                serialize_options(type_name, &geo_shape_type.options)
            }
            FieldType::Completion(completion_type) => {
                serialize_options(type_name, &completion_type.options)
            }
        }
    }

    /// True if the field can be queried.
    pub fn is_searchable(&self) -> bool {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.options.index,
            FieldType::Keyword(keyword_type) => keyword_type.options.index,
            FieldType::Text(text_type) => text_type.options.index,
            FieldType::Boolean(boolean_type) => boolean_type.options.index,
            FieldType::Binary(_) => false,
            FieldType::Date(date_type) => date_type.options.index,
            FieldType::GeoPoint(geo_point_type) => geo_point_type.options.index,
            FieldType::GeoShape(geo_shape_type) => geo_shape_type.options.index,
            FieldType::Completion(_) => true,
        }
    }

    pub fn has_doc_values(&self) -> bool {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.options.doc_values,
            FieldType::Keyword(keyword_type) => keyword_type.options.doc_values,
            FieldType::Boolean(boolean_type) => boolean_type.options.doc_values,
            FieldType::Binary(binary_type) => binary_type.options.doc_values,
            FieldType::Date(date_type) => date_type.options.doc_values,
            FieldType::GeoPoint(geo_point_type) => geo_point_type.options.doc_values,
            FieldType::Text(_) | FieldType::GeoShape(_) | FieldType::Completion(_) => false,
        }
    }

    /// True if the field supports sorting and aggregations.
    pub fn supports_fielddata(&self) -> bool {
        match self {
            FieldType::Text(text_type) => text_type.options.fielddata,
            _ => self.has_doc_values(),
        }
    }

    pub fn ignore_malformed(&self) -> bool {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.ignore_malformed(),
            FieldType::Date(date_type) => date_type.ignore_malformed(),
            FieldType::GeoPoint(geo_point_type) => geo_point_type.ignore_malformed(),
            FieldType::GeoShape(geo_shape_type) => geo_shape_type.ignore_malformed(),
            FieldType::Completion(completion_type) => completion_type.ignore_malformed(),
            _ => false,
        }
    }

    /// Value indexed in place of an explicit `null`.
    pub fn null_value(&self) -> Option<&JsonValue> {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.options.null_value.as_ref(),
            FieldType::Keyword(keyword_type) => keyword_type.null_value(),
            FieldType::Boolean(boolean_type) => boolean_type.null_value(),
            FieldType::Date(date_type) => date_type.null_value(),
            FieldType::GeoPoint(geo_point_type) => geo_point_type.null_value(),
            _ => None,
        }
    }

    /// True if the field parses a whole JSON array itself instead of each of
    /// its elements.
    pub fn parses_array_value(&self) -> bool {
        matches!(self, FieldType::GeoPoint(_) | FieldType::Completion(_))
    }

    /// True if a JSON object is a valid value for the field.
    pub fn accepts_object_value(&self) -> bool {
        matches!(
            self,
            FieldType::GeoPoint(_) | FieldType::GeoShape(_) | FieldType::Completion(_)
        )
    }

    /// Turns one value into indexed fields.
    pub fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.parse_value(field_name, value),
            FieldType::Keyword(keyword_type) => keyword_type.parse_value(field_name, value),
            FieldType::Text(text_type) => text_type.parse_value(field_name, value),
            FieldType::Boolean(boolean_type) => boolean_type.parse_value(field_name, value),
            FieldType::Binary(binary_type) => binary_type.parse_value(field_name, value),
            FieldType::Date(date_type) => date_type.parse_value(field_name, value),
            FieldType::GeoPoint(geo_point_type) => geo_point_type.parse_value(field_name, value),
            FieldType::GeoShape(geo_shape_type) => geo_shape_type.parse_value(field_name, value),
            FieldType::Completion(completion_type) => {
                completion_type.parse_value(field_name, value)
            }
        }
    }

    fn check_searchable(&self, field_name: &str) -> Result<(), QueryError> {
        if !self.is_searchable() {
            return Err(QueryError::FieldNotSearchable(field_name.to_string()));
        }
        Ok(())
    }

    fn unsupported(&self, field_name: &str, query_type: &'static str) -> QueryError {
        QueryError::UnsupportedQuery {
            field: field_name.to_string(),
            field_type: self.type_name().to_string(),
            query_type,
        }
    }

    fn term_value(&self, field_name: &str, value: &JsonValue) -> Result<IndexedValue, QueryError> {
        match self {
            FieldType::Keyword(keyword_type) => keyword_type.term_value(field_name, value),
            FieldType::Text(_) => scalar_to_string(value).map(IndexedValue::Str).ok_or_else(|| {
                QueryError::InvalidQueryValue {
                    field: field_name.to_string(),
                    reason: format!("expected a string, got {value}"),
                }
            }),
            FieldType::Boolean(boolean_type) => boolean_type.term_value(field_name, value),
            FieldType::Date(date_type) => date_type.term_value(field_name, value),
            _ => Err(self.unsupported(field_name, "term")),
        }
    }

    pub fn term_query(
        &self,
        field_name: &str,
        value: &JsonValue,
        _ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        if let FieldType::Numeric(numeric_type) = self {
            return numeric_type.term_query(field_name, value);
        }
        Ok(Query::Term {
            field: field_name.to_string(),
            value: self.term_value(field_name, value)?,
        })
    }

    pub fn terms_query(
        &self,
        field_name: &str,
        values: &[JsonValue],
        _ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        if let FieldType::Numeric(numeric_type) = self {
            return numeric_type.terms_query(field_name, values);
        }
        let terms = values
            .iter()
            .map(|value| self.term_value(field_name, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Query::Terms {
            field: field_name.to_string(),
            values: terms,
        })
    }

    /// Ranges over terms (`text`, `keyword`) are expensive, numeric and date
    /// ranges are not.
    pub fn range_query(
        &self,
        field_name: &str,
        range: &RangeSpec,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        match self {
            FieldType::Numeric(numeric_type) => numeric_type.range_query(field_name, range),
            FieldType::Date(date_type) => date_type.range_query(field_name, range),
            FieldType::Keyword(_) | FieldType::Text(_) if !ctx.allow_expensive_queries => {
                Err(QueryError::ExpensiveRangeQueryDisallowed)
            }
            FieldType::Keyword(keyword_type) => keyword_type.range_query(field_name, range),
            FieldType::Text(text_type) => text_type.range_query(field_name, range),
            _ => Err(self.unsupported(field_name, "range")),
        }
    }

    /// Prefix queries covered by the `index_prefixes` of a text field become
    /// term queries on the prefix field; other prefix queries are expensive.
    pub fn prefix_query(
        &self,
        field_name: &str,
        prefix: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        if let FieldType::Text(text_type) = self {
            if !case_insensitive {
                if let Some(query) = text_type.index_prefix_query(field_name, prefix) {
                    return Ok(query);
                }
            }
        }
        if !matches!(self, FieldType::Keyword(_) | FieldType::Text(_)) {
            return Err(self.unsupported(field_name, "prefix"));
        }
        if !ctx.allow_expensive_queries {
            return Err(QueryError::ExpensivePrefixQueryDisallowed);
        }
        match self {
            FieldType::Keyword(keyword_type) => {
                Ok(keyword_type.prefix_query(field_name, prefix, case_insensitive))
            }
            _ => Ok(Query::Prefix {
                field: field_name.to_string(),
                prefix: prefix.to_string(),
                case_insensitive,
            }),
        }
    }

    pub fn fuzzy_query(
        &self,
        field_name: &str,
        value: &str,
        fuzziness: Fuzziness,
        prefix_length: usize,
        transpositions: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        if !matches!(self, FieldType::Keyword(_) | FieldType::Text(_)) {
            return Err(self.unsupported(field_name, "fuzzy"));
        }
        if !ctx.allow_expensive_queries {
            return Err(QueryError::ExpensiveQueriesDisallowed { query_type: "fuzzy" });
        }
        Ok(Query::Fuzzy {
            field: field_name.to_string(),
            value: value.to_string(),
            max_edits: fuzziness.max_edits(value.chars().count()),
            prefix_length,
            transpositions,
        })
    }

    pub fn regexp_query(
        &self,
        field_name: &str,
        pattern: &str,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_searchable(field_name)?;
        if !matches!(self, FieldType::Keyword(_) | FieldType::Text(_)) {
            return Err(self.unsupported(field_name, "regexp"));
        }
        if !ctx.allow_expensive_queries {
            return Err(QueryError::ExpensiveQueriesDisallowed {
                query_type: "regexp",
            });
        }
        regex::Regex::new(pattern).map_err(|error| QueryError::InvalidQueryValue {
            field: field_name.to_string(),
            reason: error.to_string(),
        })?;
        Ok(Query::Regexp {
            field: field_name.to_string(),
            pattern: pattern.to_string(),
        })
    }

    /// Matches documents with a value: through doc values when the field has
    /// them, through `_field_names` otherwise.
    pub fn exists_query(
        &self,
        field_name: &str,
        _ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        if self.has_doc_values() {
            return Ok(Query::DocValuesExists {
                field: field_name.to_string(),
            });
        }
        self.check_searchable(field_name)?;
        Ok(Query::Term {
            field: FIELD_NAMES_FIELD_NAME.to_string(),
            value: IndexedValue::Str(field_name.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn field_type(definition: JsonValue) -> Result<FieldType, MappingError> {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let mut params = definition.as_object().unwrap().clone();
        let Some(JsonValue::String(type_name)) = params.remove("type") else {
            panic!("missing type");
        };
        FieldType::parse("field", &type_name, &params, &ctx)
    }

    fn disallow_expensive() -> SearchExecutionContext {
        SearchExecutionContext {
            allow_expensive_queries: false,
        }
    }

    #[test]
    fn test_unknown_type() {
        let error = field_type(json!({"type": "unknown"})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "No handler for type [unknown] declared on field [field]"
        );
    }

    #[test]
    fn test_to_json_keeps_type_first() {
        let field_type = field_type(json!({"type": "long", "store": true})).unwrap();
        let json_obj = field_type.to_json();
        assert_eq!(json_obj.keys().next().map(String::as_str), Some("type"));
        assert_eq!(json_obj["store"], json!(true));
        assert_eq!(json_obj["coerce"], json!(true));
    }

    #[test]
    fn test_query_on_unindexed_field_fails() {
        let ctx = SearchExecutionContext::default();
        for definition in [
            json!({"type": "long", "index": false}),
            json!({"type": "keyword", "index": false}),
            json!({"type": "text", "index": false}),
            json!({"type": "date", "index": false}),
            json!({"type": "binary"}),
        ] {
            let field_type = field_type(definition).unwrap();
            assert_eq!(
                field_type.term_query("field", &json!("1"), &ctx),
                Err(QueryError::FieldNotSearchable("field".to_string()))
            );
        }
    }

    #[test]
    fn test_expensive_queries_are_rejected() {
        let ctx = disallow_expensive();
        let keyword_type = field_type(json!({"type": "keyword"})).unwrap();
        assert_eq!(
            keyword_type.regexp_query("field", "a.*", &ctx),
            Err(QueryError::ExpensiveQueriesDisallowed {
                query_type: "regexp"
            })
        );
        assert_eq!(
            keyword_type.fuzzy_query("field", "abc", Fuzziness::Auto, 0, true, &ctx),
            Err(QueryError::ExpensiveQueriesDisallowed { query_type: "fuzzy" })
        );
        assert_eq!(
            keyword_type.prefix_query("field", "ab", false, &ctx),
            Err(QueryError::ExpensivePrefixQueryDisallowed)
        );
        let range = RangeSpec::between(json!("a"), json!("b"));
        assert_eq!(
            keyword_type.range_query("field", &range, &ctx),
            Err(QueryError::ExpensiveRangeQueryDisallowed)
        );
        let long_type = field_type(json!({"type": "long"})).unwrap();
        let range = RangeSpec::between(json!(1), json!(2));
        assert!(long_type.range_query("field", &range, &ctx).is_ok());
    }

    #[test]
    fn test_index_prefixes_make_prefix_queries_cheap() {
        let ctx = disallow_expensive();
        let text_type = field_type(json!({"type": "text", "index_prefixes": {}})).unwrap();
        assert_eq!(
            text_type.prefix_query("field", "abc", false, &ctx),
            Ok(Query::Term {
                field: "field._index_prefix".to_string(),
                value: IndexedValue::Str("abc".to_string())
            })
        );
        assert_eq!(
            text_type.prefix_query("field", "abcdefgh", false, &ctx),
            Err(QueryError::ExpensivePrefixQueryDisallowed)
        );
    }

    #[test]
    fn test_exists_query() {
        let ctx = SearchExecutionContext::default();
        let keyword_type = field_type(json!({"type": "keyword"})).unwrap();
        assert_eq!(
            keyword_type.exists_query("field", &ctx),
            Ok(Query::DocValuesExists {
                field: "field".to_string()
            })
        );
        let text_type = field_type(json!({"type": "text"})).unwrap();
        assert_eq!(
            text_type.exists_query("field", &ctx),
            Ok(Query::Term {
                field: "_field_names".to_string(),
                value: IndexedValue::Str("field".to_string())
            })
        );
    }

    #[test]
    fn test_fielddata_support() {
        assert!(field_type(json!({"type": "keyword"})).unwrap().supports_fielddata());
        assert!(!field_type(json!({"type": "text"})).unwrap().supports_fielddata());
        assert!(field_type(json!({"type": "text", "fielddata": true}))
            .unwrap()
            .supports_fielddata());
        assert!(!field_type(json!({"type": "long", "doc_values": false}))
            .unwrap()
            .supports_fielddata());
    }
}
