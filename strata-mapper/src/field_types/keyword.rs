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

use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strata_common::true_fn;

use super::{
    deserialize_options, scalar_to_string, FieldKind, FieldValues, IndexedValue,
    MappingParserContext, ValueError,
};
use crate::error::{MappingError, QueryError};
use crate::query::{Query, RangeSpec};
use crate::JsonObject;

/// Normalizers available to keyword fields.
const NORMALIZERS: &[&str] = &["lowercase"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default = "true_fn")]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
    /// Strings longer than this many characters are not indexed.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_above: Option<usize>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,
}

impl KeywordOptions {
    const PARAMS: &'static [&'static str] = &[
        "index",
        "doc_values",
        "store",
        "ignore_above",
        "null_value",
        "normalizer",
    ];
}

/// A string indexed as a single term.
#[derive(Clone, Debug, PartialEq)]
pub struct KeywordFieldType {
    pub options: KeywordOptions,
    // `null_value` as JSON, handed back to the document parser.
    null_value: Option<JsonValue>,
}

impl KeywordFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        _ctx: &MappingParserContext,
    ) -> Result<KeywordFieldType, MappingError> {
        let options: KeywordOptions =
            deserialize_options(field_name, "keyword", params, KeywordOptions::PARAMS)?;
        if let Some(normalizer) = &options.normalizer {
            if !NORMALIZERS.contains(&normalizer.as_str()) {
                return Err(MappingError::invalid_parameter(
                    field_name,
                    format!("normalizer [{normalizer}] not found for field [{field_name}]"),
                ));
            }
        }
        let null_value = options.null_value.clone().map(JsonValue::String);
        Ok(KeywordFieldType {
            options,
            null_value,
        })
    }

    pub(crate) fn with_ignore_above(ignore_above: usize) -> KeywordFieldType {
        KeywordFieldType {
            options: KeywordOptions {
                index: true,
                doc_values: true,
                store: false,
                ignore_above: Some(ignore_above),
                null_value: None,
                normalizer: None,
            },
            null_value: None,
        }
    }

    pub(crate) fn null_value(&self) -> Option<&JsonValue> {
        self.null_value.as_ref()
    }

    fn normalize(&self, text: &str) -> String {
        match self.options.normalizer.as_deref() {
            Some("lowercase") => text.to_lowercase(),
            _ => text.to_string(),
        }
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let text = scalar_to_string(value).ok_or_else(|| {
            ValueError::Malformed(format!("expected a string, got {value}"))
        })?;
        if let Some(ignore_above) = self.options.ignore_above {
            if text.chars().count() > ignore_above {
                return Ok(FieldValues::ignored());
            }
        }
        let normalized_text = self.normalize(&text);
        let mut field_values = FieldValues::default();
        if self.options.index {
            field_values.push(
                field_name,
                FieldKind::Indexed,
                IndexedValue::Str(normalized_text.clone()),
            );
        }
        if self.options.doc_values {
            field_values.push(
                field_name,
                FieldKind::DocValues,
                IndexedValue::Str(normalized_text),
            );
        }
        if self.options.store {
            field_values.push(field_name, FieldKind::Stored, IndexedValue::Str(text));
        }
        Ok(field_values)
    }

    pub(crate) fn term_value(&self, field_name: &str, value: &JsonValue) -> Result<IndexedValue, QueryError> {
        let text = scalar_to_string(value).ok_or_else(|| QueryError::InvalidQueryValue {
            field: field_name.to_string(),
            reason: format!("expected a string, got {value}"),
        })?;
        Ok(IndexedValue::Str(self.normalize(&text)))
    }

    pub(crate) fn prefix_query(&self, field_name: &str, prefix: &str, case_insensitive: bool) -> Query {
        Query::Prefix {
            field: field_name.to_string(),
            prefix: self.normalize(prefix),
            case_insensitive,
        }
    }

    pub(crate) fn range_query(&self, field_name: &str, range: &RangeSpec) -> Result<Query, QueryError> {
        let lower = string_bound(field_name, range.lower.as_ref(), range.include_lower, |text| {
            self.normalize(text)
        })?;
        let upper = string_bound(field_name, range.upper.as_ref(), range.include_upper, |text| {
            self.normalize(text)
        })?;
        Ok(Query::Range {
            field: field_name.to_string(),
            lower,
            upper,
        })
    }
}

/// Builds a bound of a range over terms.
pub(crate) fn string_bound(
    field_name: &str,
    bound: Option<&JsonValue>,
    inclusive: bool,
    normalize: impl Fn(&str) -> String,
) -> Result<Bound<IndexedValue>, QueryError> {
    let Some(bound) = bound else {
        return Ok(Bound::Unbounded);
    };
    let text = scalar_to_string(bound).ok_or_else(|| QueryError::InvalidQueryValue {
        field: field_name.to_string(),
        reason: format!("expected a string, got {bound}"),
    })?;
    let value = IndexedValue::Str(normalize(&text));
    if inclusive {
        Ok(Bound::Included(value))
    } else {
        Ok(Bound::Excluded(value))
    }
}
