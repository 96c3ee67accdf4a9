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

use super::{deserialize_options, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::date_time::{parse_date_time, DateTimeFormat, DEFAULT_DATE_FORMAT};
use crate::error::{MappingError, QueryError};
use crate::query::{Query, RangeSpec};
use crate::JsonObject;

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default = "true_fn")]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
    /// `||` separated list of formats, tried in order.
    #[serde(default = "default_date_format")]
    pub format: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_value: Option<String>,
}

impl DateOptions {
    const PARAMS: &'static [&'static str] = &[
        "index",
        "doc_values",
        "store",
        "format",
        "ignore_malformed",
        "null_value",
    ];
}

/// A date, indexed as milliseconds since the epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct DateFieldType {
    pub options: DateOptions,
    formats: Vec<DateTimeFormat>,
    null_value: Option<JsonValue>,
}

impl DateFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<DateFieldType, MappingError> {
        let mut options: DateOptions =
            deserialize_options(field_name, "date", params, DateOptions::PARAMS)?;
        options
            .ignore_malformed
            .get_or_insert(ctx.settings.mapping.ignore_malformed);
        let formats = DateTimeFormat::parse_formats(&options.format)
            .map_err(|error| MappingError::invalid_parameter(field_name, error))?;
        if let Some(null_value) = &options.null_value {
            parse_date_time(null_value, &formats).map_err(|error| {
                MappingError::invalid_parameter(field_name, format!("invalid [null_value]: {error}"))
            })?;
        }
        let null_value = options.null_value.clone().map(JsonValue::String);
        Ok(DateFieldType {
            options,
            formats,
            null_value,
        })
    }

    pub fn formats(&self) -> &[DateTimeFormat] {
        &self.formats
    }

    pub fn ignore_malformed(&self) -> bool {
        self.options.ignore_malformed.unwrap_or(false)
    }

    pub(crate) fn null_value(&self) -> Option<&JsonValue> {
        self.null_value.as_ref()
    }

    /// Parses a date string, or a number read through the epoch formats.
    fn parse_millis(&self, value: &JsonValue) -> Result<i64, String> {
        match value {
            JsonValue::String(text) => parse_date_time(text, &self.formats),
            JsonValue::Number(number) => parse_date_time(&number.to_string(), &self.formats),
            _ => Err(format!("expected a date string or number, got {value}")),
        }
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let millis = self.parse_millis(value).map_err(ValueError::Malformed)?;
        let mut field_values = FieldValues::default();
        field_values.add_point_value(
            field_name,
            IndexedValue::Date(millis),
            self.options.index,
            self.options.doc_values,
            self.options.store,
        );
        Ok(field_values)
    }

    pub(crate) fn term_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<IndexedValue, QueryError> {
        self.parse_millis(value)
            .map(IndexedValue::Date)
            .map_err(|reason| QueryError::InvalidQueryValue {
                field: field_name.to_string(),
                reason,
            })
    }

    pub(crate) fn range_query(&self, field_name: &str, range: &RangeSpec) -> Result<Query, QueryError> {
        let to_bound = |bound: Option<&JsonValue>,
                        inclusive: bool|
         -> Result<Bound<IndexedValue>, QueryError> {
            let Some(bound) = bound else {
                return Ok(Bound::Unbounded);
            };
            let value = self.term_value(field_name, bound)?;
            if inclusive {
                Ok(Bound::Included(value))
            } else {
                Ok(Bound::Excluded(value))
            }
        };
        Ok(Query::Range {
            field: field_name.to_string(),
            lower: to_bound(range.lower.as_ref(), range.include_lower)?,
            upper: to_bound(range.upper.as_ref(), range.include_upper)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_config::IndexSettings;

    use super::*;

    fn date_type(params: JsonValue) -> Result<DateFieldType, MappingError> {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        DateFieldType::parse("created", params.as_object().unwrap(), &ctx)
    }

    #[test]
    fn test_date_default_formats() {
        let date_type = date_type(json!({})).unwrap();
        let field_values = date_type
            .parse_value("created", &json!("2015-01-01T00:00:01Z"))
            .unwrap();
        assert_eq!(field_values.fields[0].value, IndexedValue::Date(1420070401000));
        assert_eq!(field_values.fields.len(), 2);
        let field_values = date_type.parse_value("created", &json!(1420070401000i64)).unwrap();
        assert_eq!(field_values.fields[0].value, IndexedValue::Date(1420070401000));
        let error = date_type.parse_value("created", &json!("yesterday")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "failed to parse date field [yesterday] with format \
             [strict_date_optional_time||epoch_millis]"
        );
    }

    #[test]
    fn test_date_custom_format_and_null_value() {
        let slash_type =
            date_type(json!({"format": "yyyy/MM/dd", "null_value": "2020/01/01"})).unwrap();
        assert_eq!(slash_type.null_value(), Some(&json!("2020/01/01")));
        assert!(slash_type.parse_value("created", &json!("2020/02/03")).is_ok());
        assert!(slash_type.parse_value("created", &json!("2020-02-03")).is_err());
        let error = date_type(json!({"format": "yyyy/MM/dd", "null_value": "x"})).unwrap_err();
        assert!(error.to_string().contains("invalid [null_value]"));
    }
}
