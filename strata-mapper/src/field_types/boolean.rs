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

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strata_common::true_fn;

use super::{deserialize_options, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::error::{MappingError, QueryError};
use crate::JsonObject;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BooleanOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default = "true_fn")]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_value: Option<bool>,
}

impl BooleanOptions {
    const PARAMS: &'static [&'static str] = &["index", "doc_values", "store", "null_value"];
}

#[derive(Clone, Debug, PartialEq)]
pub struct BooleanFieldType {
    pub options: BooleanOptions,
    null_value: Option<JsonValue>,
}

/// Parses a boolean. An empty string stands for `null` and yields `None`.
fn parse_bool(value: &JsonValue) -> Result<Option<bool>, String> {
    match value {
        JsonValue::Bool(bool_value) => Ok(Some(*bool_value)),
        JsonValue::String(text) => match text.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            "" => Ok(None),
            _ => Err(format!(
                "Failed to parse value [{text}] as only [true] or [false] are allowed."
            )),
        },
        _ => Err(format!(
            "Failed to parse value [{value}] as only [true] or [false] are allowed."
        )),
    }
}

impl BooleanFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        _ctx: &MappingParserContext,
    ) -> Result<BooleanFieldType, MappingError> {
        let options: BooleanOptions =
            deserialize_options(field_name, "boolean", params, BooleanOptions::PARAMS)?;
        let null_value = options.null_value.map(JsonValue::Bool);
        Ok(BooleanFieldType {
            options,
            null_value,
        })
    }

    pub(crate) fn null_value(&self) -> Option<&JsonValue> {
        self.null_value.as_ref()
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let mut field_values = FieldValues::default();
        let Some(bool_value) = parse_bool(value).map_err(ValueError::Malformed)? else {
            return Ok(field_values);
        };
        field_values.add_point_value(
            field_name,
            IndexedValue::Bool(bool_value),
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
        match parse_bool(value) {
            Ok(Some(bool_value)) => Ok(IndexedValue::Bool(bool_value)),
            Ok(None) => Ok(IndexedValue::Bool(false)),
            Err(reason) => Err(QueryError::InvalidQueryValue {
                field: field_name.to_string(),
                reason,
            }),
        }
    }
}
