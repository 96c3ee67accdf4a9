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

use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{deserialize_options, FieldKind, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::error::MappingError;
use crate::JsonObject;

/// Options of a `binary` field. Binary values are never searchable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryOptions {
    #[serde(default)]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
}

impl BinaryOptions {
    const PARAMS: &'static [&'static str] = &["doc_values", "store"];
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryFieldType {
    pub options: BinaryOptions,
}

impl BinaryFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        _ctx: &MappingParserContext,
    ) -> Result<BinaryFieldType, MappingError> {
        let options = deserialize_options(field_name, "binary", params, BinaryOptions::PARAMS)?;
        Ok(BinaryFieldType { options })
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let JsonValue::String(encoded) = value else {
            return Err(ValueError::Malformed(format!(
                "expected a base64 encoded string, got {value}"
            )));
        };
        let bytes = BASE64_STANDARD
            .decode(encoded)
            .map_err(|error| ValueError::Malformed(format!("failed to decode base64: {error}")))?;
        let mut field_values = FieldValues::default();
        if self.options.doc_values {
            field_values.push(field_name, FieldKind::DocValues, IndexedValue::Bytes(bytes.clone()));
        }
        if self.options.store {
            field_values.push(field_name, FieldKind::Stored, IndexedValue::Bytes(bytes));
        }
        Ok(field_values)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_config::IndexSettings;

    use super::*;

    #[test]
    fn test_binary_values() {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let params = json!({"store": true});
        let binary_type =
            BinaryFieldType::parse("payload", params.as_object().unwrap(), &ctx).unwrap();
        let field_values = binary_type.parse_value("payload", &json!("aGVsbG8=")).unwrap();
        assert_eq!(
            field_values.fields[0].value,
            IndexedValue::Bytes(b"hello".to_vec())
        );
        assert_eq!(field_values.fields.len(), 1);
        assert!(binary_type.parse_value("payload", &json!("not base64!")).is_err());
        let default_type =
            BinaryFieldType::parse("payload", &JsonObject::new(), &ctx).unwrap();
        assert!(default_type
            .parse_value("payload", &json!("aGVsbG8="))
            .unwrap()
            .fields
            .is_empty());
    }
}
