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

//! Dynamic mapping: type detection for unmapped values and dynamic templates.

mod template;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

pub use self::template::DynamicTemplate;
use crate::date_time::DateTimeFormat;

/// What happens to fields that are not declared in the mapping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum DynamicMode {
    /// Unmapped fields are added to the mapping.
    #[default]
    True,
    /// Unmapped fields are kept in the source but neither indexed nor mapped.
    False,
    /// Unmapped fields are rejected.
    Strict,
    /// Unmapped leaf fields are added as runtime fields.
    Runtime,
}

impl DynamicMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DynamicMode::True => "true",
            DynamicMode::False => "false",
            DynamicMode::Strict => "strict",
            DynamicMode::Runtime => "runtime",
        }
    }
}

impl FromStr for DynamicMode {
    type Err = String;

    fn from_str(dynamic_str: &str) -> Result<Self, Self::Err> {
        match dynamic_str {
            "true" => Ok(DynamicMode::True),
            "false" => Ok(DynamicMode::False),
            "strict" => Ok(DynamicMode::Strict),
            "runtime" => Ok(DynamicMode::Runtime),
            _ => Err(format!(
                "no dynamic mode [{dynamic_str}], expected one of [true, false, strict, runtime]"
            )),
        }
    }
}

impl Serialize for DynamicMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DynamicMode::True => serializer.serialize_bool(true),
            DynamicMode::False => serializer.serialize_bool(false),
            DynamicMode::Strict | DynamicMode::Runtime => serializer.serialize_str(self.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for DynamicMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match JsonValue::deserialize(deserializer)? {
            JsonValue::Bool(true) => Ok(DynamicMode::True),
            JsonValue::Bool(false) => Ok(DynamicMode::False),
            JsonValue::String(dynamic_str) => {
                DynamicMode::from_str(&dynamic_str).map_err(serde::de::Error::custom)
            }
            other => Err(serde::de::Error::custom(format!(
                "no dynamic mode [{other}], expected one of [true, false, strict, runtime]"
            ))),
        }
    }
}

/// Semantic type of a value found in a document, as seen by dynamic mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DynamicType {
    Object,
    String,
    Long,
    Double,
    Boolean,
    Date,
    Binary,
}

impl DynamicType {
    pub const ALL: [DynamicType; 7] = [
        DynamicType::Object,
        DynamicType::String,
        DynamicType::Long,
        DynamicType::Double,
        DynamicType::Boolean,
        DynamicType::Date,
        DynamicType::Binary,
    ];

    /// Name used by `match_mapping_type`.
    pub fn match_name(&self) -> &'static str {
        match self {
            DynamicType::Object => "object",
            DynamicType::String => "string",
            DynamicType::Long => "long",
            DynamicType::Double => "double",
            DynamicType::Boolean => "boolean",
            DynamicType::Date => "date",
            DynamicType::Binary => "binary",
        }
    }

    /// Field type used when no template provides one.
    pub fn default_mapping_type(&self) -> &'static str {
        match self {
            DynamicType::Object => "object",
            DynamicType::String => "text",
            DynamicType::Long => "long",
            DynamicType::Double => "double",
            DynamicType::Boolean => "boolean",
            DynamicType::Date => "date",
            DynamicType::Binary => "binary",
        }
    }

    /// Runtime field type used when no template provides one, `None` for the
    /// types that cannot back a runtime field.
    pub fn default_runtime_type(&self) -> Option<&'static str> {
        match self {
            DynamicType::String => Some("keyword"),
            DynamicType::Long => Some("long"),
            DynamicType::Double => Some("double"),
            DynamicType::Boolean => Some("boolean"),
            DynamicType::Date => Some("date"),
            DynamicType::Object | DynamicType::Binary => None,
        }
    }

    pub fn supports_runtime_field(&self) -> bool {
        self.default_runtime_type().is_some()
    }

    pub fn from_match_name(match_name: &str) -> Option<DynamicType> {
        DynamicType::ALL
            .into_iter()
            .find(|dynamic_type| dynamic_type.match_name() == match_name)
    }
}

impl fmt::Display for DynamicType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.match_name())
    }
}

/// Result of the detection of the type of an unmapped value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DetectedType {
    pub dynamic_type: DynamicType,
    /// For dates, the dynamic date format entry that matched.
    pub date_format: Option<String>,
}

impl DetectedType {
    fn of(dynamic_type: DynamicType) -> DetectedType {
        DetectedType {
            dynamic_type,
            date_format: None,
        }
    }
}

/// Detects the semantic type of an unmapped value.
///
/// `date_formats` holds the `dynamic_date_formats` entries, each one possibly a
/// `||` separated list; an empty slice disables date detection. Numeric strings
/// stay strings unless `numeric_detection` is set. Returns `None` for `null`,
/// which never creates a field.
pub fn detect_dynamic_type(
    value: &JsonValue,
    date_formats: &[(String, Vec<DateTimeFormat>)],
    numeric_detection: bool,
) -> Option<DetectedType> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(_) => Some(DetectedType::of(DynamicType::Boolean)),
        JsonValue::Number(number) => {
            if number.is_i64() {
                Some(DetectedType::of(DynamicType::Long))
            } else {
                // Floats, and integers beyond the range of a long.
                Some(DetectedType::of(DynamicType::Double))
            }
        }
        JsonValue::String(text) => {
            for (format_str, formats) in date_formats {
                if formats.iter().any(|format| format.parse_millis(text).is_some()) {
                    return Some(DetectedType {
                        dynamic_type: DynamicType::Date,
                        date_format: Some(format_str.clone()),
                    });
                }
            }
            if numeric_detection {
                if text.parse::<i64>().is_ok() {
                    return Some(DetectedType::of(DynamicType::Long));
                }
                if text.parse::<f64>().map_or(false, f64::is_finite) {
                    return Some(DetectedType::of(DynamicType::Double));
                }
            }
            Some(DetectedType::of(DynamicType::String))
        }
        JsonValue::Object(_) => Some(DetectedType::of(DynamicType::Object)),
        JsonValue::Array(values) => values
            .iter()
            .find_map(|value| detect_dynamic_type(value, date_formats, numeric_detection)),
    }
}
