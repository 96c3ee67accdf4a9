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

use super::{deserialize_options, FieldKind, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::error::MappingError;
use crate::JsonObject;

/// Characters the suggester reserves for its own encoding.
const RESERVED_CHARS: [char; 3] = ['\u{0}', '\u{1E}', '\u{1F}'];

fn default_max_input_length() -> usize {
    50
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompletionOptions {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(default = "true_fn")]
    pub preserve_separators: bool,
    #[serde(default = "true_fn")]
    pub preserve_position_increments: bool,
    /// Inputs are truncated to this many characters.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
}

impl CompletionOptions {
    const PARAMS: &'static [&'static str] = &[
        "analyzer",
        "search_analyzer",
        "preserve_separators",
        "preserve_position_increments",
        "max_input_length",
    ];
}

/// A field feeding the completion suggester.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionFieldType {
    pub options: CompletionOptions,
    ignore_malformed: bool,
}

impl CompletionFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<CompletionFieldType, MappingError> {
        let options: CompletionOptions =
            deserialize_options(field_name, "completion", params, CompletionOptions::PARAMS)?;
        for analyzer in [&options.analyzer, &options.search_analyzer]
            .into_iter()
            .flatten()
        {
            if !ctx.settings.analysis.is_analyzer_defined(analyzer) {
                return Err(MappingError::invalid_parameter(
                    field_name,
                    format!("analyzer [{analyzer}] has not been configured in mappings"),
                ));
            }
        }
        if options.max_input_length == 0 {
            return Err(MappingError::invalid_parameter(
                field_name,
                "[max_input_length] must be > 0",
            ));
        }
        Ok(CompletionFieldType {
            options,
            ignore_malformed: ctx.settings.mapping.ignore_malformed,
        })
    }

    pub fn ignore_malformed(&self) -> bool {
        self.ignore_malformed
    }

    /// Parses a string, an `{input, weight}` object, or an array of either.
    ///
    /// Blank inputs are dropped; the value is flagged as ignored when every
    /// input was dropped. Reserved characters fail with
    /// [`ValueError::Illegal`], whatever `ignore_malformed` says.
    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let mut suggestions: Vec<(String, Option<u32>)> = Vec::new();
        match value {
            JsonValue::Array(values) => {
                for value in values {
                    collect_suggestions(value, &mut suggestions)?;
                }
            }
            _ => collect_suggestions(value, &mut suggestions)?,
        }
        let mut field_values = FieldValues::default();
        let mut dropped_any = false;
        for (input, weight) in suggestions {
            check_reserved_chars(&input)?;
            if input.trim().is_empty() {
                dropped_any = true;
                continue;
            }
            let input: String = input.chars().take(self.options.max_input_length).collect();
            field_values.push(
                field_name,
                FieldKind::Suggest,
                IndexedValue::Suggestion { input, weight },
            );
        }
        field_values.ignored = dropped_any && field_values.fields.is_empty();
        Ok(field_values)
    }
}

fn check_reserved_chars(input: &str) -> Result<(), ValueError> {
    if let Some((position, reserved_char)) = input
        .chars()
        .enumerate()
        .find(|(_, character)| RESERVED_CHARS.contains(character))
    {
        return Err(ValueError::Illegal(format!(
            "Illegal input [{input}] reserved character [0x{:X}] at position [{position}]",
            reserved_char as u32
        )));
    }
    Ok(())
}

fn collect_suggestions(
    value: &JsonValue,
    suggestions: &mut Vec<(String, Option<u32>)>,
) -> Result<(), ValueError> {
    match value {
        JsonValue::Null => Ok(()),
        JsonValue::String(input) => {
            suggestions.push((input.clone(), None));
            Ok(())
        }
        JsonValue::Object(json_obj) => {
            let mut inputs = Vec::new();
            let mut weight = None;
            for (key, value) in json_obj {
                match key.as_str() {
                    "input" => match value {
                        JsonValue::String(input) => inputs.push(input.clone()),
                        JsonValue::Array(values) => {
                            for value in values {
                                let JsonValue::String(input) = value else {
                                    return Err(ValueError::Malformed(format!(
                                        "input array must have string values, got [{value}]"
                                    )));
                                };
                                inputs.push(input.clone());
                            }
                        }
                        _ => {
                            return Err(ValueError::Malformed(format!(
                                "input must be a string or an array of strings, got [{value}]"
                            )));
                        }
                    },
                    "weight" => weight = Some(parse_weight(value)?),
                    _ => {
                        return Err(ValueError::Malformed(format!(
                            "unknown field name [{key}], must be one of [input, weight]"
                        )));
                    }
                }
            }
            suggestions.extend(inputs.into_iter().map(|input| (input, weight)));
            Ok(())
        }
        _ => Err(ValueError::Malformed(format!(
            "expected a string, an object or an array, got [{value}]"
        ))),
    }
}

fn parse_weight(value: &JsonValue) -> Result<u32, ValueError> {
    let weight = match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ValueError::Malformed(format!("weight must be a number, but was [{value}]")))?;
    if weight.fract() != 0.0 {
        return Err(ValueError::Malformed(format!(
            "weight must be an integer, but was [{value}]"
        )));
    }
    if !(0.0..=i32::MAX as f64).contains(&weight) {
        return Err(ValueError::Malformed(format!(
            "weight must be in the interval [0..2147483647], but was [{value}]"
        )));
    }
    Ok(weight as u32)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_config::IndexSettings;

    use super::*;

    fn completion_type(params: JsonValue) -> CompletionFieldType {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        CompletionFieldType::parse("suggest", params.as_object().unwrap(), &ctx).unwrap()
    }

    fn inputs(field_values: &FieldValues) -> Vec<(String, Option<u32>)> {
        field_values
            .fields
            .iter()
            .map(|field| match &field.value {
                IndexedValue::Suggestion { input, weight } => (input.clone(), *weight),
                other => panic!("unexpected value {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_completion_inputs() {
        let completion_type = completion_type(json!({}));
        let field_values = completion_type
            .parse_value(
                "suggest",
                &json!([
                    "Nevermind",
                    {"input": ["Nirvana", "Kurt"], "weight": 34},
                    {"input": "Foo", "weight": "7"}
                ]),
            )
            .unwrap();
        assert_eq!(
            inputs(&field_values),
            vec![
                ("Nevermind".to_string(), None),
                ("Nirvana".to_string(), Some(34)),
                ("Kurt".to_string(), Some(34)),
                ("Foo".to_string(), Some(7)),
            ]
        );
        assert!(!field_values.ignored);
    }

    #[test]
    fn test_completion_blank_inputs_are_dropped() {
        let completion_type = completion_type(json!({}));
        let field_values = completion_type
            .parse_value("suggest", &json!(["  ", ""]))
            .unwrap();
        assert!(field_values.fields.is_empty());
        assert!(field_values.ignored);
        let field_values = completion_type
            .parse_value("suggest", &json!(["", "ok"]))
            .unwrap();
        assert_eq!(field_values.fields.len(), 1);
        assert!(!field_values.ignored);
    }

    #[test]
    fn test_completion_reserved_characters() {
        let completion_type = completion_type(json!({}));
        for (reserved_char, hex) in [('\u{0}', "0x0"), ('\u{1E}', "0x1E"), ('\u{1F}', "0x1F")] {
            let input = format!("foo{reserved_char}bar");
            let error = completion_type
                .parse_value("suggest", &json!(input))
                .unwrap_err();
            assert_eq!(
                error,
                ValueError::Illegal(format!(
                    "Illegal input [{input}] reserved character [{hex}] at position [3]"
                ))
            );
        }
    }

    #[test]
    fn test_completion_weight_and_truncation() {
        let completion_type = completion_type(json!({"max_input_length": 3}));
        let field_values = completion_type.parse_value("suggest", &json!("abcdef")).unwrap();
        assert_eq!(inputs(&field_values), vec![("abc".to_string(), None)]);
        for weight in [json!(-1), json!(2147483648i64)] {
            let error = completion_type
                .parse_value("suggest", &json!({"input": "a", "weight": weight}))
                .unwrap_err();
            assert!(error.to_string().starts_with("weight must be in the interval"));
        }
        let error = completion_type
            .parse_value("suggest", &json!({"input": "a", "weight": 1.5}))
            .unwrap_err();
        assert_eq!(error.to_string(), "weight must be an integer, but was [1.5]");
    }
}
