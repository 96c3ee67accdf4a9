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

use regex::Regex;
use serde_json::Value as JsonValue;

use super::DynamicType;
use crate::error::MappingError;
use crate::JsonObject;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MatchPattern {
    Simple,
    Regex,
}

/// A list of compiled name or path patterns.
#[derive(Clone, Debug, Default)]
struct Patterns {
    regexes: Vec<Regex>,
}

impl Patterns {
    fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    fn any_match(&self, candidate: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(candidate))
    }
}

/// Translates a `*` wildcard pattern into an anchored regular expression.
fn simple_pattern_to_regex(pattern: &str) -> String {
    let escaped_parts: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", escaped_parts.join(".*"))
}

#[derive(Clone, Debug)]
enum TemplateContent {
    Mapping(JsonObject),
    Runtime(JsonObject),
}

/// A named rule deciding how unmapped fields get mapped.
///
/// A template matches a field when all of its predicates pass; the first
/// matching template of a mapping wins. Its mapping (or runtime) block is
/// instantiated with [`DynamicTemplate::mapping_for_name`].
#[derive(Clone, Debug)]
pub struct DynamicTemplate {
    name: String,
    definition: JsonObject,
    match_names: Patterns,
    unmatch_names: Patterns,
    path_match: Patterns,
    path_unmatch: Patterns,
    // `None` matches any type.
    match_mapping_types: Option<Vec<DynamicType>>,
    unmatch_mapping_types: Vec<DynamicType>,
    content: TemplateContent,
}

impl PartialEq for DynamicTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.definition == other.definition
    }
}

fn invalid_template(message: String) -> MappingError {
    MappingError::InvalidDynamicTemplate(message)
}

fn parse_string_list(
    template_name: &str,
    param: &str,
    value: &JsonValue,
) -> Result<Vec<String>, MappingError> {
    match value {
        JsonValue::String(text) => Ok(vec![text.clone()]),
        JsonValue::Array(values) => values
            .iter()
            .map(|value| match value {
                JsonValue::String(text) => Ok(text.clone()),
                _ => Err(invalid_template(format!(
                    "[{param}] of dynamic template [{template_name}] must be a string or a list \
                     of strings, got [{value}]"
                ))),
            })
            .collect(),
        _ => Err(invalid_template(format!(
            "[{param}] of dynamic template [{template_name}] must be a string or a list of \
             strings, got [{value}]"
        ))),
    }
}

fn compile_patterns(
    template_name: &str,
    patterns: &[String],
    match_pattern: MatchPattern,
) -> Result<Patterns, MappingError> {
    let mut regexes = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let regex_str = match match_pattern {
            MatchPattern::Simple => simple_pattern_to_regex(pattern),
            MatchPattern::Regex => format!("^(?:{pattern})$"),
        };
        let regex = Regex::new(&regex_str).map_err(|_| {
            invalid_template(format!(
                "Pattern [{pattern}] of type [regex] is invalid. Cannot create dynamic template \
                 [{template_name}]."
            ))
        })?;
        regexes.push(regex);
    }
    Ok(Patterns { regexes })
}

fn parse_mapping_types(
    template_name: &str,
    param: &str,
    value: &JsonValue,
    allow_wildcard: bool,
) -> Result<Option<Vec<DynamicType>>, MappingError> {
    let mut dynamic_types = Vec::new();
    for type_name in parse_string_list(template_name, param, value)? {
        if allow_wildcard && type_name == "*" {
            return Ok(None);
        }
        let dynamic_type = DynamicType::from_match_name(&type_name).ok_or_else(|| {
            invalid_template(format!(
                "No field type matched on [{type_name}], possible values are [object, string, \
                 long, double, boolean, date, binary]"
            ))
        })?;
        dynamic_types.push(dynamic_type);
    }
    Ok(Some(dynamic_types))
}

fn replace_placeholders(text: &str, name: &str, dynamic_type: &str) -> String {
    text.replace("{name}", name)
        .replace("{dynamic_type}", dynamic_type)
        .replace("{dynamicType}", dynamic_type)
}

fn substitute(value: &JsonValue, name: &str, dynamic_type: &str) -> JsonValue {
    match value {
        JsonValue::String(text) => JsonValue::String(replace_placeholders(text, name, dynamic_type)),
        JsonValue::Array(values) => JsonValue::Array(
            values
                .iter()
                .map(|value| substitute(value, name, dynamic_type))
                .collect(),
        ),
        JsonValue::Object(json_obj) => JsonValue::Object(substitute_object(json_obj, name, dynamic_type)),
        other => other.clone(),
    }
}

fn substitute_object(json_obj: &JsonObject, name: &str, dynamic_type: &str) -> JsonObject {
    json_obj
        .iter()
        .map(|(key, value)| {
            (
                replace_placeholders(key, name, dynamic_type),
                substitute(value, name, dynamic_type),
            )
        })
        .collect()
}

impl DynamicTemplate {
    /// Parses the definition of the template named `name`.
    ///
    /// Only the structure is checked here: the content of the `mapping` block
    /// is validated by the mapping that declares the template.
    pub fn parse(name: &str, definition: &JsonValue) -> Result<DynamicTemplate, MappingError> {
        let JsonValue::Object(definition) = definition else {
            return Err(invalid_template(format!(
                "dynamic template [{name}] must be an object, got [{definition}]"
            )));
        };
        let match_pattern = match definition.get("match_pattern") {
            None => MatchPattern::Simple,
            Some(JsonValue::String(match_pattern)) if match_pattern == "simple" => {
                MatchPattern::Simple
            }
            Some(JsonValue::String(match_pattern)) if match_pattern == "regex" => {
                MatchPattern::Regex
            }
            Some(other) => {
                return Err(invalid_template(format!(
                    "Illegal match_pattern [{other}] in dynamic template [{name}], expected \
                     [simple] or [regex]"
                )));
            }
        };
        let mut match_names = Patterns::default();
        let mut unmatch_names = Patterns::default();
        let mut path_match = Patterns::default();
        let mut path_unmatch = Patterns::default();
        let mut match_mapping_types = None;
        let mut unmatch_mapping_types = Vec::new();
        let mut mapping = None;
        let mut runtime = None;
        for (param, value) in definition {
            match param.as_str() {
                "match" | "unmatch" | "path_match" | "path_unmatch" => {
                    let patterns = parse_string_list(name, param, value)?;
                    let compiled = compile_patterns(name, &patterns, match_pattern)?;
                    match param.as_str() {
                        "match" => match_names = compiled,
                        "unmatch" => unmatch_names = compiled,
                        "path_match" => path_match = compiled,
                        _ => path_unmatch = compiled,
                    }
                }
                "match_mapping_type" => {
                    match_mapping_types = parse_mapping_types(name, param, value, true)?;
                }
                "unmatch_mapping_type" => {
                    unmatch_mapping_types =
                        parse_mapping_types(name, param, value, false)?.unwrap_or_default();
                }
                "match_pattern" => {}
                "mapping" | "runtime" => {
                    let JsonValue::Object(block) = value else {
                        return Err(invalid_template(format!(
                            "[{param}] of dynamic template [{name}] must be an object, got \
                             [{value}]"
                        )));
                    };
                    if param == "mapping" {
                        mapping = Some(block.clone());
                    } else {
                        runtime = Some(block.clone());
                    }
                }
                _ => {
                    return Err(invalid_template(format!(
                        "Illegal dynamic template parameter: [{param}]"
                    )));
                }
            }
        }
        let content = match (mapping, runtime) {
            (Some(_), Some(_)) => {
                return Err(invalid_template(format!(
                    "mapping and runtime cannot be both specified in the same dynamic template \
                     [{name}]"
                )));
            }
            (None, None) => {
                return Err(invalid_template(format!(
                    "template [{name}] must have either mapping or runtime set"
                )));
            }
            (Some(mapping), None) => TemplateContent::Mapping(mapping),
            (None, Some(runtime)) => TemplateContent::Runtime(runtime),
        };
        if let (TemplateContent::Runtime(_), Some(dynamic_types)) = (&content, &match_mapping_types)
        {
            if let Some(dynamic_type) = dynamic_types
                .iter()
                .find(|dynamic_type| !dynamic_type.supports_runtime_field())
            {
                return Err(invalid_template(format!(
                    "Dynamic template [{name}] defines a runtime field but type [{dynamic_type}] \
                     is not supported as runtime field"
                )));
            }
        }
        Ok(DynamicTemplate {
            name: name.to_string(),
            definition: definition.clone(),
            match_names,
            unmatch_names,
            path_match,
            path_unmatch,
            match_mapping_types,
            unmatch_mapping_types,
            content,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the template produces runtime fields rather than mapped fields.
    pub fn is_runtime(&self) -> bool {
        matches!(self.content, TemplateContent::Runtime(_))
    }

    /// Types the template may be applied to, used to validate its content.
    pub fn candidate_types(&self) -> Vec<DynamicType> {
        let candidates: Vec<DynamicType> = match &self.match_mapping_types {
            Some(dynamic_types) => dynamic_types.clone(),
            None => DynamicType::ALL.to_vec(),
        };
        candidates
            .into_iter()
            .filter(|dynamic_type| !self.unmatch_mapping_types.contains(dynamic_type))
            .filter(|dynamic_type| !self.is_runtime() || dynamic_type.supports_runtime_field())
            .collect()
    }

    /// Returns true if the template applies to the field `name`, found at
    /// `path` with the detected type `dynamic_type`.
    pub fn matches(&self, path: &str, name: &str, dynamic_type: DynamicType) -> bool {
        if !self.match_names.is_empty() && !self.match_names.any_match(name) {
            return false;
        }
        if self.unmatch_names.any_match(name) {
            return false;
        }
        if !self.path_match.is_empty() && !self.path_match.any_match(path) {
            return false;
        }
        if self.path_unmatch.any_match(path) {
            return false;
        }
        if let Some(dynamic_types) = &self.match_mapping_types {
            if !dynamic_types.contains(&dynamic_type) {
                return false;
            }
        }
        if self.unmatch_mapping_types.contains(&dynamic_type) {
            return false;
        }
        !self.is_runtime() || dynamic_type.supports_runtime_field()
    }

    /// Instantiates the mapping (or runtime) block of the template for the
    /// field `name`: `{name}` is replaced by the field name, `{dynamic_type}`
    /// and `{dynamicType}` by `dynamic_type`, in keys and values alike.
    pub fn mapping_for_name(&self, name: &str, dynamic_type: &str) -> JsonObject {
        let block = match &self.content {
            TemplateContent::Mapping(block) | TemplateContent::Runtime(block) => block,
        };
        substitute_object(block, name, dynamic_type)
    }

    pub fn to_json(&self) -> JsonValue {
        let mut json_obj = JsonObject::new();
        json_obj.insert(self.name.clone(), JsonValue::Object(self.definition.clone()));
        JsonValue::Object(json_obj)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_template(definition: JsonValue) -> Result<DynamicTemplate, String> {
        DynamicTemplate::parse("my_template", &definition).map_err(|error| error.to_string())
    }

    #[test]
    fn test_parse_rejects_unknown_parameter() {
        let error = parse_template(json!({"random_param": "random_value"})).unwrap_err();
        assert_eq!(error, "Illegal dynamic template parameter: [random_param]");
    }

    #[test]
    fn test_parse_rejects_mapping_and_runtime_together_or_neither() {
        let error = parse_template(json!({
            "match_mapping_type": "string",
            "mapping": {"type": "keyword"},
            "runtime": {}
        }))
        .unwrap_err();
        assert_eq!(
            error,
            "mapping and runtime cannot be both specified in the same dynamic template \
             [my_template]"
        );
        let error = parse_template(json!({"match_mapping_type": "string"})).unwrap_err();
        assert_eq!(
            error,
            "template [my_template] must have either mapping or runtime set"
        );
    }

    #[test]
    fn test_parse_rejects_invalid_regex_with_pattern_quoted() {
        let error = parse_template(json!({
            "match": "**",
            "match_pattern": "regex",
            "mapping": {"type": "keyword"}
        }))
        .unwrap_err();
        assert_eq!(
            error,
            "Pattern [**] of type [regex] is invalid. Cannot create dynamic template \
             [my_template]."
        );
        // The same pattern is a valid glob.
        parse_template(json!({"match": "**", "mapping": {"type": "keyword"}})).unwrap();
    }

    #[test]
    fn test_parse_rejects_unknown_match_mapping_type() {
        let error = parse_template(json!({
            "match_mapping_type": "text",
            "mapping": {}
        }))
        .unwrap_err();
        assert!(error.starts_with("No field type matched on [text]"));
    }

    #[test]
    fn test_parse_rejects_runtime_for_unsupported_types() {
        for type_name in ["object", "binary"] {
            let error = parse_template(json!({
                "match_mapping_type": type_name,
                "runtime": {}
            }))
            .unwrap_err();
            assert_eq!(
                error,
                format!(
                    "Dynamic template [my_template] defines a runtime field but type \
                     [{type_name}] is not supported as runtime field"
                )
            );
        }
        for type_name in ["string", "long", "double", "boolean", "date", "*"] {
            parse_template(json!({"match_mapping_type": type_name, "runtime": {}})).unwrap();
        }
    }

    #[test]
    fn test_matches_simple_patterns() {
        let template = parse_template(json!({
            "match": "my_*",
            "unmatch": "*_skip",
            "path_match": "obj.*",
            "match_mapping_type": ["string", "long"],
            "mapping": {"type": "keyword"}
        }))
        .unwrap();
        assert!(template.matches("obj.my_field", "my_field", DynamicType::String));
        assert!(template.matches("obj.inner.my_field", "my_field", DynamicType::Long));
        assert!(!template.matches("obj.my_field", "my_field", DynamicType::Boolean));
        assert!(!template.matches("obj.my_field_skip", "my_field_skip", DynamicType::String));
        assert!(!template.matches("other.my_field", "my_field", DynamicType::String));
        assert!(!template.matches("obj.field", "field", DynamicType::String));
    }

    #[test]
    fn test_matches_regex_patterns_are_anchored() {
        let template = parse_template(json!({
            "match": "^a+b$|c.d",
            "match_pattern": "regex",
            "mapping": {}
        }))
        .unwrap();
        assert!(template.matches("aab", "aab", DynamicType::String));
        assert!(template.matches("cxd", "cxd", DynamicType::String));
        assert!(!template.matches("cxde", "cxde", DynamicType::String));
    }

    #[test]
    fn test_runtime_template_never_matches_objects() {
        let template = parse_template(json!({"runtime": {}})).unwrap();
        assert!(template.matches("a", "a", DynamicType::String));
        assert!(!template.matches("a", "a", DynamicType::Object));
        assert!(!template.candidate_types().contains(&DynamicType::Binary));
        assert!(template.is_runtime());
    }

    #[test]
    fn test_mapping_for_name_substitutes_placeholders() {
        let template = parse_template(json!({
            "match_mapping_type": "string",
            "mapping": {"type": "type_set_{dynamic_type}_{dynamicType}"}
        }))
        .unwrap();
        let mapping = template.mapping_for_name("input", "input");
        assert_eq!(mapping["type"], json!("type_set_input_input"));
    }

    #[test]
    fn test_mapping_for_name_substitutes_recursively_without_mutating() {
        let template = parse_template(json!({
            "match": "*",
            "mapping": {
                "type": "{dynamic_type}",
                "fields": {"{name}_raw": {"type": "keyword", "meta": ["{name}", 3]}}
            }
        }))
        .unwrap();
        let mapping = template.mapping_for_name("title", "text");
        assert_eq!(
            JsonValue::Object(mapping),
            json!({
                "type": "text",
                "fields": {"title_raw": {"type": "keyword", "meta": ["title", 3]}}
            })
        );
        let other_mapping = template.mapping_for_name("body", "long");
        assert_eq!(other_mapping["type"], json!("long"));
        assert_eq!(
            template.to_json()["my_template"]["mapping"]["type"],
            json!("{dynamic_type}")
        );
    }
}
