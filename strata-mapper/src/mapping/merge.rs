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

//! Merging a mapping update into a mapping.

use itertools::Itertools;
use serde_json::Value as JsonValue;
use strata_config::IndexSettings;
use tracing::debug;

use super::{FieldMapper, Mapping, NodeId, NodeKind, ObjectOptions, ROOT_ID, ROOT_NAME};
use crate::error::MappingError;
use crate::field_types::FieldType;

/// Field parameters that may change once a field is mapped.
const UPDATEABLE_PARAMS: &[&str] = &[
    "ignore_malformed",
    "coerce",
    "ignore_above",
    "search_analyzer",
    "search_quote_analyzer",
];

fn display_param(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn merge_field_type(
    path: &str,
    current: &FieldType,
    update: &FieldType,
) -> Result<FieldType, MappingError> {
    if current.type_name() != update.type_name() {
        return Err(MappingError::MergeConflict(format!(
            "mapper [{path}] cannot be changed from type [{}] to [{}]",
            current.type_name(),
            update.type_name()
        )));
    }
    let current_json = current.to_json();
    let update_json = update.to_json();
    for param in current_json.keys().chain(update_json.keys()).unique() {
        if UPDATEABLE_PARAMS.contains(&param.as_str()) {
            continue;
        }
        let current_value = current_json.get(param).unwrap_or(&JsonValue::Null);
        let update_value = update_json.get(param).unwrap_or(&JsonValue::Null);
        if current_value != update_value {
            return Err(MappingError::MergeConflict(format!(
                "Cannot update parameter [{param}] from [{}] to [{}]",
                display_param(current_value),
                display_param(update_value)
            )));
        }
    }
    Ok(update.clone())
}

fn merge_field_mapper(
    path: &str,
    current: &FieldMapper,
    update: &FieldMapper,
) -> Result<FieldMapper, MappingError> {
    let field_type = merge_field_type(path, &current.field_type, &update.field_type)?;
    let mut multi_fields = current.multi_fields.clone();
    for (name, update_type) in &update.multi_fields {
        match multi_fields
            .iter_mut()
            .find(|(multi_field_name, _)| multi_field_name == name)
        {
            Some((_, current_type)) => {
                *current_type =
                    merge_field_type(&format!("{path}.{name}"), current_type, update_type)?;
            }
            None => multi_fields.push((name.clone(), update_type.clone())),
        }
    }
    Ok(FieldMapper {
        field_type,
        multi_fields,
    })
}

fn merge_object_options(
    path: &str,
    current: &ObjectOptions,
    update: &ObjectOptions,
) -> Result<ObjectOptions, MappingError> {
    let mut merged = current.clone();
    match (&mut merged.nested, &update.nested) {
        (None, None) => {}
        (Some(merged_nested), Some(update_nested)) => {
            for (param, current_value, update_value) in [
                (
                    "include_in_parent",
                    &mut merged_nested.include_in_parent,
                    update_nested.include_in_parent,
                ),
                (
                    "include_in_root",
                    &mut merged_nested.include_in_root,
                    update_nested.include_in_root,
                ),
            ] {
                let Some(update_value) = update_value else {
                    continue;
                };
                if current_value.unwrap_or(false) != update_value {
                    return Err(MappingError::MergeConflict(format!(
                        "the [{param}] parameter can't be updated on a nested object mapping \
                         [{path}]"
                    )));
                }
                current_value.get_or_insert(update_value);
            }
        }
        _ => {
            return Err(MappingError::MergeConflict(format!(
                "can't merge a non-nested mapping [{path}] with a nested mapping"
            )));
        }
    }
    if let Some(enabled) = update.enabled {
        if enabled != current.is_enabled() {
            return Err(MappingError::MergeConflict(format!(
                "the [enabled] parameter can't be updated for the object mapping [{path}]"
            )));
        }
        merged.enabled = Some(enabled);
    }
    if update.dynamic.is_some() {
        merged.dynamic = update.dynamic;
    }
    Ok(merged)
}

impl Mapping {
    /// Merges `update` into this mapping, and checks the limits of the
    /// resulting mapping.
    ///
    /// The merge is all or nothing: on error, no part of `update` is applied.
    pub fn merge(&self, update: &Mapping, settings: &IndexSettings) -> Result<Mapping, MappingError> {
        let mut merged = self.clone();
        merged.merge_node(ROOT_ID, update, ROOT_ID)?;
        for dynamic_template in &update.dynamic_templates {
            match merged
                .dynamic_templates
                .iter_mut()
                .find(|current| current.name() == dynamic_template.name())
            {
                Some(current) => *current = dynamic_template.clone(),
                None => merged.dynamic_templates.push(dynamic_template.clone()),
            }
        }
        for (name, runtime_field) in &update.runtime_fields {
            merged
                .runtime_fields
                .insert(name.clone(), runtime_field.clone());
        }
        if update.dynamic_date_formats.is_some() {
            merged.dynamic_date_formats = update.dynamic_date_formats.clone();
        }
        if update.date_detection.is_some() {
            merged.date_detection = update.date_detection;
        }
        if update.numeric_detection.is_some() {
            merged.numeric_detection = update.numeric_detection;
        }
        merged.check_limits(settings)?;
        debug!(
            num_fields = merged.num_fields(),
            num_nested_fields = merged.num_nested_fields(),
            "merged-mapping"
        );
        Ok(merged)
    }

    fn merge_node(
        &mut self,
        target: NodeId,
        update: &Mapping,
        source: NodeId,
    ) -> Result<(), MappingError> {
        let path = if target == ROOT_ID {
            ROOT_NAME.to_string()
        } else {
            self.path(target)
        };
        match &update.node(source).kind {
            NodeKind::Object(source_object) => {
                let merged_options = match &self.node(target).kind {
                    NodeKind::Object(target_object) => {
                        merge_object_options(&path, &target_object.options, &source_object.options)?
                    }
                    NodeKind::Field(target_field) => {
                        return Err(MappingError::MergeConflict(format!(
                            "mapper [{path}] cannot be changed from type [{}] to [{}]",
                            target_field.field_type.type_name(),
                            source_object.options.type_name()
                        )));
                    }
                };
                if let NodeKind::Object(target_object) = &mut self.node_mut(target).kind {
                    target_object.options = merged_options;
                }
                for (name, source_child) in source_object.children() {
                    match self.child(target, name) {
                        Some(target_child) => self.merge_node(target_child, update, source_child)?,
                        None => self.copy_subtree(target, update, source_child),
                    }
                }
                Ok(())
            }
            NodeKind::Field(source_field) => {
                let NodeKind::Field(target_field) = &self.node(target).kind else {
                    return Err(MappingError::MergeConflict(format!(
                        "can't merge a non object mapping [{path}] with an object mapping"
                    )));
                };
                let merged_field = merge_field_mapper(&path, target_field, source_field)?;
                self.node_mut(target).kind = NodeKind::Field(merged_field);
                Ok(())
            }
        }
    }

    fn copy_subtree(&mut self, parent: NodeId, update: &Mapping, source: NodeId) {
        let source_node = update.node(source);
        match &source_node.kind {
            NodeKind::Field(source_field) => {
                self.add_node(parent, &source_node.name, NodeKind::Field(source_field.clone()));
            }
            NodeKind::Object(source_object) => {
                let object_id = self.add_object(parent, &source_node.name);
                if let NodeKind::Object(target_object) = &mut self.node_mut(object_id).kind {
                    target_object.options = source_object.options.clone();
                }
                for (_, source_child) in source_object.children() {
                    self.copy_subtree(object_id, update, source_child);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn parse(mapping_json: JsonValue) -> Mapping {
        Mapping::parse(&mapping_json, &IndexSettings::default()).unwrap()
    }

    fn merge(current: JsonValue, update: JsonValue) -> Result<Mapping, MappingError> {
        parse(current).merge(&parse(update), &IndexSettings::default())
    }

    fn merge_error(current: JsonValue, update: JsonValue) -> String {
        merge(current, update).unwrap_err().to_string()
    }

    #[test]
    fn test_merge_adds_new_fields() {
        let merged = merge(
            json!({"properties": {"a": {"properties": {"b": {"type": "long"}}}}}),
            json!({"properties": {"a": {"properties": {"c": {"type": "boolean"}}}, "d": {"type": "nested"}}}),
        )
        .unwrap();
        assert!(merged.field_type("a.b").is_some());
        assert!(merged.field_type("a.c").is_some());
        assert!(merged.is_nested(merged.find("d").unwrap()));
    }

    #[test]
    fn test_nested_inclusion_flags_are_immutable() {
        let current = json!({"properties": {"n": {"type": "nested", "include_in_parent": true}}});
        assert_eq!(
            merge_error(
                current.clone(),
                json!({"properties": {"n": {"type": "nested", "include_in_parent": false}}})
            ),
            "the [include_in_parent] parameter can't be updated on a nested object mapping [n]"
        );
        assert_eq!(
            merge_error(
                current.clone(),
                json!({"properties": {"n": {"type": "nested", "include_in_root": true}}})
            ),
            "the [include_in_root] parameter can't be updated on a nested object mapping [n]"
        );
        // Unset or unchanged values are fine.
        merge(current.clone(), json!({"properties": {"n": {"type": "nested"}}})).unwrap();
        let merged = merge(
            current,
            json!({"properties": {"n": {"type": "nested", "include_in_parent": true, "include_in_root": false}}}),
        )
        .unwrap();
        assert_eq!(
            merged.to_json()["properties"]["n"],
            json!({"type": "nested", "include_in_parent": true, "include_in_root": false})
        );
    }

    #[test]
    fn test_object_shape_conflicts() {
        assert_eq!(
            merge_error(
                json!({"properties": {"n": {"type": "nested"}}}),
                json!({"properties": {"n": {"type": "object"}}})
            ),
            "can't merge a non-nested mapping [n] with a nested mapping"
        );
        assert_eq!(
            merge_error(
                json!({"properties": {"o": {"type": "object"}}}),
                json!({"properties": {"o": {"type": "long"}}})
            ),
            "can't merge a non object mapping [o] with an object mapping"
        );
        assert_eq!(
            merge_error(
                json!({"properties": {"f": {"type": "long"}}}),
                json!({"properties": {"f": {"type": "object"}}})
            ),
            "mapper [f] cannot be changed from type [long] to [object]"
        );
        assert_eq!(
            merge_error(
                json!({"properties": {"o": {"type": "object", "enabled": false}}}),
                json!({"properties": {"o": {"type": "object", "enabled": true}}})
            ),
            "the [enabled] parameter can't be updated for the object mapping [o]"
        );
    }

    #[test]
    fn test_field_conflicts() {
        assert_eq!(
            merge_error(
                json!({"properties": {"f": {"type": "long"}}}),
                json!({"properties": {"f": {"type": "keyword"}}})
            ),
            "mapper [f] cannot be changed from type [long] to [keyword]"
        );
        assert_eq!(
            merge_error(
                json!({"properties": {"f": {"type": "keyword", "store": true}}}),
                json!({"properties": {"f": {"type": "keyword"}}})
            ),
            "Cannot update parameter [store] from [true] to [false]"
        );
        let error = merge_error(
            json!({"properties": {"f": {"type": "text", "index_prefixes": {}}}}),
            json!({"properties": {"f": {"type": "text", "index_prefixes": {"min_chars": 1, "max_chars": 10}}}}),
        );
        assert!(error.starts_with("Cannot update parameter [index_prefixes] from ["), "{error}");
        assert_eq!(
            merge_error(
                json!({"properties": {"f": {"type": "text", "fields": {"raw": {"type": "keyword"}}}}}),
                json!({"properties": {"f": {"type": "text", "fields": {"raw": {"type": "long"}}}}})
            ),
            "mapper [f.raw] cannot be changed from type [keyword] to [long]"
        );
    }

    #[test]
    fn test_updateable_parameters() {
        let merged = merge(
            json!({"properties": {"f": {"type": "keyword", "ignore_above": 10}}}),
            json!({"properties": {"f": {"type": "keyword", "ignore_above": 20}}}),
        )
        .unwrap();
        assert_eq!(
            merged.to_json()["properties"]["f"]["ignore_above"],
            json!(20)
        );
        merge(
            json!({"properties": {"n": {"type": "long", "ignore_malformed": false}}}),
            json!({"properties": {"n": {"type": "long", "ignore_malformed": true}}}),
        )
        .unwrap();
    }

    #[test]
    fn test_merge_is_atomic() {
        let mut settings = IndexSettings::default();
        settings.mapping.nested_fields_limit = 1;
        let current = parse(json!({"properties": {"a": {"type": "nested"}}}));
        let update = parse(json!({"properties": {"b": {"type": "nested"}, "c": {"type": "long"}}}));
        let error = current.merge(&update, &settings).unwrap_err();
        assert_matches!(error, MappingError::NestedFieldsLimitExceeded { limit: 1 });
        assert!(current.find("c").is_none());
        assert_eq!(current.num_nested_fields(), 1);

        // A conflict deep in the update leaves earlier fields out too.
        let update = parse(json!({"properties": {"d": {"type": "long"}, "a": {"type": "object"}}}));
        current.merge(&update, &settings).unwrap_err();
        assert!(current.find("d").is_none());
    }

    #[test]
    fn test_nesting_disabled_with_zero_limit() {
        let mut settings = IndexSettings::default();
        settings.mapping.nested_fields_limit = 0;
        let update = parse(json!({"properties": {"a": {"type": "nested"}}}));
        let error = Mapping::default().merge(&update, &settings).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Limit of nested fields [0] has been exceeded, see [index.mapping.nested_fields.limit]"
        );
    }

    #[test]
    fn test_templates_and_runtime_fields_are_replaced_by_name() {
        let merged = merge(
            json!({
                "dynamic_templates": [
                    {"first": {"match": "a*", "mapping": {"type": "keyword"}}},
                    {"second": {"match": "b*", "mapping": {"type": "keyword"}}}
                ],
                "runtime": {"r": {"type": "long"}}
            }),
            json!({
                "dynamic_templates": [
                    {"second": {"match": "c*", "mapping": {"type": "long"}}},
                    {"third": {"match": "d*", "mapping": {"type": "long"}}}
                ],
                "runtime": {"r": {"type": "double"}},
                "dynamic": "strict"
            }),
        )
        .unwrap();
        assert_json_eq!(
            merged.to_json(),
            json!({
                "dynamic": "strict",
                "dynamic_templates": [
                    {"first": {"match": "a*", "mapping": {"type": "keyword"}}},
                    {"second": {"match": "c*", "mapping": {"type": "long"}}},
                    {"third": {"match": "d*", "mapping": {"type": "long"}}}
                ],
                "runtime": {"r": {"type": "double"}}
            })
        );
    }
}
