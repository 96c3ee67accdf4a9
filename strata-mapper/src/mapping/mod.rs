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

//! The mapping tree.
//!
//! Object and field mappers live in an arena and refer to each other through
//! [`NodeId`]s. The full path of a node is recomputed by walking its parents.

mod merge;
mod search;

use std::collections::BTreeMap;

use anyhow::anyhow;
use fnv::FnvHashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use strata_config::IndexSettings;

use crate::date_time::{DateTimeFormat, DEFAULT_DYNAMIC_DATE_FORMATS};
use crate::dynamic::{DynamicMode, DynamicTemplate, DynamicType};
use crate::error::MappingError;
use crate::field_types::{FieldType, MappingParserContext};
use crate::runtime::RuntimeField;
use crate::{is_metadata_field, JsonObject};

/// Name of the root object in error messages.
pub(crate) const ROOT_NAME: &str = "_doc";

/// Prefix of the field name used to check the content of a dynamic template.
const TEMPLATE_TEST_FIELD_PREFIX: &str = "__dynamic__";

/// Handle on a node of a [`Mapping`]. Only valid for the mapping that
/// returned it, and for the mappings derived from it by merges.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

const ROOT_ID: NodeId = NodeId(0);

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct NestedOptions {
    pub include_in_parent: Option<bool>,
    pub include_in_root: Option<bool>,
}

/// Options of an object mapper. `None` means the option was never set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ObjectOptions {
    pub dynamic: Option<DynamicMode>,
    pub enabled: Option<bool>,
    /// Set for `nested` objects.
    pub nested: Option<NestedOptions>,
}

impl ObjectOptions {
    pub fn type_name(&self) -> &'static str {
        if self.nested.is_some() {
            "nested"
        } else {
            "object"
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ObjectMapper {
    pub options: ObjectOptions,
    children: FnvHashMap<String, NodeId>,
    children_order: Vec<String>,
}

impl ObjectMapper {
    fn new(options: ObjectOptions) -> ObjectMapper {
        ObjectMapper {
            options,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    /// Children in the order they were added.
    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.children_order
            .iter()
            .filter_map(|name| Some((name.as_str(), self.child(name)?)))
    }

    fn insert(&mut self, name: &str, node_id: NodeId) {
        self.children_order.push(name.to_string());
        self.children.insert(name.to_string(), node_id);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FieldMapper {
    pub field_type: FieldType,
    /// Multi-fields, indexing the same value as `<field>.<name>`.
    pub multi_fields: Vec<(String, FieldType)>,
}

impl FieldMapper {
    pub fn multi_field(&self, name: &str) -> Option<&FieldType> {
        self.multi_fields
            .iter()
            .find(|(multi_field_name, _)| multi_field_name == name)
            .map(|(_, field_type)| field_type)
    }

    fn to_json(&self) -> JsonValue {
        let mut field_obj = self.field_type.to_json();
        if !self.multi_fields.is_empty() {
            let multi_fields_obj: JsonObject = self
                .multi_fields
                .iter()
                .map(|(name, field_type)| (name.clone(), JsonValue::Object(field_type.to_json())))
                .collect();
            field_obj.insert("fields".to_string(), JsonValue::Object(multi_fields_obj));
        }
        JsonValue::Object(field_obj)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    Object(ObjectMapper),
    Field(FieldMapper),
}

#[derive(Clone, Debug)]
pub(crate) struct MappingNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl MappingNode {
    pub fn as_object(&self) -> Option<&ObjectMapper> {
        match &self.kind {
            NodeKind::Object(object_mapper) => Some(object_mapper),
            NodeKind::Field(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Object(object_mapper) => object_mapper.options.type_name(),
            NodeKind::Field(field_mapper) => field_mapper.field_type.type_name(),
        }
    }
}

/// Documents the fields of a nested document are copied to, besides the
/// nested document itself.
///
/// Both flags are effective values: `include_in_root` is cleared when the
/// fields already reach the root through a chain of `include_in_parent`, so
/// that no value is ever added twice to the root document.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NestedInclusion {
    pub include_in_parent: bool,
    pub include_in_root: bool,
}

/// `dynamic_date_formats` entries, with their parsed formats.
pub(crate) type DynamicDateFormats = Vec<(String, Vec<DateTimeFormat>)>;

static DEFAULT_DATE_DETECTION_FORMATS: Lazy<DynamicDateFormats> = Lazy::new(|| {
    DEFAULT_DYNAMIC_DATE_FORMATS
        .iter()
        .filter_map(|format_str| {
            let formats = DateTimeFormat::parse_formats(format_str).ok()?;
            Some((format_str.to_string(), formats))
        })
        .collect()
});

/// The mapping of an index: the object and field mappers, the dynamic
/// templates and the runtime fields.
#[derive(Clone, Debug)]
pub struct Mapping {
    nodes: Vec<MappingNode>,
    dynamic_templates: Vec<DynamicTemplate>,
    runtime_fields: BTreeMap<String, RuntimeField>,
    dynamic_date_formats: Option<DynamicDateFormats>,
    date_detection: Option<bool>,
    numeric_detection: Option<bool>,
}

impl Default for Mapping {
    fn default() -> Mapping {
        Mapping::with_root_options(ObjectOptions::default())
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.to_json() == other.to_json()
    }
}

fn parse_bool(field: &str, param: &str, value: &JsonValue) -> Result<bool, MappingError> {
    match value {
        JsonValue::Bool(bool_value) => Ok(*bool_value),
        JsonValue::String(text) if text == "true" || text == "false" => Ok(text == "true"),
        _ => Err(MappingError::invalid_parameter(
            field,
            format!("failed to parse [{param}] as only [true] or [false] are allowed, got [{value}]"),
        )),
    }
}

fn parse_dynamic(field: &str, value: &JsonValue) -> Result<DynamicMode, MappingError> {
    serde_json::from_value(value.clone())
        .map_err(|error| MappingError::invalid_parameter(field, error))
}

fn parse_dynamic_date_formats(value: &JsonValue) -> Result<DynamicDateFormats, MappingError> {
    let format_strs: Vec<&str> = match value {
        JsonValue::String(format_str) => vec![format_str.as_str()],
        JsonValue::Array(values) => values
            .iter()
            .map(|value| value.as_str())
            .collect::<Option<Vec<&str>>>()
            .ok_or_else(|| {
                MappingError::invalid_parameter(
                    "dynamic_date_formats",
                    format!("expected an array of strings, got [{value}]"),
                )
            })?,
        _ => {
            return Err(MappingError::invalid_parameter(
                "dynamic_date_formats",
                format!("expected a string or an array of strings, got [{value}]"),
            ));
        }
    };
    format_strs
        .into_iter()
        .map(|format_str| {
            let formats = DateTimeFormat::parse_formats(format_str)
                .map_err(|error| MappingError::invalid_parameter("dynamic_date_formats", error))?;
            Ok((format_str.to_string(), formats))
        })
        .collect()
}

fn parse_dynamic_templates(value: &JsonValue) -> Result<Vec<DynamicTemplate>, MappingError> {
    let JsonValue::Array(template_jsons) = value else {
        return Err(MappingError::InvalidDynamicTemplate(format!(
            "[dynamic_templates] must be an array, got [{value}]"
        )));
    };
    let mut dynamic_templates = Vec::with_capacity(template_jsons.len());
    for template_json in template_jsons {
        let (name, definition) = match template_json {
            JsonValue::Object(template_obj) if template_obj.len() == 1 => {
                template_obj.iter().next().ok_or_else(|| {
                    MappingError::InvalidDynamicTemplate("empty dynamic template".to_string())
                })?
            }
            _ => {
                return Err(MappingError::InvalidDynamicTemplate(format!(
                    "a dynamic template must be an object with a single key, the name of the \
                     template, got [{template_json}]"
                )));
            }
        };
        dynamic_templates.push(DynamicTemplate::parse(name, definition)?);
    }
    Ok(dynamic_templates)
}

fn parse_runtime_fields(value: &JsonValue) -> Result<BTreeMap<String, RuntimeField>, MappingError> {
    let JsonValue::Object(runtime_obj) = value else {
        return Err(MappingError::invalid_parameter(
            "runtime",
            format!("expected an object, got [{value}]"),
        ));
    };
    runtime_obj
        .iter()
        .map(|(name, definition)| {
            validate_field_name(name)?;
            Ok((name.clone(), RuntimeField::parse(name, definition)?))
        })
        .collect()
}

fn as_properties<'a>(field: &str, value: &'a JsonValue) -> Result<&'a JsonObject, MappingError> {
    match value {
        JsonValue::Object(properties) => Ok(properties),
        _ => Err(MappingError::invalid_parameter(
            field,
            format!("[properties] must be an object, got [{value}]"),
        )),
    }
}

fn validate_field_name(name: &str) -> Result<(), MappingError> {
    let reason = if name.is_empty() {
        "field name cannot be an empty string"
    } else if name.chars().all(|c| c == '.') {
        "field name cannot contain only dots"
    } else if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        "field name starting or ending with a [.] or containing [..] makes object resolution \
         ambiguous"
    } else {
        return Ok(());
    };
    Err(MappingError::InvalidFieldName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

fn parse_field_mapper(
    path: &str,
    type_name: &str,
    definition: &JsonObject,
    ctx: &MappingParserContext,
) -> Result<FieldMapper, MappingError> {
    let mut params = definition.clone();
    params.remove("type");
    let multi_fields_json = params.remove("fields");
    let field_type = FieldType::parse(path, type_name, &params, ctx)?;
    let mut multi_fields = Vec::new();
    if let Some(multi_fields_json) = multi_fields_json {
        let multi_fields_obj = match multi_fields_json {
            JsonValue::Object(multi_fields_obj) => multi_fields_obj,
            other => {
                return Err(MappingError::invalid_parameter(
                    path,
                    format!("[fields] must be an object, got [{other}]"),
                ));
            }
        };
        for (multi_field_name, multi_field_json) in multi_fields_obj {
            validate_field_name(&multi_field_name)?;
            let multi_field_path = format!("{path}.{multi_field_name}");
            if multi_field_name.contains('.') {
                return Err(MappingError::InvalidFieldName {
                    name: multi_field_name,
                    reason: format!("a multi-field of [{path}] cannot contain '.'"),
                });
            }
            let mut multi_field_params = match multi_field_json {
                JsonValue::Object(multi_field_params) => multi_field_params,
                other => {
                    return Err(MappingError::invalid_parameter(
                        &multi_field_path,
                        format!("expected a field definition, got [{other}]"),
                    ));
                }
            };
            let multi_field_type_name = match multi_field_params.remove("type") {
                Some(JsonValue::String(multi_field_type_name)) => multi_field_type_name,
                _ => {
                    return Err(MappingError::invalid_parameter(
                        &multi_field_path,
                        format!("No type specified for field [{multi_field_name}]"),
                    ));
                }
            };
            let multi_field_type = FieldType::parse(
                &multi_field_path,
                &multi_field_type_name,
                &multi_field_params,
                ctx,
            )?;
            multi_fields.push((multi_field_name, multi_field_type));
        }
    }
    Ok(FieldMapper {
        field_type,
        multi_fields,
    })
}

/// Instantiates the content of `template` for the field `name`. Placeholders
/// get the type the field would have without template, which also becomes
/// the field type when the template does not set one.
pub(crate) fn template_definition(
    template: &DynamicTemplate,
    name: &str,
    dynamic_type: DynamicType,
) -> JsonValue {
    let type_name = if template.is_runtime() {
        dynamic_type
            .default_runtime_type()
            .unwrap_or_else(|| dynamic_type.match_name())
    } else {
        dynamic_type.default_mapping_type()
    };
    let mut definition = template.mapping_for_name(name, type_name);
    if !definition.contains_key("type") {
        definition.insert("type".to_string(), JsonValue::String(type_name.to_string()));
    }
    JsonValue::Object(definition)
}

/// Checks that the content of `template` makes a valid field for at least one
/// of the types it may be applied to.
fn validate_template_content(
    template: &DynamicTemplate,
    ctx: &MappingParserContext,
) -> Result<(), MappingError> {
    let candidate_types = template.candidate_types();
    let test_field_name = format!("{TEMPLATE_TEST_FIELD_PREFIX}{}", template.name());
    let mut last_error = None;
    for dynamic_type in &candidate_types {
        let definition = template_definition(template, &test_field_name, *dynamic_type);
        let validation_result = if template.is_runtime() {
            RuntimeField::parse(&test_field_name, &definition).map(|_| ())
        } else {
            Mapping::default()
                .parse_definition(ROOT_ID, &test_field_name, &definition, ctx)
                .map(|_| ())
        };
        match validation_result {
            Ok(()) => return Ok(()),
            Err(error) => last_error = Some(error),
        }
    }
    let Some(last_error) = last_error else {
        return Ok(());
    };
    Err(MappingError::InvalidDynamicTemplate(format!(
        "dynamic template [{}] has invalid content [{}], attempted to validate it with the \
         following match_mapping_type: [{}], last error: [{}]",
        template.name(),
        template.to_json(),
        candidate_types.iter().join(", "),
        last_error
    )))
}

impl Mapping {
    fn with_root_options(options: ObjectOptions) -> Mapping {
        Mapping {
            nodes: vec![MappingNode {
                name: String::new(),
                parent: None,
                kind: NodeKind::Object(ObjectMapper::new(options)),
            }],
            dynamic_templates: Vec::new(),
            runtime_fields: BTreeMap::new(),
            dynamic_date_formats: None,
            date_detection: None,
            numeric_detection: None,
        }
    }

    /// Parses a mapping definition.
    ///
    /// Limits are not checked here: they apply to the mapping resulting from
    /// a merge, see [`Mapping::merge`].
    pub fn parse(
        mapping_json: &JsonValue,
        settings: &IndexSettings,
    ) -> Result<Mapping, MappingError> {
        let JsonValue::Object(mapping_obj) = mapping_json else {
            return Err(anyhow!("mapping definition must be an object, got [{mapping_json}]").into());
        };
        let ctx = MappingParserContext { settings };
        let mut root_options = ObjectOptions::default();
        let mut dynamic_templates = Vec::new();
        let mut runtime_fields = BTreeMap::new();
        let mut dynamic_date_formats = None;
        let mut date_detection = None;
        let mut numeric_detection = None;
        for (key, value) in mapping_obj {
            match key.as_str() {
                "properties" => {}
                "dynamic" => root_options.dynamic = Some(parse_dynamic(ROOT_NAME, value)?),
                "enabled" => root_options.enabled = Some(parse_bool(ROOT_NAME, key, value)?),
                "date_detection" => date_detection = Some(parse_bool(ROOT_NAME, key, value)?),
                "numeric_detection" => {
                    numeric_detection = Some(parse_bool(ROOT_NAME, key, value)?)
                }
                "dynamic_date_formats" => {
                    dynamic_date_formats = Some(parse_dynamic_date_formats(value)?)
                }
                "dynamic_templates" => dynamic_templates = parse_dynamic_templates(value)?,
                "runtime" => runtime_fields = parse_runtime_fields(value)?,
                _ => {
                    return Err(anyhow!(
                        "Root mapping definition has unsupported parameters: [{key} : {value}]"
                    )
                    .into());
                }
            }
        }
        for dynamic_template in &dynamic_templates {
            validate_template_content(dynamic_template, &ctx)?;
        }
        let mut mapping = Mapping::with_root_options(root_options);
        mapping.dynamic_templates = dynamic_templates;
        mapping.runtime_fields = runtime_fields;
        mapping.dynamic_date_formats = dynamic_date_formats;
        mapping.date_detection = date_detection;
        mapping.numeric_detection = numeric_detection;
        if let Some(properties) = mapping_obj.get("properties") {
            let properties = as_properties(ROOT_NAME, properties)?;
            mapping.parse_properties(ROOT_ID, properties, &ctx)?;
        }
        Ok(mapping)
    }

    fn parse_properties(
        &mut self,
        parent: NodeId,
        properties: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<(), MappingError> {
        for (name, definition) in properties {
            validate_field_name(name)?;
            if parent == ROOT_ID && is_metadata_field(name) {
                return Err(MappingError::InvalidFieldName {
                    name: name.clone(),
                    reason: "metadata fields cannot be declared in the properties of a mapping"
                        .to_string(),
                });
            }
            // `a.b: {..}` is a shortcut for `a: {properties: {b: {..}}}`.
            let mut segments: Vec<&str> = name.split('.').collect();
            let leaf_name = segments.pop().unwrap_or(name.as_str());
            let mut current = parent;
            for object_name in segments {
                current = self.get_or_add_object(current, object_name)?;
            }
            self.parse_definition(current, leaf_name, definition, ctx)?;
        }
        Ok(())
    }

    fn get_or_add_object(&mut self, parent: NodeId, name: &str) -> Result<NodeId, MappingError> {
        match self.child(parent, name) {
            Some(child) if self.node(child).as_object().is_some() => Ok(child),
            Some(child) => Err(MappingError::MergeConflict(format!(
                "mapper [{}] cannot be changed from type [{}] to [object]",
                self.path(child),
                self.node(child).type_name()
            ))),
            None => Ok(self.add_node(parent, name, NodeKind::Object(ObjectMapper::default()))),
        }
    }

    /// Parses the definition of the field `name` and adds it under `parent`.
    pub(crate) fn parse_definition(
        &mut self,
        parent: NodeId,
        name: &str,
        definition: &JsonValue,
        ctx: &MappingParserContext,
    ) -> Result<NodeId, MappingError> {
        let path = self.child_path(parent, name);
        let JsonValue::Object(definition_obj) = definition else {
            return Err(MappingError::invalid_parameter(
                &path,
                format!("expected a field definition object, got [{definition}]"),
            ));
        };
        let type_name = match definition_obj.get("type") {
            None => "object",
            Some(JsonValue::String(type_name)) => type_name.as_str(),
            Some(other) => {
                return Err(MappingError::invalid_parameter(
                    &path,
                    format!("[type] must be a string, got [{other}]"),
                ));
            }
        };
        if type_name == "object" || type_name == "nested" {
            return self.parse_object(parent, name, &path, type_name, definition_obj, ctx);
        }
        let field_mapper = parse_field_mapper(&path, type_name, definition_obj, ctx)?;
        match self.child(parent, name) {
            None => Ok(self.add_node(parent, name, NodeKind::Field(field_mapper))),
            Some(existing) => match &self.node(existing).kind {
                NodeKind::Field(existing_mapper) if *existing_mapper == field_mapper => Ok(existing),
                NodeKind::Field(_) => Err(MappingError::invalid_parameter(
                    &path,
                    "field is defined more than once with different definitions",
                )),
                NodeKind::Object(_) => Err(MappingError::MergeConflict(format!(
                    "can't merge a non object mapping [{path}] with an object mapping"
                ))),
            },
        }
    }

    fn parse_object(
        &mut self,
        parent: NodeId,
        name: &str,
        path: &str,
        type_name: &str,
        definition: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<NodeId, MappingError> {
        let mut options = ObjectOptions::default();
        if type_name == "nested" {
            options.nested = Some(NestedOptions::default());
        }
        for (param, value) in definition {
            match (param.as_str(), &mut options.nested) {
                ("type", _) | ("properties", _) => {}
                ("dynamic", _) => options.dynamic = Some(parse_dynamic(path, value)?),
                ("enabled", _) => options.enabled = Some(parse_bool(path, param, value)?),
                ("include_in_parent", Some(nested_options)) => {
                    nested_options.include_in_parent = Some(parse_bool(path, param, value)?);
                }
                ("include_in_root", Some(nested_options)) => {
                    nested_options.include_in_root = Some(parse_bool(path, param, value)?);
                }
                _ => {
                    return Err(MappingError::UnknownParameter {
                        param: param.clone(),
                        field: path.to_string(),
                        field_type: type_name.to_string(),
                    });
                }
            }
        }
        let object_id = match self.child(parent, name) {
            None => self.add_node(parent, name, NodeKind::Object(ObjectMapper::new(options))),
            Some(existing) => {
                // The object was already created by a dotted field name.
                let existing_type = self.node(existing).type_name();
                let NodeKind::Object(existing_mapper) = &mut self.node_mut(existing).kind else {
                    return Err(MappingError::MergeConflict(format!(
                        "mapper [{path}] cannot be changed from type [{existing_type}] to \
                         [{type_name}]"
                    )));
                };
                if existing_mapper.options.nested.is_some() != options.nested.is_some() {
                    return Err(MappingError::MergeConflict(format!(
                        "can't merge a non-nested mapping [{path}] with a nested mapping"
                    )));
                }
                existing_mapper.options = options;
                existing
            }
        };
        if let Some(properties) = definition.get("properties") {
            let properties = as_properties(path, properties)?;
            self.parse_properties(object_id, properties, ctx)?;
        }
        Ok(object_id)
    }

    fn add_node(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(MappingNode {
            name: name.to_string(),
            parent: Some(parent),
            kind,
        });
        if let NodeKind::Object(parent_mapper) = &mut self.node_mut(parent).kind {
            parent_mapper.insert(name, node_id);
        }
        node_id
    }

    /// Adds an object mapper with default options under `parent`.
    pub(crate) fn add_object(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.add_node(parent, name, NodeKind::Object(ObjectMapper::default()))
    }

    pub(crate) fn add_runtime_field(&mut self, runtime_field: RuntimeField) {
        self.runtime_fields
            .insert(runtime_field.name().to_string(), runtime_field);
    }

    /// Builds the mapping update holding the nodes added since the mapping had
    /// `first_new_node` nodes, along with their ancestors, and the runtime
    /// fields `new_runtime_fields`.
    pub(crate) fn extract_update(
        &self,
        first_new_node: usize,
        new_runtime_fields: &[String],
    ) -> Mapping {
        let mut update = Mapping::default();
        let mut node_ids: FnvHashMap<NodeId, NodeId> = FnvHashMap::default();
        node_ids.insert(ROOT_ID, ROOT_ID);
        for node_id in (first_new_node..self.nodes.len()).map(NodeId) {
            let mut chain = Vec::new();
            let mut current = Some(node_id);
            while let Some(current_id) = current {
                if node_ids.contains_key(&current_id) {
                    break;
                }
                chain.push(current_id);
                current = self.node(current_id).parent;
            }
            for &chain_id in chain.iter().rev() {
                let node = self.node(chain_id);
                let update_parent = node
                    .parent
                    .and_then(|parent| node_ids.get(&parent).copied())
                    .unwrap_or(ROOT_ID);
                let kind = match &node.kind {
                    NodeKind::Object(object_mapper) => {
                        NodeKind::Object(ObjectMapper::new(object_mapper.options.clone()))
                    }
                    NodeKind::Field(field_mapper) => NodeKind::Field(field_mapper.clone()),
                };
                let update_id = update.add_node(update_parent, &node.name, kind);
                node_ids.insert(chain_id, update_id);
            }
        }
        for name in new_runtime_fields {
            if let Some(runtime_field) = self.runtime_fields.get(name) {
                update.add_runtime_field(runtime_field.clone());
            }
        }
        update
    }

    /// True if the mapping declares nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
            && self.runtime_fields.is_empty()
            && self.dynamic_templates.is_empty()
            && self.to_json() == JsonValue::Object(JsonObject::new())
    }

    pub fn root(&self) -> NodeId {
        ROOT_ID
    }

    pub(crate) fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// False for objects with `enabled: false`, whose content is not parsed.
    pub(crate) fn is_enabled(&self, object_id: NodeId) -> bool {
        self.object(object_id)
            .map_or(true, |object_mapper| object_mapper.options.is_enabled())
    }

    pub(crate) fn node(&self, node_id: NodeId) -> &MappingNode {
        &self.nodes[node_id.0]
    }

    fn node_mut(&mut self, node_id: NodeId) -> &mut MappingNode {
        &mut self.nodes[node_id.0]
    }

    pub(crate) fn object(&self, node_id: NodeId) -> Option<&ObjectMapper> {
        self.node(node_id).as_object()
    }

    pub(crate) fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.object(parent)?.child(name)
    }

    /// Full dotted path of a node, the empty string for the root.
    pub fn path(&self, node_id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = node_id;
        while let Some(parent) = self.node(current).parent {
            names.push(self.node(current).name.as_str());
            current = parent;
        }
        names.reverse();
        names.join(".")
    }

    pub(crate) fn child_path(&self, parent: NodeId, name: &str) -> String {
        if parent == ROOT_ID {
            return name.to_string();
        }
        format!("{}.{name}", self.path(parent))
    }

    /// Finds the object or field mapper at `path`.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        path.split('.')
            .try_fold(ROOT_ID, |current, name| self.child(current, name))
    }

    /// Returns the type of the field at `path`, multi-fields included.
    pub fn field_type(&self, path: &str) -> Option<&FieldType> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = ROOT_ID;
        for (pos, segment) in segments.iter().enumerate() {
            let child = self.child(current, segment)?;
            match &self.node(child).kind {
                NodeKind::Object(_) => current = child,
                NodeKind::Field(field_mapper) => {
                    return match &segments[pos + 1..] {
                        [] => Some(&field_mapper.field_type),
                        [multi_field_name] => field_mapper.multi_field(multi_field_name),
                        _ => None,
                    };
                }
            }
        }
        None
    }

    pub fn runtime_field(&self, name: &str) -> Option<&RuntimeField> {
        self.runtime_fields.get(name)
    }

    pub fn runtime_fields(&self) -> impl Iterator<Item = &RuntimeField> {
        self.runtime_fields.values()
    }

    pub fn dynamic_templates(&self) -> &[DynamicTemplate] {
        &self.dynamic_templates
    }

    /// The `dynamic` mode applying to the children of `object_id`, inherited
    /// from the closest ancestor setting it.
    pub fn effective_dynamic(&self, object_id: NodeId) -> DynamicMode {
        let mut current = Some(object_id);
        while let Some(current_id) = current {
            let node = self.node(current_id);
            if let Some(dynamic) = node.as_object().and_then(|object| object.options.dynamic) {
                return dynamic;
            }
            current = node.parent;
        }
        DynamicMode::default()
    }

    pub fn is_nested(&self, node_id: NodeId) -> bool {
        self.object(node_id)
            .map_or(false, |object_mapper| object_mapper.options.nested.is_some())
    }

    /// Closest nested ancestor of `node_id`, `None` when it is the root.
    pub(crate) fn nested_parent(&self, node_id: NodeId) -> Option<NodeId> {
        let mut current = self.node(node_id).parent;
        while let Some(current_id) = current {
            if self.is_nested(current_id) {
                return Some(current_id);
            }
            current = self.node(current_id).parent;
        }
        None
    }

    fn nested_options(&self, node_id: NodeId) -> Option<&NestedOptions> {
        self.object(node_id)?.options.nested.as_ref()
    }

    /// True if the fields of the nested object `nested_id` are copied to the
    /// root document through its `include_in_parent` chain.
    fn reaches_root_through_parents(&self, nested_id: NodeId) -> bool {
        let include_in_parent = self
            .nested_options(nested_id)
            .and_then(|nested_options| nested_options.include_in_parent)
            .unwrap_or(false);
        if !include_in_parent {
            return false;
        }
        match self.nested_parent(nested_id) {
            None => true,
            Some(parent_id) => self
                .nested_inclusion(parent_id)
                .map_or(false, |inclusion| {
                    inclusion.include_in_root || self.reaches_root_through_parents(parent_id)
                }),
        }
    }

    /// Where the fields of the nested object `nested_id` are copied, `None` if
    /// the node is not a nested object.
    pub fn nested_inclusion(&self, nested_id: NodeId) -> Option<NestedInclusion> {
        let nested_options = self.nested_options(nested_id)?;
        let include_in_parent = nested_options.include_in_parent.unwrap_or(false);
        let include_in_root = nested_options.include_in_root.unwrap_or(false)
            && !self.reaches_root_through_parents(nested_id);
        Some(NestedInclusion {
            include_in_parent,
            include_in_root,
        })
    }

    pub(crate) fn date_detection_formats(&self) -> &[(String, Vec<DateTimeFormat>)] {
        if self.date_detection == Some(false) {
            return &[];
        }
        match &self.dynamic_date_formats {
            Some(dynamic_date_formats) => dynamic_date_formats,
            None => &DEFAULT_DATE_DETECTION_FORMATS,
        }
    }

    pub(crate) fn numeric_detection(&self) -> bool {
        self.numeric_detection.unwrap_or(false)
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn num_nested_fields(&self) -> usize {
        self.node_ids().filter(|&node_id| self.is_nested(node_id)).count()
    }

    /// Number of fields counted against the total fields limit: objects,
    /// fields, multi-fields and runtime fields.
    pub fn num_fields(&self) -> usize {
        let num_multi_fields: usize = self
            .nodes
            .iter()
            .map(|node| match &node.kind {
                NodeKind::Field(field_mapper) => field_mapper.multi_fields.len(),
                NodeKind::Object(_) => 0,
            })
            .sum();
        self.nodes.len() - 1 + num_multi_fields + self.runtime_fields.len()
    }

    /// Depth of an object, the root having depth 1.
    fn depth(&self, node_id: NodeId) -> u64 {
        let mut depth = 1;
        let mut current = node_id;
        while let Some(parent) = self.node(current).parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    pub(crate) fn check_limits(&self, settings: &IndexSettings) -> Result<(), MappingError> {
        let mapping_settings = &settings.mapping;
        if self.num_nested_fields() as u64 > mapping_settings.nested_fields_limit {
            return Err(MappingError::NestedFieldsLimitExceeded {
                limit: mapping_settings.nested_fields_limit,
            });
        }
        if self.num_fields() as u64 > mapping_settings.total_fields_limit {
            return Err(MappingError::TotalFieldsLimitExceeded {
                limit: mapping_settings.total_fields_limit,
            });
        }
        if let Some(too_deep) = self.node_ids().find(|&node_id| {
            self.object(node_id).is_some() && self.depth(node_id) > mapping_settings.depth_limit
        }) {
            return Err(MappingError::DepthLimitExceeded {
                limit: mapping_settings.depth_limit,
                path: self.path(too_deep),
            });
        }
        Ok(())
    }

    fn object_to_json(&self, object_mapper: &ObjectMapper, json_obj: &mut JsonObject) {
        let options = &object_mapper.options;
        if let Some(dynamic) = options.dynamic {
            json_obj.insert(
                "dynamic".to_string(),
                serde_json::to_value(dynamic).unwrap_or(JsonValue::Null),
            );
        }
        if let Some(enabled) = options.enabled {
            json_obj.insert("enabled".to_string(), JsonValue::Bool(enabled));
        }
        let properties: JsonObject = object_mapper
            .children()
            .map(|(name, child)| (name.to_string(), self.node_to_json(child)))
            .collect();
        if !properties.is_empty() {
            json_obj.insert("properties".to_string(), JsonValue::Object(properties));
        }
    }

    fn node_to_json(&self, node_id: NodeId) -> JsonValue {
        let object_mapper = match &self.node(node_id).kind {
            NodeKind::Field(field_mapper) => return field_mapper.to_json(),
            NodeKind::Object(object_mapper) => object_mapper,
        };
        let mut json_obj = JsonObject::new();
        if let Some(nested_options) = &object_mapper.options.nested {
            json_obj.insert("type".to_string(), JsonValue::String("nested".to_string()));
            if let Some(include_in_parent) = nested_options.include_in_parent {
                json_obj.insert(
                    "include_in_parent".to_string(),
                    JsonValue::Bool(include_in_parent),
                );
            }
            if let Some(include_in_root) = nested_options.include_in_root {
                json_obj.insert("include_in_root".to_string(), JsonValue::Bool(include_in_root));
            }
        } else if object_mapper.children.is_empty() {
            json_obj.insert("type".to_string(), JsonValue::String("object".to_string()));
        }
        self.object_to_json(object_mapper, &mut json_obj);
        JsonValue::Object(json_obj)
    }

    /// Serializes the mapping back to its definition.
    pub fn to_json(&self) -> JsonValue {
        let mut mapping_obj = JsonObject::new();
        if let Some(date_detection) = self.date_detection {
            mapping_obj.insert("date_detection".to_string(), JsonValue::Bool(date_detection));
        }
        if let Some(numeric_detection) = self.numeric_detection {
            mapping_obj.insert(
                "numeric_detection".to_string(),
                JsonValue::Bool(numeric_detection),
            );
        }
        if let Some(dynamic_date_formats) = &self.dynamic_date_formats {
            let format_strs = dynamic_date_formats
                .iter()
                .map(|(format_str, _)| JsonValue::String(format_str.clone()))
                .collect();
            mapping_obj.insert(
                "dynamic_date_formats".to_string(),
                JsonValue::Array(format_strs),
            );
        }
        if !self.dynamic_templates.is_empty() {
            let templates = self
                .dynamic_templates
                .iter()
                .map(DynamicTemplate::to_json)
                .collect();
            mapping_obj.insert("dynamic_templates".to_string(), JsonValue::Array(templates));
        }
        if !self.runtime_fields.is_empty() {
            let runtime_obj: JsonObject = self
                .runtime_fields
                .iter()
                .map(|(name, runtime_field)| (name.clone(), runtime_field.to_json()))
                .collect();
            mapping_obj.insert("runtime".to_string(), JsonValue::Object(runtime_obj));
        }
        if let Some(root_mapper) = self.object(ROOT_ID) {
            self.object_to_json(root_mapper, &mut mapping_obj);
        }
        JsonValue::Object(mapping_obj)
    }
}
