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

//! Turns one JSON document into the physical documents handed to the index.
//!
//! The document is walked as a stream of tokens. Unmapped fields are mapped
//! on the fly according to the dynamic mode of their enclosing object. New
//! mappers go to a private copy of the mapping, and the diff against the
//! mapping the parser was created with is returned as the dynamic mapping
//! update.

mod document;

use serde_json::{json, Value as JsonValue};
use strata_common::rate_limited_warn;
use strata_config::IndexSettings;
use tracing::debug;

use self::document::DocumentBuilder;
pub use self::document::{ParsedDocument, PhysicalDocument};
use crate::dynamic::{detect_dynamic_type, DetectedType, DynamicMode, DynamicType};
use crate::error::DocParsingError;
use crate::field_types::{FieldType, MappingParserContext, ValueError};
use crate::mapping::{template_definition, Mapping, NodeId, NodeKind, ROOT_NAME};
use crate::runtime::RuntimeField;
use crate::tokens::{
    DotExpandingTokenSource, JsonValueTokenSource, Token, TokenError, TokenLocation, TokenSource,
};
use crate::{is_metadata_field, JsonObject};

/// Parses documents against a fixed mapping.
pub struct DocumentParser<'a> {
    mapping: &'a Mapping,
    settings: &'a IndexSettings,
}

impl<'a> DocumentParser<'a> {
    pub fn new(mapping: &'a Mapping, settings: &'a IndexSettings) -> DocumentParser<'a> {
        DocumentParser { mapping, settings }
    }

    pub fn parse_json_str(&self, doc_json: &str) -> Result<ParsedDocument, DocParsingError> {
        let json_value: JsonValue = serde_json::from_str(doc_json)
            .map_err(|error| DocParsingError::NotJsonObject(error.to_string()))?;
        self.parse_json_value(json_value)
    }

    pub fn parse_json_value(&self, doc: JsonValue) -> Result<ParsedDocument, DocParsingError> {
        if !doc.is_object() {
            return Err(DocParsingError::NotJsonObject(format!(
                "expected an object, got `{doc}`"
            )));
        }
        self.parse_tokens(JsonValueTokenSource::new(doc))
    }

    /// Parses the document read from `token_source`. The mapping the parser
    /// was created with is left untouched: fields introduced by dynamic
    /// mapping are returned in [`ParsedDocument::dynamic_mapping_update`].
    pub fn parse_tokens<S: TokenSource>(
        &self,
        token_source: S,
    ) -> Result<ParsedDocument, DocParsingError> {
        let mut parse_context = ParseContext {
            tokens: DotExpandingTokenSource::new(token_source),
            mappings: MappingState::new(self.mapping),
            settings: self.settings,
            builder: DocumentBuilder::new(self.settings.mapping.nested_objects_limit),
        };
        parse_context.parse_document()?;
        Ok(parse_context.finish())
    }
}

/// The mapping a document is parsed against, copied on the first dynamic
/// update.
struct MappingState<'a> {
    base: &'a Mapping,
    working: Option<Mapping>,
    new_runtime_fields: Vec<String>,
}

impl<'a> MappingState<'a> {
    fn new(base: &'a Mapping) -> MappingState<'a> {
        MappingState {
            base,
            working: None,
            new_runtime_fields: Vec::new(),
        }
    }

    fn current(&self) -> &Mapping {
        self.working.as_ref().unwrap_or(self.base)
    }

    fn working(&mut self) -> &mut Mapping {
        let base = self.base;
        self.working.get_or_insert_with(|| base.clone())
    }

    fn add_runtime_field(&mut self, runtime_field: RuntimeField) {
        self.new_runtime_fields
            .push(runtime_field.name().to_string());
        self.working().add_runtime_field(runtime_field);
    }

    fn into_update(self) -> Option<Mapping> {
        let working = self.working?;
        Some(working.extract_update(self.base.num_nodes(), &self.new_runtime_fields))
    }
}

#[derive(Clone, Copy)]
enum MappedChild {
    Object(NodeId),
    Field(NodeId),
}

/// A field created by dynamic mapping.
enum DynamicField {
    Mapped(JsonValue),
    Runtime(JsonValue),
}

struct ParseContext<'a, S> {
    tokens: DotExpandingTokenSource<S>,
    mappings: MappingState<'a>,
    settings: &'a IndexSettings,
    builder: DocumentBuilder,
}

impl<'a, S: TokenSource> ParseContext<'a, S> {
    fn parse_document(&mut self) -> Result<(), DocParsingError> {
        match self.next_token()? {
            Token::StartObject => {}
            other => {
                return Err(DocParsingError::NotJsonObject(format!(
                    "expected [START_OBJECT], found [{}]",
                    other.kind_name()
                )));
            }
        }
        let root = self.mappings.current().root();
        if !self.mappings.current().is_enabled(root) {
            self.tokens.skip_children()?;
            return Ok(());
        }
        self.parse_object_fields(root)?;
        if let Some(token) = self.tokens.next_token()? {
            return Err(self.malformed(format!(
                "unexpected [{}] after the end of the document",
                token.kind_name()
            )));
        }
        Ok(())
    }

    fn finish(self) -> ParsedDocument {
        ParsedDocument {
            docs: self.builder.build(),
            dynamic_mapping_update: self.mappings.into_update(),
        }
    }

    fn next_token(&mut self) -> Result<Token, DocParsingError> {
        match self.tokens.next_token()? {
            Some(token) => Ok(token),
            None => Err(self.malformed("unexpected end of document")),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> DocParsingError {
        DocParsingError::Tokens(TokenError {
            location: self.tokens.token_location(),
            message: message.into(),
        })
    }

    fn lookup(&self, parent_id: NodeId, name: &str) -> Option<MappedChild> {
        let mapping = self.mappings.current();
        let child_id = mapping.child(parent_id, name)?;
        if mapping.node(child_id).as_object().is_some() {
            Some(MappedChild::Object(child_id))
        } else {
            Some(MappedChild::Field(child_id))
        }
    }

    fn strict_error(&self, parent_id: NodeId, name: &str) -> DocParsingError {
        let mapping = self.mappings.current();
        let parent = if parent_id == mapping.root() {
            ROOT_NAME.to_string()
        } else {
            mapping.path(parent_id)
        };
        DocParsingError::StrictDynamicMapping {
            field: name.to_string(),
            parent,
        }
    }

    fn parse_object_fields(&mut self, object_id: NodeId) -> Result<(), DocParsingError> {
        loop {
            match self.next_token()? {
                Token::EndObject => return Ok(()),
                Token::FieldName(name) => self.parse_field(object_id, &name)?,
                other => {
                    return Err(self.malformed(format!(
                        "expected a field name, found [{}]",
                        other.kind_name()
                    )));
                }
            }
        }
    }

    fn parse_field(&mut self, object_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        if name.is_empty() {
            return Err(DocParsingError::EmptyFieldName {
                location: self.tokens.token_location(),
            });
        }
        if object_id == self.mappings.current().root() && is_metadata_field(name) {
            return Err(DocParsingError::MetadataField {
                field: name.to_string(),
            });
        }
        let token = self.next_token()?;
        self.parse_value(object_id, name, token)
    }

    fn parse_value(
        &mut self,
        parent_id: NodeId,
        name: &str,
        token: Token,
    ) -> Result<(), DocParsingError> {
        match token {
            Token::StartObject => self.parse_object_value(parent_id, name),
            Token::StartArray => self.parse_array(parent_id, name),
            Token::Null => self.parse_null(parent_id, name),
            other => {
                let kind_name = other.kind_name();
                match other.into_json_scalar() {
                    Some(value) => self.parse_scalar(parent_id, name, value),
                    None => Err(self.malformed(format!("expected a value, found [{kind_name}]"))),
                }
            }
        }
    }

    fn parse_object_value(&mut self, parent_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        match self.lookup(parent_id, name) {
            Some(MappedChild::Object(object_id)) => self.parse_object(object_id, name),
            Some(MappedChild::Field(field_id)) => self.parse_leaf_object(field_id),
            None => self.parse_dynamic_object(parent_id, name),
        }
    }

    fn parse_object(&mut self, object_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        let mapping = self.mappings.current();
        if !mapping.is_enabled(object_id) {
            self.tokens.skip_children()?;
            return Ok(());
        }
        let nested_inclusion = mapping.nested_inclusion(object_id);
        if let Some(inclusion) = nested_inclusion {
            self.builder.start_nested(mapping.path(object_id), inclusion)?;
        }
        self.tokens.content_path_mut().add(name);
        let parse_result = self.parse_object_fields(object_id);
        self.tokens.content_path_mut().remove();
        parse_result?;
        if nested_inclusion.is_some() {
            self.builder.end_nested();
        }
        Ok(())
    }

    fn parse_dynamic_object(&mut self, parent_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        let mapping = self.mappings.current();
        match mapping.effective_dynamic(parent_id) {
            DynamicMode::Strict => return Err(self.strict_error(parent_id, name)),
            DynamicMode::False => {
                self.tokens.skip_children()?;
                return Ok(());
            }
            DynamicMode::True | DynamicMode::Runtime => {}
        }
        let path = mapping.child_path(parent_id, name);
        let definition = mapping
            .dynamic_templates()
            .iter()
            .find(|template| template.matches(&path, name, DynamicType::Object))
            .map(|template| template_definition(template, name, DynamicType::Object));
        let node_id = match definition {
            Some(definition) => self.add_dynamic_field(parent_id, name, &definition)?,
            None => {
                debug!(field = %path, "dynamic object introduced");
                self.mappings.working().add_object(parent_id, name)
            }
        };
        if self.mappings.current().node(node_id).as_object().is_some() {
            self.parse_object(node_id, name)
        } else {
            self.parse_leaf_object(node_id)
        }
    }

    /// Indexes an object value given to a leaf field, e.g. a geo point.
    fn parse_leaf_object(&mut self, field_id: NodeId) -> Result<(), DocParsingError> {
        let mapping = self.mappings.current();
        if let NodeKind::Field(field_mapper) = &mapping.node(field_id).kind {
            if !field_mapper.field_type.accepts_object_value() {
                return Err(DocParsingError::FieldParsing {
                    field: mapping.path(field_id),
                    field_type: field_mapper.field_type.type_name().to_string(),
                    cause: "expected a value but got [START_OBJECT]".to_string(),
                    location: self.tokens.token_location(),
                });
            }
        }
        let value = self.read_leaf_value(Token::StartObject)?;
        self.index_value(field_id, &value)
    }

    fn parse_array(&mut self, parent_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        if let Some(MappedChild::Field(field_id)) = self.lookup(parent_id, name) {
            if self.field_parses_arrays(field_id) {
                let value = self.read_leaf_value(Token::StartArray)?;
                return self.index_value(field_id, &value);
            }
        }
        loop {
            let token = self.next_token()?;
            if token == Token::EndArray {
                return Ok(());
            }
            self.parse_value(parent_id, name, token)?;
        }
    }

    fn field_parses_arrays(&self, field_id: NodeId) -> bool {
        match &self.mappings.current().node(field_id).kind {
            NodeKind::Field(field_mapper) => field_mapper.field_type.parses_array_value(),
            NodeKind::Object(_) => false,
        }
    }

    fn parse_null(&mut self, parent_id: NodeId, name: &str) -> Result<(), DocParsingError> {
        match self.lookup(parent_id, name) {
            Some(MappedChild::Field(field_id)) => {
                let null_value = match &self.mappings.current().node(field_id).kind {
                    NodeKind::Field(field_mapper) => field_mapper.field_type.null_value().cloned(),
                    NodeKind::Object(_) => None,
                };
                match null_value {
                    Some(null_value) => self.index_value(field_id, &null_value),
                    None => Ok(()),
                }
            }
            Some(MappedChild::Object(_)) => Ok(()),
            None => {
                if self.mappings.current().effective_dynamic(parent_id) == DynamicMode::Strict {
                    return Err(self.strict_error(parent_id, name));
                }
                Ok(())
            }
        }
    }

    fn parse_scalar(
        &mut self,
        parent_id: NodeId,
        name: &str,
        value: JsonValue,
    ) -> Result<(), DocParsingError> {
        match self.lookup(parent_id, name) {
            Some(MappedChild::Field(field_id)) => self.index_value(field_id, &value),
            Some(MappedChild::Object(object_id)) => Err(DocParsingError::ObjectExpected {
                field: self.mappings.current().path(object_id),
                location: self.tokens.token_location(),
            }),
            None => self.parse_dynamic_value(parent_id, name, value),
        }
    }

    fn parse_dynamic_value(
        &mut self,
        parent_id: NodeId,
        name: &str,
        value: JsonValue,
    ) -> Result<(), DocParsingError> {
        let mapping = self.mappings.current();
        let path = mapping.child_path(parent_id, name);
        // Runtime fields are computed at search time: their values stay in
        // the source only.
        if mapping.runtime_field(&path).is_some() {
            return Ok(());
        }
        let dynamic_mode = mapping.effective_dynamic(parent_id);
        match dynamic_mode {
            DynamicMode::Strict => return Err(self.strict_error(parent_id, name)),
            DynamicMode::False => return Ok(()),
            DynamicMode::True | DynamicMode::Runtime => {}
        }
        let Some(detected) = detect_dynamic_type(
            &value,
            mapping.date_detection_formats(),
            mapping.numeric_detection(),
        ) else {
            return Ok(());
        };
        let dynamic_type = detected.dynamic_type;
        let template = mapping
            .dynamic_templates()
            .iter()
            .find(|template| template.matches(&path, name, dynamic_type));
        let dynamic_field = match template {
            Some(template) if template.is_runtime() => DynamicField::Runtime(with_date_format(
                template_definition(template, name, dynamic_type),
                &detected,
            )),
            Some(template) => DynamicField::Mapped(with_date_format(
                template_definition(template, name, dynamic_type),
                &detected,
            )),
            None if dynamic_mode == DynamicMode::Runtime => {
                match dynamic_type.default_runtime_type() {
                    Some(runtime_type) => DynamicField::Runtime(with_date_format(
                        json!({ "type": runtime_type }),
                        &detected,
                    )),
                    None => DynamicField::Mapped(default_definition(&detected)),
                }
            }
            None => DynamicField::Mapped(default_definition(&detected)),
        };
        match dynamic_field {
            DynamicField::Runtime(definition) => {
                let runtime_field = RuntimeField::parse(&path, &definition)?;
                debug!(field = %path, field_type = %runtime_field.field_type(), "dynamic runtime field introduced");
                self.mappings.add_runtime_field(runtime_field);
                Ok(())
            }
            DynamicField::Mapped(definition) => {
                let node_id = self.add_dynamic_field(parent_id, name, &definition)?;
                match self.lookup(parent_id, name) {
                    Some(MappedChild::Field(_)) => self.index_value(node_id, &value),
                    _ => Err(DocParsingError::ObjectExpected {
                        field: path,
                        location: self.tokens.token_location(),
                    }),
                }
            }
        }
    }

    fn add_dynamic_field(
        &mut self,
        parent_id: NodeId,
        name: &str,
        definition: &JsonValue,
    ) -> Result<NodeId, DocParsingError> {
        let ctx = MappingParserContext {
            settings: self.settings,
        };
        let mapping = self.mappings.working();
        let node_id = mapping.parse_definition(parent_id, name, definition, &ctx)?;
        debug!(
            field = %mapping.path(node_id),
            field_type = mapping.node(node_id).type_name(),
            "dynamic field introduced"
        );
        Ok(node_id)
    }

    fn index_value(&mut self, field_id: NodeId, value: &JsonValue) -> Result<(), DocParsingError> {
        let location = self.tokens.token_location();
        let mapping = self.mappings.current();
        let NodeKind::Field(field_mapper) = &mapping.node(field_id).kind else {
            return Ok(());
        };
        let path = mapping.path(field_id);
        index_field_value(&mut self.builder, &field_mapper.field_type, &path, value, location)?;
        for (multi_field_name, multi_field_type) in &field_mapper.multi_fields {
            let multi_field_path = format!("{path}.{multi_field_name}");
            index_field_value(
                &mut self.builder,
                multi_field_type,
                &multi_field_path,
                value,
                location,
            )?;
        }
        Ok(())
    }

    /// Reads the whole value starting with `first` as JSON. Dotted keys inside
    /// it are kept as they are.
    fn read_leaf_value(&mut self, first: Token) -> Result<JsonValue, DocParsingError> {
        let was_within_leaf_object = self.tokens.content_path().is_within_leaf_object();
        self.tokens
            .content_path_mut()
            .set_within_leaf_object(true);
        let read_result = self.read_json(first);
        self.tokens
            .content_path_mut()
            .set_within_leaf_object(was_within_leaf_object);
        read_result
    }

    fn read_json(&mut self, first: Token) -> Result<JsonValue, DocParsingError> {
        match first {
            Token::StartObject => {
                let mut json_obj = JsonObject::new();
                loop {
                    match self.next_token()? {
                        Token::EndObject => return Ok(JsonValue::Object(json_obj)),
                        Token::FieldName(key) => {
                            let token = self.next_token()?;
                            let value = self.read_json(token)?;
                            json_obj.insert(key, value);
                        }
                        other => {
                            return Err(self.malformed(format!(
                                "expected a field name, found [{}]",
                                other.kind_name()
                            )));
                        }
                    }
                }
            }
            Token::StartArray => {
                let mut values = Vec::new();
                loop {
                    let token = self.next_token()?;
                    if token == Token::EndArray {
                        return Ok(JsonValue::Array(values));
                    }
                    values.push(self.read_json(token)?);
                }
            }
            other => {
                let kind_name = other.kind_name();
                match other.into_json_scalar() {
                    Some(value) => Ok(value),
                    None => Err(self.malformed(format!("expected a value, found [{kind_name}]"))),
                }
            }
        }
    }
}

fn index_field_value(
    builder: &mut DocumentBuilder,
    field_type: &FieldType,
    path: &str,
    value: &JsonValue,
    location: TokenLocation,
) -> Result<(), DocParsingError> {
    match field_type.parse_value(path, value) {
        Ok(field_values) => {
            if field_values.ignored {
                builder.add_ignored_field(path);
            }
            if !field_values.fields.is_empty() && !field_type.has_doc_values() {
                builder.add_field_name(path);
            }
            builder.add_fields(field_values.fields);
            Ok(())
        }
        Err(ValueError::Malformed(cause)) if field_type.ignore_malformed() => {
            rate_limited_warn!(
                limit_per_min = 10,
                field = %path,
                cause = %cause,
                "ignoring malformed value"
            );
            builder.add_ignored_field(path);
            Ok(())
        }
        Err(value_error) => Err(DocParsingError::FieldParsing {
            field: path.to_string(),
            field_type: field_type.type_name().to_string(),
            cause: value_error.to_string(),
            location,
        }),
    }
}

/// Mapping of an unmapped value no dynamic template applies to.
fn default_definition(detected: &DetectedType) -> JsonValue {
    match detected.dynamic_type {
        DynamicType::String => json!({
            "type": "text",
            "fields": {
                "keyword": FieldType::default_keyword_sub_field().to_json(),
            },
        }),
        dynamic_type => with_date_format(
            json!({ "type": dynamic_type.default_mapping_type() }),
            detected,
        ),
    }
}

/// Sets the detected date format on date definitions that do not set one.
fn with_date_format(mut definition: JsonValue, detected: &DetectedType) -> JsonValue {
    let Some(date_format) = &detected.date_format else {
        return definition;
    };
    if let JsonValue::Object(definition_obj) = &mut definition {
        let is_date = definition_obj.get("type").and_then(JsonValue::as_str) == Some("date");
        if is_date && !definition_obj.contains_key("format") {
            definition_obj.insert("format".to_string(), JsonValue::String(date_format.clone()));
        }
    }
    definition
}
