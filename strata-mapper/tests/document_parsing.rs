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

use matches::assert_matches;
use serde_json::{json, Value as JsonValue};
use strata_config::IndexSettings;
use strata_mapper::{
    DocParsingError, DocumentParser, DynamicTemplate, FieldKind, FieldScript, IndexedValue,
    JsonObject, Mapping, MapperService, ParsedDocument, ScriptError, ValueEmitter,
    IGNORED_FIELD_NAME,
};

fn parse_with_settings(
    mapping_json: JsonValue,
    settings: &IndexSettings,
    doc: JsonValue,
) -> Result<ParsedDocument, DocParsingError> {
    let mapping = Mapping::parse(&mapping_json, settings).unwrap();
    DocumentParser::new(&mapping, settings).parse_json_value(doc)
}

fn parse(mapping_json: JsonValue, doc: JsonValue) -> Result<ParsedDocument, DocParsingError> {
    parse_with_settings(mapping_json, &IndexSettings::default(), doc)
}

fn count_kind(parsed: &ParsedDocument, field_name: &str, kind: FieldKind) -> usize {
    parsed
        .root()
        .unwrap()
        .fields_named(field_name)
        .filter(|field| field.kind == kind)
        .count()
}

#[test]
fn test_long_field_parsed_from_string() {
    let parsed = parse(
        json!({"properties": {"field": {"type": "long"}}}),
        json!({"field": "123"}),
    )
    .unwrap();
    assert_eq!(parsed.docs.len(), 1);
    let entries: Vec<&IndexedValue> = parsed
        .root()
        .unwrap()
        .fields_named("field")
        .map(|field| &field.value)
        .collect();
    assert_eq!(entries, vec![&IndexedValue::I64(123), &IndexedValue::I64(123)]);
}

#[test]
fn test_integer_types_reject_out_of_range_values() {
    for (type_name, too_large, in_range) in [
        ("byte", "128", "127"),
        ("short", "32768", "-32768"),
        ("integer", "2147483648", "2147483647"),
        ("long", "9223372036854775808", "-9223372036854775808"),
    ] {
        let mapping_json = json!({"properties": {"num": {"type": type_name}}});
        let error = parse(mapping_json.clone(), json!({ "num": too_large })).unwrap_err();
        assert!(
            error.to_string().contains(type_name),
            "{type_name}: {error}"
        );
        let parsed = parse(mapping_json, json!({ "num": in_range })).unwrap();
        assert_eq!(parsed.root().unwrap().fields_named("num").count(), 2);
    }
}

#[test]
fn test_numeric_entries_with_store() {
    for type_name in ["byte", "short", "integer", "long", "float", "half_float", "double"] {
        let parsed = parse(
            json!({"properties": {"num": {"type": type_name}}}),
            json!({"num": 12}),
        )
        .unwrap();
        assert_eq!(parsed.root().unwrap().fields_named("num").count(), 2);
        let parsed = parse(
            json!({"properties": {"num": {"type": type_name, "store": true}}}),
            json!({"num": 12}),
        )
        .unwrap();
        assert_eq!(parsed.root().unwrap().fields_named("num").count(), 3);
        assert_eq!(count_kind(&parsed, "num", FieldKind::Stored), 1);
    }
}

#[test]
fn test_template_placeholders() {
    let template = DynamicTemplate::parse(
        "type_set",
        &json!({
            "match_mapping_type": "string",
            "mapping": {"type": "type_set_{dynamic_type}_{dynamicType}"}
        }),
    )
    .unwrap();
    let mapping = template.mapping_for_name("input", "input");
    assert_eq!(mapping["type"], json!("type_set_input_input"));
}

#[test]
fn test_template_placeholders_applied_by_parser() {
    let parsed = parse(
        json!({"dynamic_templates": [{
            "unindexed_strings": {
                "match_mapping_type": "string",
                "mapping": {"type": "{dynamic_type}", "index": false}
            }
        }]}),
        json!({"title": "hello"}),
    )
    .unwrap();
    let mapping_update = parsed.dynamic_mapping_update.as_ref().unwrap();
    let field_type = mapping_update.field_type("title").unwrap();
    assert_eq!(field_type.type_name(), "text");
    assert_eq!(count_kind(&parsed, "title", FieldKind::Indexed), 0);
}

#[test]
fn test_blank_completion_inputs() {
    let parsed = parse(
        json!({"properties": {"completion": {"type": "completion"}}}),
        json!({"completion": ["  ", ""]}),
    )
    .unwrap();
    assert_eq!(parsed.docs.len(), 1);
    assert_eq!(count_kind(&parsed, "completion", FieldKind::Suggest), 0);
    let ignored: Vec<&str> = parsed
        .root()
        .unwrap()
        .str_values(IGNORED_FIELD_NAME)
        .collect();
    assert_eq!(ignored, vec!["completion"]);
}

struct EmitMany(usize);

impl FieldScript for EmitMany {
    fn execute(&self, _source: &JsonObject, emitter: &mut ValueEmitter) -> Result<(), ScriptError> {
        for value in 0..self.0 {
            emitter.emit(json!(value))?;
        }
        Ok(())
    }
}

#[test]
fn test_runtime_field_values_limit() {
    let mapping = Mapping::parse(
        &json!({"runtime": {"computed": {"type": "long"}}}),
        &IndexSettings::default(),
    )
    .unwrap();
    let runtime_field = mapping.runtime_field("computed").unwrap();
    let values = runtime_field
        .compute_values(&JsonObject::new(), Some(&EmitMany(100)))
        .unwrap();
    assert_eq!(values.len(), 100);
    let error = runtime_field
        .compute_values(&JsonObject::new(), Some(&EmitMany(101)))
        .unwrap_err();
    assert!(error
        .to_string()
        .contains("emitting [101] values while the maximum number of values allowed is [100]"));
}

#[test]
fn test_nested_documents_limit() {
    let limit = 3;
    let mut settings = IndexSettings::default();
    settings.mapping.nested_objects_limit = limit;
    let mapping_json = json!({"properties": {"items": {
        "type": "nested",
        "properties": {"id": {"type": "long"}}
    }}});
    let items = |num_items: u64| {
        let items: Vec<JsonValue> = (0..num_items).map(|id| json!({ "id": id })).collect();
        json!({ "items": items })
    };
    let parsed = parse_with_settings(mapping_json.clone(), &settings, items(limit)).unwrap();
    assert_eq!(parsed.num_nested_docs(), limit as usize);
    let error = parse_with_settings(mapping_json, &settings, items(limit + 1)).unwrap_err();
    assert_matches!(error, DocParsingError::NestedDocumentsLimitExceeded { limit: 3 });
}

#[test]
fn test_include_in_root_copies_values_once() {
    let mapping_json = json!({"properties": {"a": {
        "type": "nested",
        "include_in_root": true,
        "properties": {"b": {
            "type": "nested",
            "include_in_parent": true,
            "include_in_root": true,
            "properties": {"c": {
                "type": "nested",
                "include_in_parent": true,
                "include_in_root": true,
                "properties": {"v": {"type": "keyword"}}
            }}
        }}
    }}});
    let parsed = parse(mapping_json, json!({"a": {"b": {"c": {"v": "x"}}}})).unwrap();
    assert_eq!(parsed.num_nested_docs(), 3);
    assert_eq!(count_kind(&parsed, "a.b.c.v", FieldKind::Indexed), 1);
    assert_eq!(count_kind(&parsed, "a.b.c.v", FieldKind::DocValues), 1);
    // Each nested document holds its own fields plus the ones included from
    // its children.
    let nested_paths: Vec<&str> = parsed
        .docs
        .iter()
        .filter_map(|doc| doc.nested_path.as_deref())
        .collect();
    assert_eq!(nested_paths, vec!["a.b.c", "a.b", "a"]);
    for nested_doc in &parsed.docs[..3] {
        assert_eq!(nested_doc.fields_named("a.b.c.v").count(), 2);
    }
}

#[test]
fn test_include_in_root_without_parent_chain() {
    let mapping_json = json!({"properties": {"a": {
        "type": "nested",
        "properties": {"b": {
            "type": "nested",
            "include_in_root": true,
            "properties": {"v": {"type": "keyword"}}
        }}
    }}});
    let parsed = parse(mapping_json, json!({"a": [{"b": {"v": "x"}}, {"b": {"v": "y"}}]})).unwrap();
    let root_values: Vec<&str> = parsed
        .root()
        .unwrap()
        .fields_named("a.b.v")
        .filter(|field| field.kind == FieldKind::Indexed)
        .filter_map(|field| match &field.value {
            IndexedValue::Str(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(root_values, vec!["x", "y"]);
}

#[test]
fn test_dotted_names_are_expanded_into_objects() {
    let parsed = parse(json!({}), json!({"a.b.c": 1, "a.b.d": "two", "a.e": true})).unwrap();
    let update = parsed.dynamic_mapping_update.unwrap();
    assert_eq!(update.field_type("a.b.c").unwrap().type_name(), "long");
    assert_eq!(update.field_type("a.b.d").unwrap().type_name(), "text");
    assert_eq!(update.field_type("a.e").unwrap().type_name(), "boolean");
    assert!(update.to_json()["properties"]["a"]["properties"]["b"]["properties"]
        .get("c")
        .is_some());
}

#[test]
fn test_strict_mapping_through_service() {
    let mapper_service = MapperService::with_mapping(
        &json!({"dynamic": "strict", "properties": {"title": {"type": "text"}}}),
        IndexSettings::default(),
    )
    .unwrap();
    assert!(mapper_service.parse_document(r#"{"title": "ok"}"#).is_ok());
    let error = mapper_service
        .parse_document(r#"{"title": "ok", "extra": 1}"#)
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "mapping set to strict, dynamic introduction of [extra] within [_doc] is not allowed"
    );
    assert_eq!(mapper_service.snapshot().version, 0);
}
