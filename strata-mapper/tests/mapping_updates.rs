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

use assert_json_diff::assert_json_eq;
use matches::assert_matches;
use serde_json::json;
use strata_config::IndexSettings;
use strata_mapper::{DocParsingError, FieldKind, MapperService, MappingError};

fn nested_service() -> MapperService {
    MapperService::with_mapping(
        &json!({"properties": {"comments": {
            "type": "nested",
            "include_in_parent": true,
            "properties": {"author": {"type": "keyword"}}
        }}}),
        IndexSettings::default(),
    )
    .unwrap()
}

#[test]
fn test_nested_inclusion_flags_are_immutable() {
    let mapper_service = nested_service();
    let before = mapper_service.mapping().to_json();
    let error = mapper_service
        .merge(&json!({"properties": {"comments": {
            "type": "nested",
            "include_in_parent": false
        }}}))
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "the [include_in_parent] parameter can't be updated on a nested object mapping [comments]"
    );
    let error = mapper_service
        .merge(&json!({"properties": {"comments": {
            "type": "nested",
            "include_in_root": true
        }}}))
        .unwrap_err();
    assert!(error.to_string().contains("[include_in_root]"));
    assert_json_eq!(mapper_service.mapping().to_json(), before);
    assert_eq!(mapper_service.snapshot().version, 0);

    // Restating the current values is accepted.
    mapper_service
        .merge(&json!({"properties": {"comments": {
            "type": "nested",
            "include_in_parent": true,
            "properties": {"date": {"type": "date"}}
        }}}))
        .unwrap();
    assert!(mapper_service.mapping().field_type("comments.date").is_some());
}

#[test]
fn test_root_inclusion_collapsed_across_merges() {
    let mapper_service = MapperService::with_mapping(&json!({}), IndexSettings::default()).unwrap();
    mapper_service
        .merge(&json!({"properties": {"a": {"type": "nested", "include_in_root": true}}}))
        .unwrap();
    mapper_service
        .merge(&json!({"properties": {"a": {
            "type": "nested",
            "properties": {"b": {
                "type": "nested",
                "include_in_parent": true,
                "include_in_root": true
            }}
        }}}))
        .unwrap();
    let parsed = mapper_service
        .parse_document(r#"{"a": {"b": {"x": 1}}}"#)
        .unwrap();
    assert_eq!(parsed.num_nested_docs(), 2);
    let root_kinds: Vec<FieldKind> = parsed
        .root()
        .unwrap()
        .fields_named("a.b.x")
        .map(|field| field.kind)
        .collect();
    assert_eq!(root_kinds.len(), 2);
    assert!(root_kinds.contains(&FieldKind::Point));
    assert!(root_kinds.contains(&FieldKind::DocValues));
}

#[test]
fn test_failed_merge_applies_nothing() {
    let mapper_service = nested_service();
    let error = mapper_service
        .merge(&json!({"properties": {
            "new_field": {"type": "long"},
            "comments": {"type": "nested", "properties": {"author": {"type": "long"}}}
        }}))
        .unwrap_err();
    assert_matches!(error, MappingError::MergeConflict(_));
    assert!(mapper_service.mapping().field_type("new_field").is_none());
}

#[test]
fn test_merge_serializes_merged_mapping() {
    let mapper_service = nested_service();
    mapper_service
        .merge(&json!({
            "dynamic": "strict",
            "properties": {"title": {"type": "text", "fields": {"raw": {"type": "keyword"}}}}
        }))
        .unwrap();
    let mapping_json = mapper_service.mapping().to_json();
    assert_eq!(mapping_json["dynamic"], json!("strict"));
    assert_eq!(
        mapping_json["properties"]["comments"]["include_in_parent"],
        json!(true)
    );
    assert_eq!(
        mapping_json["properties"]["title"]["fields"]["raw"]["type"],
        json!("keyword")
    );
}

#[test]
fn test_nested_fields_limit() {
    let nested_fields = |num_nested: usize| {
        let mut properties = serde_json::Map::new();
        for nested_id in 0..num_nested {
            properties.insert(format!("nested_{nested_id}"), json!({"type": "nested"}));
        }
        json!({ "properties": properties })
    };
    let settings = || {
        let mut settings = IndexSettings::default();
        settings.mapping.nested_fields_limit = 2;
        settings
    };
    assert!(MapperService::with_mapping(&nested_fields(2), settings()).is_ok());
    let error = MapperService::with_mapping(&nested_fields(3), settings())
        .err()
        .unwrap();
    assert_matches!(error, MappingError::NestedFieldsLimitExceeded { limit: 2 });

    let mapper_service = MapperService::with_mapping(&nested_fields(2), settings()).unwrap();
    let error = mapper_service
        .merge(&json!({"properties": {"one_more": {"type": "nested"}}}))
        .unwrap_err();
    assert_matches!(error, MappingError::NestedFieldsLimitExceeded { limit: 2 });
}

#[test]
fn test_dynamic_update_over_total_fields_limit() {
    let mut settings = IndexSettings::default();
    settings.mapping.total_fields_limit = 2;
    let mapper_service = MapperService::new(settings);
    mapper_service.parse_document(r#"{"a": 1, "b": 2}"#).unwrap();
    let error = mapper_service
        .parse_document(r#"{"c": 3}"#)
        .unwrap_err();
    assert_matches!(
        error,
        DocParsingError::MappingUpdate(MappingError::TotalFieldsLimitExceeded { limit: 2 })
    );
    assert!(mapper_service.mapping().field_type("c").is_none());
    assert_eq!(mapper_service.snapshot().version, 1);
}

#[test]
fn test_depth_limit() {
    let mut settings = IndexSettings::default();
    settings.mapping.depth_limit = 2;
    let mapper_service = MapperService::new(settings);
    mapper_service.parse_document(r#"{"a": {"b": 1}}"#).unwrap();
    let error = mapper_service
        .parse_document(r#"{"a": {"c": {"d": 1}}}"#)
        .unwrap_err();
    assert_matches!(
        error,
        DocParsingError::MappingUpdate(MappingError::DepthLimitExceeded { limit: 2, .. })
    );
}

#[test]
fn test_concurrent_dynamic_updates() {
    strata_common::setup_logging_for_tests();
    let mapper_service = MapperService::new(IndexSettings::default());
    let num_threads = 6;
    std::thread::scope(|scope| {
        for thread_id in 0..num_threads {
            let mapper_service = &mapper_service;
            scope.spawn(move || {
                let doc_json = format!(r#"{{"shared": "text", "field_{thread_id}": {thread_id}}}"#);
                mapper_service.parse_document(&doc_json).unwrap();
            });
        }
    });
    let mapping = mapper_service.mapping();
    assert_eq!(mapping.field_type("shared").unwrap().type_name(), "text");
    for thread_id in 0..num_threads {
        let field_name = format!("field_{thread_id}");
        assert_eq!(mapping.field_type(&field_name).unwrap().type_name(), "long");
    }
    // 6 fields, the text field, and its keyword sub-field.
    assert_eq!(mapping.num_fields(), num_threads + 2);
}
