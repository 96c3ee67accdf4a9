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

use crate::error::DocParsingError;
use crate::field_types::{FieldKind, IndexedField, IndexedValue};
use crate::mapping::{Mapping, NestedInclusion};
use crate::{is_metadata_field, FIELD_NAMES_FIELD_NAME, IGNORED_FIELD_NAME, NESTED_PATH_FIELD_NAME};

/// One document handed to the index: the root document, or one nested
/// object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhysicalDocument {
    /// Path of the nested mapper, `None` for the root document.
    pub nested_path: Option<String>,
    pub fields: Vec<IndexedField>,
}

impl PhysicalDocument {
    pub fn is_root(&self) -> bool {
        self.nested_path.is_none()
    }

    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IndexedField> + 'a {
        self.fields.iter().filter(move |field| field.name == name)
    }

    /// String values of the field `name`, e.g. for `_ignored`.
    pub fn str_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields_named(name).filter_map(|field| match &field.value {
            IndexedValue::Str(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Result of parsing one input document.
#[derive(Clone, Debug)]
pub struct ParsedDocument {
    /// Nested documents first, each one after all of its descendants, then the
    /// root document.
    pub docs: Vec<PhysicalDocument>,
    /// Fields introduced by dynamic mapping, to be merged into the mapping.
    pub dynamic_mapping_update: Option<Mapping>,
}

impl ParsedDocument {
    pub fn root(&self) -> Option<&PhysicalDocument> {
        self.docs.last()
    }

    pub fn num_nested_docs(&self) -> usize {
        self.docs.len().saturating_sub(1)
    }

    /// Fields whose value was dropped.
    pub fn ignored_fields(&self) -> Vec<&str> {
        self.root()
            .map(|root| root.str_values(IGNORED_FIELD_NAME).collect())
            .unwrap_or_default()
    }
}

struct OpenDocument {
    doc: PhysicalDocument,
    field_names: Vec<String>,
    inclusion: NestedInclusion,
}

impl OpenDocument {
    fn new(nested_path: Option<String>, inclusion: NestedInclusion) -> OpenDocument {
        let mut doc = PhysicalDocument {
            nested_path: None,
            fields: Vec::new(),
        };
        if let Some(nested_path) = nested_path {
            doc.fields.push(IndexedField::new(
                NESTED_PATH_FIELD_NAME,
                FieldKind::Indexed,
                IndexedValue::Str(nested_path.clone()),
            ));
            doc.nested_path = Some(nested_path);
        }
        OpenDocument {
            doc,
            field_names: Vec::new(),
            inclusion,
        }
    }

    fn into_document(mut self) -> PhysicalDocument {
        for field_name in self.field_names {
            self.doc.fields.push(IndexedField::new(
                FIELD_NAMES_FIELD_NAME,
                FieldKind::Indexed,
                IndexedValue::Str(field_name),
            ));
        }
        self.doc
    }
}

/// Accumulates the physical documents produced while walking one input
/// document.
pub(crate) struct DocumentBuilder {
    finished: Vec<PhysicalDocument>,
    // `open[0]` is the root document.
    open: Vec<OpenDocument>,
    ignored_fields: Vec<String>,
    num_nested_docs: u64,
    nested_docs_limit: u64,
}

impl DocumentBuilder {
    pub fn new(nested_docs_limit: u64) -> DocumentBuilder {
        DocumentBuilder {
            finished: Vec::new(),
            open: vec![OpenDocument::new(None, NestedInclusion::default())],
            ignored_fields: Vec::new(),
            num_nested_docs: 0,
            nested_docs_limit,
        }
    }

    fn current(&mut self) -> &mut OpenDocument {
        let last_pos = self.open.len() - 1;
        &mut self.open[last_pos]
    }

    pub fn add_fields(&mut self, fields: Vec<IndexedField>) {
        self.current().doc.fields.extend(fields);
    }

    /// Records a field without doc values in `_field_names`.
    pub fn add_field_name(&mut self, field_name: &str) {
        let current = self.current();
        if !current.field_names.iter().any(|name| name == field_name) {
            current.field_names.push(field_name.to_string());
        }
    }

    pub fn add_ignored_field(&mut self, field_name: &str) {
        if !self.ignored_fields.iter().any(|name| name == field_name) {
            self.ignored_fields.push(field_name.to_string());
        }
    }

    pub fn start_nested(
        &mut self,
        nested_path: String,
        inclusion: NestedInclusion,
    ) -> Result<(), DocParsingError> {
        self.num_nested_docs += 1;
        if self.num_nested_docs > self.nested_docs_limit {
            return Err(DocParsingError::NestedDocumentsLimitExceeded {
                limit: self.nested_docs_limit,
            });
        }
        self.open.push(OpenDocument::new(Some(nested_path), inclusion));
        Ok(())
    }

    /// Closes the current nested document and copies its fields to its parent
    /// and to the root document, as its inclusion requires.
    pub fn end_nested(&mut self) {
        if self.open.len() <= 1 {
            return;
        }
        let Some(nested) = self.open.pop() else {
            return;
        };
        let copied_fields: Vec<IndexedField> = nested
            .doc
            .fields
            .iter()
            .filter(|field| !is_metadata_field(&field.name))
            .cloned()
            .collect();
        if nested.inclusion.include_in_parent {
            self.current().doc.fields.extend(copied_fields.iter().cloned());
        }
        // The parent may be the root itself, in which case `include_in_root`
        // was already cleared.
        if nested.inclusion.include_in_root {
            self.open[0].doc.fields.extend(copied_fields);
        }
        self.finished.push(nested.into_document());
    }

    pub fn build(mut self) -> Vec<PhysicalDocument> {
        while self.open.len() > 1 {
            self.end_nested();
        }
        if let Some(mut root) = self.open.pop() {
            for field_name in self.ignored_fields {
                root.doc.fields.push(IndexedField::new(
                    IGNORED_FIELD_NAME,
                    FieldKind::Indexed,
                    IndexedValue::Str(field_name),
                ));
            }
            self.finished.push(root.into_document());
        }
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_field(name: &str, value: i64) -> IndexedField {
        IndexedField::new(name, FieldKind::Point, IndexedValue::I64(value))
    }

    #[test]
    fn test_nested_documents_come_before_their_ancestors() {
        let mut builder = DocumentBuilder::new(10);
        builder.add_fields(vec![long_field("root_field", 0)]);
        builder
            .start_nested("a".to_string(), NestedInclusion::default())
            .unwrap();
        builder
            .start_nested("a.b".to_string(), NestedInclusion::default())
            .unwrap();
        builder.end_nested();
        builder.end_nested();
        let docs = builder.build();
        let paths: Vec<Option<&str>> = docs.iter().map(|doc| doc.nested_path.as_deref()).collect();
        assert_eq!(paths, vec![Some("a.b"), Some("a"), None]);
        assert_eq!(
            docs[0].str_values(NESTED_PATH_FIELD_NAME).collect::<Vec<_>>(),
            vec!["a.b"]
        );
    }

    #[test]
    fn test_inclusion_copies_fields_without_metadata() {
        let mut builder = DocumentBuilder::new(10);
        builder
            .start_nested(
                "a".to_string(),
                NestedInclusion {
                    include_in_parent: false,
                    include_in_root: true,
                },
            )
            .unwrap();
        builder
            .start_nested(
                "a.b".to_string(),
                NestedInclusion {
                    include_in_parent: true,
                    include_in_root: false,
                },
            )
            .unwrap();
        builder.add_fields(vec![long_field("a.b.x", 1)]);
        builder.end_nested();
        builder.add_fields(vec![long_field("a.y", 2)]);
        builder.end_nested();
        let docs = builder.build();
        let root = docs.last().unwrap();
        assert_eq!(root.fields_named("a.b.x").count(), 1);
        assert_eq!(root.fields_named("a.y").count(), 1);
        assert_eq!(root.fields_named(NESTED_PATH_FIELD_NAME).count(), 0);
        assert_eq!(docs[1].fields_named("a.b.x").count(), 1);
    }

    #[test]
    fn test_nested_documents_limit() {
        let mut builder = DocumentBuilder::new(1);
        builder
            .start_nested("a".to_string(), NestedInclusion::default())
            .unwrap();
        builder.end_nested();
        let error = builder
            .start_nested("a".to_string(), NestedInclusion::default())
            .unwrap_err();
        assert!(matches!(
            error,
            DocParsingError::NestedDocumentsLimitExceeded { limit: 1 }
        ));
    }

    #[test]
    fn test_ignored_and_field_names_are_deduplicated() {
        let mut builder = DocumentBuilder::new(1);
        builder.add_ignored_field("a");
        builder.add_ignored_field("a");
        builder.add_field_name("t");
        builder.add_field_name("t");
        let docs = builder.build();
        assert_eq!(docs[0].str_values(IGNORED_FIELD_NAME).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(docs[0].fields_named(FIELD_NAMES_FIELD_NAME).count(), 1);
    }
}
