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

//! Holds the current mapping of an index and applies mapping updates.
//!
//! Readers get an immutable [`MappingSnapshot`]. Writers merge their update
//! into the snapshot they started from and publish the result with a
//! compare-and-swap: a writer that lost the race starts over from the latest
//! snapshot, so concurrent dynamic updates never overwrite each other.

use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use strata_common::get_from_env;
use strata_config::IndexSettings;
use tracing::{info, warn};

use crate::error::{DocParsingError, MappingError};
use crate::mapping::Mapping;
use crate::parser::{DocumentParser, ParsedDocument};

static MAX_DYNAMIC_UPDATE_ATTEMPTS: Lazy<usize> =
    Lazy::new(|| get_from_env("STRATA_MAX_DYNAMIC_UPDATE_ATTEMPTS", 8));

/// A published version of the mapping.
#[derive(Clone, Debug)]
pub struct MappingSnapshot {
    /// Incremented on every published change.
    pub version: u64,
    pub mapping: Arc<Mapping>,
}

pub struct MapperService {
    settings: IndexSettings,
    current: ArcSwap<MappingSnapshot>,
}

impl MapperService {
    /// Creates a service with an empty mapping.
    pub fn new(settings: IndexSettings) -> MapperService {
        MapperService::from_mapping(Mapping::default(), settings)
    }

    /// Creates a service from a mapping definition. The definition goes
    /// through the same validation as an update to an empty mapping.
    pub fn with_mapping(
        mapping_json: &JsonValue,
        settings: IndexSettings,
    ) -> Result<MapperService, MappingError> {
        let mapping = Mapping::parse(mapping_json, &settings)?;
        let mapping = Mapping::default().merge(&mapping, &settings)?;
        Ok(MapperService::from_mapping(mapping, settings))
    }

    fn from_mapping(mapping: Mapping, settings: IndexSettings) -> MapperService {
        let snapshot = MappingSnapshot {
            version: 0,
            mapping: Arc::new(mapping),
        };
        MapperService {
            settings,
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.current.load_full()
    }

    pub fn mapping(&self) -> Arc<Mapping> {
        self.current.load().mapping.clone()
    }

    /// Merges the mapping definition `mapping_json` into the current mapping.
    pub fn merge(&self, mapping_json: &JsonValue) -> Result<Arc<MappingSnapshot>, MappingError> {
        let update = Mapping::parse(mapping_json, &self.settings)?;
        self.merge_mapping(&update)
    }

    pub fn merge_mapping(&self, update: &Mapping) -> Result<Arc<MappingSnapshot>, MappingError> {
        loop {
            let current = self.snapshot();
            if let Some(published) = self.try_publish(&current, update)? {
                return Ok(published);
            }
        }
    }

    pub fn parse_document(&self, doc_json: &str) -> Result<ParsedDocument, DocParsingError> {
        let doc: JsonValue = serde_json::from_str(doc_json)
            .map_err(|error| DocParsingError::NotJsonObject(error.to_string()))?;
        self.parse_document_value(&doc)
    }

    /// Parses `doc` against the current mapping and publishes the fields it
    /// introduces. If another update is published in the meantime, the
    /// document is parsed again against the new mapping.
    pub fn parse_document_value(&self, doc: &JsonValue) -> Result<ParsedDocument, DocParsingError> {
        let max_attempts = *MAX_DYNAMIC_UPDATE_ATTEMPTS;
        for attempt in 1..=max_attempts {
            let snapshot = self.snapshot();
            let parsed_doc =
                DocumentParser::new(&snapshot.mapping, &self.settings).parse_json_value(doc.clone())?;
            let Some(update) = &parsed_doc.dynamic_mapping_update else {
                return Ok(parsed_doc);
            };
            if self.try_publish(&snapshot, update)?.is_some() {
                return Ok(parsed_doc);
            }
            warn!(
                attempt,
                version = snapshot.version,
                "mapping changed while parsing document, parsing again"
            );
        }
        Err(DocParsingError::MappingUpdate(MappingError::Other(anyhow!(
            "failed to publish the dynamic mapping update after {max_attempts} attempts"
        ))))
    }

    /// Merges `update` into `current` and publishes the result, unless
    /// `current` is no longer the latest snapshot, in which case `None` is
    /// returned.
    fn try_publish(
        &self,
        current: &Arc<MappingSnapshot>,
        update: &Mapping,
    ) -> Result<Option<Arc<MappingSnapshot>>, MappingError> {
        let merged = current.mapping.merge(update, &self.settings)?;
        // Snapshots only grow: nothing to publish if `current` already holds
        // the update.
        if merged == *current.mapping {
            return Ok(Some(current.clone()));
        }
        let new_snapshot = Arc::new(MappingSnapshot {
            version: current.version + 1,
            mapping: Arc::new(merged),
        });
        let previous = self.current.compare_and_swap(current, new_snapshot.clone());
        if !Arc::ptr_eq(&*previous, current) {
            return Ok(None);
        }
        info!(
            version = new_snapshot.version,
            num_fields = new_snapshot.mapping.num_fields(),
            "published mapping update"
        );
        Ok(Some(new_snapshot))
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_with_mapping_validates_limits() {
        let mut settings = IndexSettings::default();
        settings.mapping.total_fields_limit = 1;
        let error = MapperService::with_mapping(
            &json!({"properties": {"a": {"type": "long"}, "b": {"type": "long"}}}),
            settings,
        )
        .err()
        .unwrap();
        assert_matches!(error, MappingError::TotalFieldsLimitExceeded { .. });
    }

    #[test]
    fn test_merge_bumps_version() {
        let mapper_service = MapperService::new(IndexSettings::default());
        assert_eq!(mapper_service.snapshot().version, 0);
        let snapshot = mapper_service
            .merge(&json!({"properties": {"a": {"type": "keyword"}}}))
            .unwrap();
        assert_eq!(snapshot.version, 1);
        // Merging the same definition again is a no-op.
        let snapshot = mapper_service
            .merge(&json!({"properties": {"a": {"type": "keyword"}}}))
            .unwrap();
        assert_eq!(snapshot.version, 1);
        let error = mapper_service
            .merge(&json!({"properties": {"a": {"type": "long"}}}))
            .unwrap_err();
        assert_matches!(error, MappingError::MergeConflict(_));
        assert_eq!(mapper_service.snapshot().version, 1);
    }

    #[test]
    fn test_parse_document_publishes_dynamic_update() {
        let mapper_service = MapperService::new(IndexSettings::default());
        let parsed_doc = mapper_service
            .parse_document(r#"{"title": "hello", "views": 3}"#)
            .unwrap();
        assert!(parsed_doc.dynamic_mapping_update.is_some());
        let mapping = mapper_service.mapping();
        assert_eq!(mapping.field_type("title").unwrap().type_name(), "text");
        assert_eq!(mapping.field_type("views").unwrap().type_name(), "long");
        assert_eq!(mapper_service.snapshot().version, 1);

        let parsed_doc = mapper_service
            .parse_document(r#"{"title": "again", "views": 4}"#)
            .unwrap();
        assert!(parsed_doc.dynamic_mapping_update.is_none());
        assert_eq!(mapper_service.snapshot().version, 1);
    }

    #[test]
    fn test_stale_snapshot_is_not_published() {
        let mapper_service = MapperService::new(IndexSettings::default());
        let stale = mapper_service.snapshot();
        mapper_service
            .merge(&json!({"properties": {"a": {"type": "long"}}}))
            .unwrap();
        let update = Mapping::parse(
            &json!({"properties": {"b": {"type": "long"}}}),
            mapper_service.settings(),
        )
        .unwrap();
        assert!(mapper_service
            .try_publish(&stale, &update)
            .unwrap()
            .is_none());
        let mapping = mapper_service.mapping();
        assert!(mapping.field_type("a").is_some());
        assert!(mapping.field_type("b").is_none());
    }

    #[test]
    fn test_concurrent_dynamic_updates_are_all_kept() {
        strata_common::setup_logging_for_tests();
        let mapper_service = MapperService::new(IndexSettings::default());
        std::thread::scope(|scope| {
            for thread_id in 0..4 {
                let mapper_service = &mapper_service;
                scope.spawn(move || {
                    let field_name = format!("field_{thread_id}");
                    let doc = json!({ field_name: thread_id });
                    mapper_service.parse_document_value(&doc).unwrap();
                });
            }
        });
        let mapping = mapper_service.mapping();
        for thread_id in 0..4 {
            let field_name = format!("field_{thread_id}");
            assert_eq!(mapping.field_type(&field_name).unwrap().type_name(), "long");
        }
        assert_eq!(mapper_service.snapshot().version, 4);
    }
}
