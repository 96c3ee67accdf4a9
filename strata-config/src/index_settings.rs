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

use std::collections::BTreeSet;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strata_common::true_fn;

use crate::ConfigFormat;

pub const NESTED_FIELDS_LIMIT_SETTING: &str = "index.mapping.nested_fields.limit";
pub const NESTED_OBJECTS_LIMIT_SETTING: &str = "index.mapping.nested_objects.limit";
pub const TOTAL_FIELDS_LIMIT_SETTING: &str = "index.mapping.total_fields.limit";
pub const DEPTH_LIMIT_SETTING: &str = "index.mapping.depth.limit";
pub const ALLOW_EXPENSIVE_QUERIES_SETTING: &str = "search.allow_expensive_queries";

/// Analyzers that can be referenced without being declared in the settings.
pub const BUILTIN_ANALYZERS: &[&str] = &[
    "standard",
    "simple",
    "whitespace",
    "stop",
    "keyword",
    "pattern",
    "fingerprint",
    "english",
];

fn default_nested_fields_limit() -> u64 {
    50
}

fn default_nested_objects_limit() -> u64 {
    10_000
}

fn default_total_fields_limit() -> u64 {
    1_000
}

fn default_depth_limit() -> u64 {
    20
}

/// Limits and defaults applied while parsing mappings and documents.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MappingSettings {
    /// Maximum number of `nested` fields in the whole mapping. 0 disables nesting.
    #[serde(default = "default_nested_fields_limit")]
    pub nested_fields_limit: u64,
    /// Maximum number of nested documents produced by one input document.
    #[serde(default = "default_nested_objects_limit")]
    pub nested_objects_limit: u64,
    #[serde(default = "default_total_fields_limit")]
    pub total_fields_limit: u64,
    /// Maximum object depth, the root object being at depth 1.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u64,
    /// Default value of the `coerce` parameter of numeric fields.
    #[serde(default = "true_fn")]
    pub coerce: bool,
    /// Default value of the `ignore_malformed` parameter.
    #[serde(default)]
    pub ignore_malformed: bool,
}

impl Default for MappingSettings {
    fn default() -> Self {
        MappingSettings {
            nested_fields_limit: default_nested_fields_limit(),
            nested_objects_limit: default_nested_objects_limit(),
            total_fields_limit: default_total_fields_limit(),
            depth_limit: default_depth_limit(),
            coerce: true,
            ignore_malformed: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default = "true_fn")]
    pub allow_expensive_queries: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            allow_expensive_queries: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AnalysisSettings {
    /// Names of the custom analyzers declared for the index.
    #[serde(default)]
    pub analyzers: BTreeSet<String>,
}

impl AnalysisSettings {
    pub fn is_analyzer_defined(&self, analyzer_name: &str) -> bool {
        BUILTIN_ANALYZERS.contains(&analyzer_name) || self.analyzers.contains(analyzer_name)
    }
}

/// Index-level settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IndexSettings {
    #[serde(default)]
    pub mapping: MappingSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

#[derive(Deserialize)]
#[serde(tag = "version")]
enum VersionedIndexSettings {
    #[serde(rename = "0.1")]
    V0_1(IndexSettings),
}

impl From<VersionedIndexSettings> for IndexSettings {
    fn from(versioned_index_settings: VersionedIndexSettings) -> Self {
        match versioned_index_settings {
            VersionedIndexSettings::V0_1(index_settings) => index_settings,
        }
    }
}

impl IndexSettings {
    /// Parses and validates versioned settings.
    pub fn load(config_format: ConfigFormat, payload: &[u8]) -> anyhow::Result<IndexSettings> {
        let versioned_index_settings: VersionedIndexSettings = config_format.parse(payload)?;
        let index_settings: IndexSettings = versioned_index_settings.into();
        index_settings.validate()?;
        Ok(index_settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mapping.total_fields_limit == 0 {
            bail!("`{TOTAL_FIELDS_LIMIT_SETTING}` must be strictly positive");
        }
        if self.mapping.depth_limit == 0 {
            bail!("`{DEPTH_LIMIT_SETTING}` must be strictly positive");
        }
        for analyzer_name in &self.analysis.analyzers {
            if analyzer_name.is_empty() {
                bail!("analyzer names must not be empty");
            }
        }
        Ok(())
    }
}
