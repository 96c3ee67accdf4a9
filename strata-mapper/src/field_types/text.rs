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

use super::keyword::string_bound;
use super::{
    deserialize_options, scalar_to_string, FieldKind, FieldValues, IndexedValue,
    MappingParserContext, ValueError,
};
use crate::error::{MappingError, QueryError};
use crate::query::{Query, RangeSpec};
use crate::JsonObject;

/// Suffix of the hidden field indexing the prefixes of a text field.
pub const INDEX_PREFIX_SUFFIX: &str = "._index_prefix";

fn default_min_chars() -> usize {
    2
}

fn default_max_chars() -> usize {
    5
}

/// Bounds of the prefixes indexed by a text field.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexPrefixes {
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl IndexPrefixes {
    fn validate(&self) -> anyhow::Result<()> {
        if self.min_chars >= self.max_chars {
            anyhow::bail!(
                "min_chars [{}] must be less than max_chars [{}]",
                self.min_chars,
                self.max_chars
            );
        }
        if self.min_chars < 1 {
            anyhow::bail!("min_chars [{}] must be greater than zero", self.min_chars);
        }
        if self.max_chars >= 20 {
            anyhow::bail!("max_chars [{}] must be less than 20", self.max_chars);
        }
        Ok(())
    }

    /// Returns true if prefix queries of `prefix_len` characters can use the
    /// prefix field.
    fn accepts(&self, prefix_len: usize) -> bool {
        prefix_len + 1 >= self.min_chars && prefix_len <= self.max_chars
    }
}

/// What the inverted index records for a text field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOptions {
    Docs,
    Freqs,
    #[default]
    Positions,
    Offsets,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermVector {
    #[default]
    No,
    Yes,
    WithPositions,
    WithOffsets,
    WithPositionsOffsets,
    WithPositionsPayloads,
    WithPositionsOffsetsPayloads,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default = "true_fn")]
    pub norms: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_analyzer: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_quote_analyzer: Option<String>,
    #[serde(default)]
    pub index_options: IndexOptions,
    #[serde(default)]
    pub term_vector: TermVector,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_increment_gap: Option<u32>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_prefixes: Option<IndexPrefixes>,
    #[serde(default)]
    pub fielddata: bool,
}

impl TextOptions {
    const PARAMS: &'static [&'static str] = &[
        "index",
        "store",
        "norms",
        "analyzer",
        "search_analyzer",
        "search_quote_analyzer",
        "index_options",
        "term_vector",
        "position_increment_gap",
        "index_prefixes",
        "fielddata",
    ];
}

/// A full-text field. Analysis happens downstream: the parser hands over the
/// raw string together with the analyzer names.
#[derive(Clone, Debug, PartialEq)]
pub struct TextFieldType {
    pub options: TextOptions,
}

impl TextFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<TextFieldType, MappingError> {
        let options: TextOptions =
            deserialize_options(field_name, "text", params, TextOptions::PARAMS)?;
        validate_text_options(field_name, &options, ctx)
            .map_err(|error| MappingError::invalid_parameter(field_name, error))?;
        Ok(TextFieldType { options })
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let text = scalar_to_string(value).ok_or_else(|| {
            ValueError::Malformed(format!("expected a string, got {value}"))
        })?;
        let mut field_values = FieldValues::default();
        if self.options.index {
            field_values.push(field_name, FieldKind::Indexed, IndexedValue::Str(text.clone()));
            if self.options.index_prefixes.is_some() {
                field_values.push(
                    &format!("{field_name}{INDEX_PREFIX_SUFFIX}"),
                    FieldKind::Indexed,
                    IndexedValue::Str(text.clone()),
                );
            }
        }
        if self.options.store {
            field_values.push(field_name, FieldKind::Stored, IndexedValue::Str(text));
        }
        Ok(field_values)
    }

    /// Rewrites a prefix query against the prefix field when the prefix length
    /// is covered by `index_prefixes`.
    pub(crate) fn index_prefix_query(&self, field_name: &str, prefix: &str) -> Option<Query> {
        let index_prefixes = self.options.index_prefixes.as_ref()?;
        let prefix_len = prefix.chars().count();
        if !index_prefixes.accepts(prefix_len) {
            return None;
        }
        let prefix_field = format!("{field_name}{INDEX_PREFIX_SUFFIX}");
        if prefix_len >= index_prefixes.min_chars {
            Some(Query::Term {
                field: prefix_field,
                value: IndexedValue::Str(prefix.to_string()),
            })
        } else {
            Some(Query::Prefix {
                field: prefix_field,
                prefix: prefix.to_string(),
                case_insensitive: false,
            })
        }
    }

    pub(crate) fn range_query(&self, field_name: &str, range: &RangeSpec) -> Result<Query, QueryError> {
        Ok(Query::Range {
            field: field_name.to_string(),
            lower: string_bound(field_name, range.lower.as_ref(), range.include_lower, str::to_string)?,
            upper: string_bound(field_name, range.upper.as_ref(), range.include_upper, str::to_string)?,
        })
    }
}

fn validate_text_options(
    field_name: &str,
    options: &TextOptions,
    ctx: &MappingParserContext,
) -> anyhow::Result<()> {
    for analyzer in [
        &options.analyzer,
        &options.search_analyzer,
        &options.search_quote_analyzer,
    ]
    .into_iter()
    .flatten()
    {
        if !ctx.settings.analysis.is_analyzer_defined(analyzer) {
            anyhow::bail!("analyzer [{analyzer}] has not been configured in mappings");
        }
    }
    if options.search_analyzer.is_some() && options.analyzer.is_none() {
        anyhow::bail!("analyzer on field [{field_name}] must be set when search_analyzer is set");
    }
    if options.search_quote_analyzer.is_some() && options.search_analyzer.is_none() {
        anyhow::bail!(
            "analyzer and search_analyzer on field [{field_name}] must be set when \
             search_quote_analyzer is set"
        );
    }
    if options.position_increment_gap.is_some() && options.index_options < IndexOptions::Positions
    {
        anyhow::bail!(
            "Cannot set position_increment_gap on field [{field_name}] without positions enabled"
        );
    }
    if let Some(index_prefixes) = &options.index_prefixes {
        index_prefixes.validate()?;
        if !options.index {
            anyhow::bail!("Cannot set index_prefixes on unindexed field [{field_name}]");
        }
    }
    if options.fielddata && !options.index {
        anyhow::bail!(
            "Cannot enable fielddata on a [text] field that is not indexed: [{field_name}]"
        );
    }
    Ok(())
}
