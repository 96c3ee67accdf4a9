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

use std::ops::Bound;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use strata_config::SearchSettings;

use crate::field_types::IndexedValue;

/// Query-time settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SearchExecutionContext {
    /// When false, regexp, fuzzy, range-over-terms and unoptimized prefix
    /// queries are rejected.
    pub allow_expensive_queries: bool,
}

impl Default for SearchExecutionContext {
    fn default() -> Self {
        SearchExecutionContext {
            allow_expensive_queries: true,
        }
    }
}

impl From<&SearchSettings> for SearchExecutionContext {
    fn from(search_settings: &SearchSettings) -> Self {
        SearchExecutionContext {
            allow_expensive_queries: search_settings.allow_expensive_queries,
        }
    }
}

/// Maximum number of edits of a fuzzy query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fuzziness {
    /// 0 edits up to 2 characters, 1 up to 5 characters, 2 beyond.
    Auto,
    Fixed(u8),
}

impl Fuzziness {
    pub fn max_edits(&self, term_len: usize) -> u8 {
        match self {
            Fuzziness::Auto if term_len < 3 => 0,
            Fuzziness::Auto if term_len < 6 => 1,
            Fuzziness::Auto => 2,
            Fuzziness::Fixed(edits) => *edits,
        }
    }
}

impl FromStr for Fuzziness {
    type Err = String;

    fn from_str(fuzziness_str: &str) -> Result<Self, Self::Err> {
        if fuzziness_str.eq_ignore_ascii_case("auto") {
            return Ok(Fuzziness::Auto);
        }
        match fuzziness_str.parse::<u8>() {
            Ok(edits) if edits <= 2 => Ok(Fuzziness::Fixed(edits)),
            _ => Err(format!(
                "invalid fuzziness [{fuzziness_str}], expected [AUTO], [0], [1] or [2]"
            )),
        }
    }
}

/// Bounds of a range query, as provided by the user.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RangeSpec {
    pub lower: Option<JsonValue>,
    pub upper: Option<JsonValue>,
    pub include_lower: bool,
    pub include_upper: bool,
}

impl RangeSpec {
    /// Inclusive range.
    pub fn between(lower: JsonValue, upper: JsonValue) -> RangeSpec {
        RangeSpec {
            lower: Some(lower),
            upper: Some(upper),
            include_lower: true,
            include_upper: true,
        }
    }
}

/// A query over indexed fields, handed to the search engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    Term {
        field: String,
        value: IndexedValue,
    },
    Terms {
        field: String,
        values: Vec<IndexedValue>,
    },
    Range {
        field: String,
        lower: Bound<IndexedValue>,
        upper: Bound<IndexedValue>,
    },
    Prefix {
        field: String,
        prefix: String,
        case_insensitive: bool,
    },
    Fuzzy {
        field: String,
        value: String,
        max_edits: u8,
        prefix_length: usize,
        transpositions: bool,
    },
    Regexp {
        field: String,
        pattern: String,
    },
    DocValuesExists {
        field: String,
    },
    /// Evaluated against the values a runtime field computes for each document.
    Runtime {
        field: String,
        query: Box<Query>,
    },
    MatchNone {
        reason: String,
    },
}

impl Query {
    pub(crate) fn match_none(reason: impl Into<String>) -> Query {
        Query::MatchNone {
            reason: reason.into(),
        }
    }
}
