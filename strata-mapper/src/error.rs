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

use strata_config::{
    DEPTH_LIMIT_SETTING, NESTED_FIELDS_LIMIT_SETTING, NESTED_OBJECTS_LIMIT_SETTING,
    TOTAL_FIELDS_LIMIT_SETTING,
};
use thiserror::Error;

use crate::tokens::{TokenError, TokenLocation};

/// Error raised while parsing or merging a mapping definition.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The definition of a dynamic template is invalid.
    #[error("{0}")]
    InvalidDynamicTemplate(String),
    #[error("unknown parameter [{param}] on mapper [{field}] of type [{field_type}]")]
    UnknownParameter {
        param: String,
        field: String,
        field_type: String,
    },
    #[error("No handler for type [{field_type}] declared on field [{field}]")]
    UnknownFieldType { field: String, field_type: String },
    #[error("invalid field name [{name}]: {reason}")]
    InvalidFieldName { name: String, reason: String },
    /// A parameter has an invalid value, or parameters are inconsistent.
    #[error("failed to parse mapping for field [{field}]: {reason}")]
    InvalidParameter { field: String, reason: String },
    /// An update of the mapping conflicts with the current mapping.
    #[error("{0}")]
    MergeConflict(String),
    #[error("Limit of nested fields [{limit}] has been exceeded, see [{}]", NESTED_FIELDS_LIMIT_SETTING)]
    NestedFieldsLimitExceeded { limit: u64 },
    #[error("Limit of total fields [{limit}] has been exceeded, see [{}]", TOTAL_FIELDS_LIMIT_SETTING)]
    TotalFieldsLimitExceeded { limit: u64 },
    #[error(
        "Limit of mapping depth [{limit}] has been exceeded due to object field [{path}], see [{}]",
        DEPTH_LIMIT_SETTING
    )]
    DepthLimitExceeded { limit: u64, path: String },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MappingError {
    pub(crate) fn invalid_parameter(field: &str, reason: impl ToString) -> MappingError {
        MappingError::InvalidParameter {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error raised while parsing a document. The mapping is never modified when a
/// document fails to parse.
#[derive(Debug, Error)]
pub enum DocParsingError {
    /// The provided string is not a syntactically valid JSON object.
    #[error("the provided string is not a syntactically valid JSON object: {0}")]
    NotJsonObject(String),
    /// The underlying token stream is malformed.
    #[error(transparent)]
    Tokens(#[from] TokenError),
    #[error("field name cannot be an empty string (at {location})")]
    EmptyFieldName { location: TokenLocation },
    #[error(
        "Field [{field}] is a metadata field and cannot be added inside a document. Use the index \
         API request parameters."
    )]
    MetadataField { field: String },
    /// A value could not be turned into indexed fields.
    #[error("failed to parse field [{field}] of type [{field_type}]. {cause}")]
    FieldParsing {
        field: String,
        field_type: String,
        cause: String,
        location: TokenLocation,
    },
    #[error(
        "object mapping for [{field}] tried to parse field [{field}] as object, but found a \
         concrete value"
    )]
    ObjectExpected {
        field: String,
        location: TokenLocation,
    },
    #[error("mapping set to strict, dynamic introduction of [{field}] within [{parent}] is not allowed")]
    StrictDynamicMapping { field: String, parent: String },
    #[error(
        "The number of nested documents has exceeded the allowed limit of [{limit}]. This limit \
         can be set by changing the [{}] index level setting.",
        NESTED_OBJECTS_LIMIT_SETTING
    )]
    NestedDocumentsLimitExceeded { limit: u64 },
    /// The mapping update computed for the document could not be applied.
    #[error("failed to apply dynamic mapping update: {0}")]
    MappingUpdate(#[from] MappingError),
}

/// Error raised while building a query against a field.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum QueryError {
    #[error("field [{0}] does not exist in the mapping")]
    UnknownField(String),
    #[error("Cannot search on field [{0}] since it is not indexed.")]
    FieldNotSearchable(String),
    /// Regexp and fuzzy queries are rejected when expensive queries are disallowed.
    #[error(
        "[{query_type}] queries cannot be executed when 'search.allow_expensive_queries' is set to \
         false."
    )]
    ExpensiveQueriesDisallowed { query_type: &'static str },
    #[error(
        "[range] queries on [text] or [keyword] fields cannot be executed when \
         'search.allow_expensive_queries' is set to false."
    )]
    ExpensiveRangeQueryDisallowed,
    #[error(
        "[prefix] queries cannot be executed when 'search.allow_expensive_queries' is set to \
         false. For optimised prefix queries on text fields please enable [index_prefixes]."
    )]
    ExpensivePrefixQueryDisallowed,
    #[error(
        "queries cannot be executed against runtime fields while 'search.allow_expensive_queries' \
         is set to false."
    )]
    ExpensiveRuntimeQueryDisallowed,
    #[error("field [{field}] of type [{field_type}] does not support [{query_type}] queries")]
    UnsupportedQuery {
        field: String,
        field_type: String,
        query_type: &'static str,
    },
    #[error("failed to build query on field [{field}]: {reason}")]
    InvalidQueryValue { field: String, reason: String },
}
