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

//! Query construction against the fields of a mapping.

use serde_json::Value as JsonValue;

use super::Mapping;
use crate::error::QueryError;
use crate::field_types::FieldType;
use crate::query::{Fuzziness, Query, RangeSpec, SearchExecutionContext};
use crate::runtime::RuntimeField;

/// A queryable field. Runtime fields shadow mapped fields of the same name.
enum QueryableField<'a> {
    Mapped(&'a FieldType),
    Runtime(&'a RuntimeField),
}

impl Mapping {
    fn queryable_field(&self, path: &str) -> Result<QueryableField<'_>, QueryError> {
        if let Some(runtime_field) = self.runtime_field(path) {
            return Ok(QueryableField::Runtime(runtime_field));
        }
        self.field_type(path)
            .map(QueryableField::Mapped)
            .ok_or_else(|| QueryError::UnknownField(path.to_string()))
    }

    fn unsupported_on_runtime(
        runtime_field: &RuntimeField,
        query_type: &'static str,
    ) -> QueryError {
        QueryError::UnsupportedQuery {
            field: runtime_field.name().to_string(),
            field_type: runtime_field.field_type().to_string(),
            query_type,
        }
    }

    pub fn term_query(
        &self,
        path: &str,
        value: &JsonValue,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => field_type.term_query(path, value, ctx),
            QueryableField::Runtime(runtime_field) => runtime_field.term_query(value, ctx),
        }
    }

    pub fn terms_query(
        &self,
        path: &str,
        values: &[JsonValue],
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => field_type.terms_query(path, values, ctx),
            QueryableField::Runtime(runtime_field) => {
                Err(Self::unsupported_on_runtime(runtime_field, "terms"))
            }
        }
    }

    pub fn range_query(
        &self,
        path: &str,
        range: &RangeSpec,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => field_type.range_query(path, range, ctx),
            QueryableField::Runtime(runtime_field) => runtime_field.range_query(range, ctx),
        }
    }

    pub fn prefix_query(
        &self,
        path: &str,
        prefix: &str,
        case_insensitive: bool,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => {
                field_type.prefix_query(path, prefix, case_insensitive, ctx)
            }
            QueryableField::Runtime(runtime_field) => {
                Err(Self::unsupported_on_runtime(runtime_field, "prefix"))
            }
        }
    }

    pub fn fuzzy_query(
        &self,
        path: &str,
        value: &str,
        fuzziness: Fuzziness,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => {
                field_type.fuzzy_query(path, value, fuzziness, 0, true, ctx)
            }
            QueryableField::Runtime(runtime_field) => {
                Err(Self::unsupported_on_runtime(runtime_field, "fuzzy"))
            }
        }
    }

    pub fn regexp_query(
        &self,
        path: &str,
        pattern: &str,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => field_type.regexp_query(path, pattern, ctx),
            QueryableField::Runtime(runtime_field) => {
                Err(Self::unsupported_on_runtime(runtime_field, "regexp"))
            }
        }
    }

    pub fn exists_query(
        &self,
        path: &str,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        match self.queryable_field(path)? {
            QueryableField::Mapped(field_type) => field_type.exists_query(path, ctx),
            QueryableField::Runtime(runtime_field) => runtime_field.exists_query(ctx),
        }
    }
}
