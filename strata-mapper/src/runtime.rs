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

//! Runtime fields: fields computed from the document source at query time.

use std::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::date_time::{parse_date_time, DateTimeFormat, DEFAULT_DATE_FORMAT};
use crate::error::{MappingError, QueryError};
use crate::field_types::{scalar_to_string, IndexedValue};
use crate::query::{Query, RangeSpec, SearchExecutionContext};
use crate::JsonObject;

/// Maximum number of values a runtime field may emit for one document.
pub const MAX_RUNTIME_FIELD_VALUES: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RuntimeFieldType {
    Keyword,
    Long,
    Double,
    Boolean,
    Date,
}

impl RuntimeFieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeFieldType::Keyword => "keyword",
            RuntimeFieldType::Long => "long",
            RuntimeFieldType::Double => "double",
            RuntimeFieldType::Boolean => "boolean",
            RuntimeFieldType::Date => "date",
        }
    }

    pub fn from_type_name(type_name: &str) -> Option<RuntimeFieldType> {
        let runtime_type = match type_name {
            "keyword" => RuntimeFieldType::Keyword,
            "long" => RuntimeFieldType::Long,
            "double" => RuntimeFieldType::Double,
            "boolean" => RuntimeFieldType::Boolean,
            "date" => RuntimeFieldType::Date,
            _ => return None,
        };
        Some(runtime_type)
    }
}

impl fmt::Display for RuntimeFieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptError {
    #[error(
        "Runtime field [{field}] is emitting [{count}] values while the maximum number of values \
         allowed is [{limit}]"
    )]
    TooManyValues {
        field: String,
        count: usize,
        limit: usize,
    },
    #[error("runtime field [{field}] emitted an invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("failed to execute the script of runtime field [{field}]: {reason}")]
    Execution { field: String, reason: String },
}

/// Collects the values emitted by a script, up to [`MAX_RUNTIME_FIELD_VALUES`].
#[derive(Debug)]
pub struct ValueEmitter {
    field_name: String,
    values: Vec<JsonValue>,
}

impl ValueEmitter {
    pub fn new(field_name: impl Into<String>) -> ValueEmitter {
        ValueEmitter {
            field_name: field_name.into(),
            values: Vec::new(),
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn emit(&mut self, value: JsonValue) -> Result<(), ScriptError> {
        if self.values.len() >= MAX_RUNTIME_FIELD_VALUES {
            return Err(ScriptError::TooManyValues {
                field: self.field_name.clone(),
                count: self.values.len() + 1,
                limit: MAX_RUNTIME_FIELD_VALUES,
            });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<JsonValue> {
        self.values
    }
}

/// A compiled script computing the values of a runtime field.
pub trait FieldScript: Send + Sync {
    fn execute(&self, source: &JsonObject, emitter: &mut ValueEmitter) -> Result<(), ScriptError>;
}

/// Emits the values found in the source at a dotted path. Used by runtime
/// fields without a script.
struct SourcePathScript<'a> {
    path: &'a str,
}

fn emit_source_values(
    value: &JsonValue,
    path: &[&str],
    emitter: &mut ValueEmitter,
) -> Result<(), ScriptError> {
    match value {
        JsonValue::Array(values) => {
            for value in values {
                emit_source_values(value, path, emitter)?;
            }
            Ok(())
        }
        JsonValue::Object(json_obj) => emit_object_values(json_obj, path, emitter),
        JsonValue::Null => Ok(()),
        scalar if path.is_empty() => emitter.emit(scalar.clone()),
        _ => Ok(()),
    }
}

fn emit_object_values(
    json_obj: &JsonObject,
    path: &[&str],
    emitter: &mut ValueEmitter,
) -> Result<(), ScriptError> {
    // Keys may hold dots: `a.b` matches the segments `a`, `b`.
    for segment_count in 1..=path.len() {
        let key = path[..segment_count].join(".");
        if let Some(value) = json_obj.get(&key) {
            emit_source_values(value, &path[segment_count..], emitter)?;
        }
    }
    Ok(())
}

impl FieldScript for SourcePathScript<'_> {
    fn execute(&self, source: &JsonObject, emitter: &mut ValueEmitter) -> Result<(), ScriptError> {
        let path: Vec<&str> = self.path.split('.').collect();
        emit_object_values(source, &path, emitter)
    }
}

/// A field declared in the `runtime` section of a mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeField {
    name: String,
    field_type: RuntimeFieldType,
    script: Option<JsonValue>,
    format: Option<String>,
    date_formats: Vec<DateTimeFormat>,
}

impl RuntimeField {
    pub(crate) fn parse(name: &str, definition: &JsonValue) -> Result<RuntimeField, MappingError> {
        let JsonValue::Object(json_obj) = definition else {
            return Err(MappingError::invalid_parameter(
                name,
                format!("runtime field definition must be an object, got [{definition}]"),
            ));
        };
        let type_name = match json_obj.get("type") {
            Some(JsonValue::String(type_name)) => type_name.as_str(),
            Some(other) => {
                return Err(MappingError::invalid_parameter(
                    name,
                    format!("[type] must be a string, got [{other}]"),
                ));
            }
            None => {
                return Err(MappingError::invalid_parameter(
                    name,
                    format!("No type specified for runtime field [{name}]"),
                ));
            }
        };
        let field_type = RuntimeFieldType::from_type_name(type_name).ok_or_else(|| {
            MappingError::UnknownFieldType {
                field: name.to_string(),
                field_type: type_name.to_string(),
            }
        })?;
        let mut script = None;
        let mut format = None;
        for (param, value) in json_obj {
            match (param.as_str(), value) {
                ("type", _) => {}
                ("script", _) => script = Some(value.clone()),
                ("format", JsonValue::String(format_str))
                    if field_type == RuntimeFieldType::Date =>
                {
                    format = Some(format_str.clone());
                }
                _ => {
                    return Err(MappingError::UnknownParameter {
                        param: param.clone(),
                        field: name.to_string(),
                        field_type: type_name.to_string(),
                    });
                }
            }
        }
        let date_formats =
            DateTimeFormat::parse_formats(format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT))
                .map_err(|error| MappingError::invalid_parameter(name, error))?;
        Ok(RuntimeField {
            name: name.to_string(),
            field_type,
            script,
            format,
            date_formats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> RuntimeFieldType {
        self.field_type
    }

    pub fn script(&self) -> Option<&JsonValue> {
        self.script.as_ref()
    }

    pub fn to_json(&self) -> JsonValue {
        let mut json_obj = JsonObject::new();
        json_obj.insert(
            "type".to_string(),
            JsonValue::String(self.field_type.as_str().to_string()),
        );
        if let Some(script) = &self.script {
            json_obj.insert("script".to_string(), script.clone());
        }
        if let Some(format) = &self.format {
            json_obj.insert("format".to_string(), JsonValue::String(format.clone()));
        }
        JsonValue::Object(json_obj)
    }

    /// Computes the values of the field for one document. Without `script`,
    /// values are read from the source at the field path.
    pub fn compute_values(
        &self,
        source: &JsonObject,
        script: Option<&dyn FieldScript>,
    ) -> Result<Vec<IndexedValue>, ScriptError> {
        let mut emitter = ValueEmitter::new(&self.name);
        match script {
            Some(script) => script.execute(source, &mut emitter)?,
            None => SourcePathScript { path: &self.name }.execute(source, &mut emitter)?,
        }
        emitter
            .into_values()
            .iter()
            .map(|value| {
                self.convert(value)
                    .map_err(|reason| ScriptError::InvalidValue {
                        field: self.name.clone(),
                        reason,
                    })
            })
            .collect()
    }

    fn convert(&self, value: &JsonValue) -> Result<IndexedValue, String> {
        match self.field_type {
            RuntimeFieldType::Keyword => scalar_to_string(value)
                .map(IndexedValue::Str)
                .ok_or_else(|| format!("expected a string, got [{value}]")),
            RuntimeFieldType::Long => match value {
                JsonValue::Number(number) => number.as_i64(),
                JsonValue::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            }
            .map(IndexedValue::I64)
            .ok_or_else(|| format!("expected a long, got [{value}]")),
            RuntimeFieldType::Double => match value {
                JsonValue::Number(number) => number.as_f64(),
                JsonValue::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            }
            .map(IndexedValue::F64)
            .ok_or_else(|| format!("expected a double, got [{value}]")),
            RuntimeFieldType::Boolean => match value {
                JsonValue::Bool(bool_value) => Some(*bool_value),
                JsonValue::String(text) => text.parse::<bool>().ok(),
                _ => None,
            }
            .map(IndexedValue::Bool)
            .ok_or_else(|| format!("expected a boolean, got [{value}]")),
            RuntimeFieldType::Date => {
                let date_formats = self.effective_date_formats()?;
                let date_str = scalar_to_string(value)
                    .ok_or_else(|| format!("expected a date, got [{value}]"))?;
                parse_date_time(&date_str, &date_formats).map(IndexedValue::Date)
            }
        }
    }

    fn effective_date_formats(&self) -> Result<Vec<DateTimeFormat>, String> {
        if self.date_formats.is_empty() {
            return DateTimeFormat::parse_formats(DEFAULT_DATE_FORMAT);
        }
        Ok(self.date_formats.clone())
    }

    fn check_expensive_allowed(&self, ctx: &SearchExecutionContext) -> Result<(), QueryError> {
        if !ctx.allow_expensive_queries {
            return Err(QueryError::ExpensiveRuntimeQueryDisallowed);
        }
        Ok(())
    }

    fn query_value(&self, value: &JsonValue) -> Result<IndexedValue, QueryError> {
        self.convert(value)
            .map_err(|reason| QueryError::InvalidQueryValue {
                field: self.name.clone(),
                reason,
            })
    }

    /// Queries on runtime fields evaluate the script on every document, and
    /// are therefore expensive.
    pub fn term_query(
        &self,
        value: &JsonValue,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        self.check_expensive_allowed(ctx)?;
        Ok(self.wrap(Query::Term {
            field: self.name.clone(),
            value: self.query_value(value)?,
        }))
    }

    pub fn range_query(
        &self,
        range: &RangeSpec,
        ctx: &SearchExecutionContext,
    ) -> Result<Query, QueryError> {
        use std::ops::Bound;

        self.check_expensive_allowed(ctx)?;
        let to_bound = |bound: Option<&JsonValue>,
                        inclusive: bool|
         -> Result<Bound<IndexedValue>, QueryError> {
            match bound {
                None => Ok(Bound::Unbounded),
                Some(bound) if inclusive => Ok(Bound::Included(self.query_value(bound)?)),
                Some(bound) => Ok(Bound::Excluded(self.query_value(bound)?)),
            }
        };
        Ok(self.wrap(Query::Range {
            field: self.name.clone(),
            lower: to_bound(range.lower.as_ref(), range.include_lower)?,
            upper: to_bound(range.upper.as_ref(), range.include_upper)?,
        }))
    }

    pub fn exists_query(&self, ctx: &SearchExecutionContext) -> Result<Query, QueryError> {
        self.check_expensive_allowed(ctx)?;
        Ok(self.wrap(Query::DocValuesExists {
            field: self.name.clone(),
        }))
    }

    fn wrap(&self, query: Query) -> Query {
        Query::Runtime {
            field: self.name.clone(),
            query: Box::new(query),
        }
    }
}
