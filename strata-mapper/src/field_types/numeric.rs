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

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use strata_common::true_fn;

use super::{deserialize_options, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::error::{MappingError, QueryError};
use crate::query::{Query, RangeSpec};
use crate::JsonObject;

/// Largest magnitude a half float can represent before rounding to infinity.
const HALF_FLOAT_MAX_ROUNDABLE: f64 = 65520.0;

/// 2^63, the smallest double strictly above `i64::MAX`.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// The numeric field types.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NumberType {
    Byte,
    Short,
    Integer,
    Long,
    HalfFloat,
    Float,
    Double,
}

impl NumberType {
    pub fn type_name(&self) -> &'static str {
        match self {
            NumberType::Byte => "byte",
            NumberType::Short => "short",
            NumberType::Integer => "integer",
            NumberType::Long => "long",
            NumberType::HalfFloat => "half_float",
            NumberType::Float => "float",
            NumberType::Double => "double",
        }
    }

    pub fn from_type_name(type_name: &str) -> Option<NumberType> {
        let number_type = match type_name {
            "byte" => NumberType::Byte,
            "short" => NumberType::Short,
            "integer" => NumberType::Integer,
            "long" => NumberType::Long,
            "half_float" => NumberType::HalfFloat,
            "float" => NumberType::Float,
            "double" => NumberType::Double,
            _ => return None,
        };
        Some(number_type)
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            NumberType::Byte | NumberType::Short | NumberType::Integer | NumberType::Long
        )
    }

    fn integral_bounds(&self) -> (i64, i64) {
        match self {
            NumberType::Byte => (i8::MIN as i64, i8::MAX as i64),
            NumberType::Short => (i16::MIN as i64, i16::MAX as i64),
            NumberType::Integer => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    fn out_of_range(&self, raw: &str) -> String {
        let type_desc = match self {
            NumberType::Byte => "a byte",
            NumberType::Short => "a short",
            NumberType::Integer => "an integer",
            _ => "a long",
        };
        format!("Value [{raw}] is out of range for {type_desc}")
    }

    /// Parses an integral value. Range checks apply to the value before
    /// truncation, so `127.5` is out of range for a byte.
    fn parse_integral(&self, raw: &str, coerce: bool) -> Result<i64, String> {
        let (min_value, max_value) = self.integral_bounds();
        if let Ok(int_value) = raw.parse::<i64>() {
            if int_value < min_value || int_value > max_value {
                return Err(self.out_of_range(raw));
            }
            return Ok(int_value);
        }
        let double_value = parse_double(raw)?;
        let out_of_range = if *self == NumberType::Long {
            double_value < -TWO_POW_63 || double_value > TWO_POW_63
        } else {
            double_value < min_value as f64 || double_value > max_value as f64
        };
        if out_of_range {
            return Err(self.out_of_range(raw));
        }
        if !coerce && double_value.fract() != 0.0 {
            return Err(format!("Value [{raw}] has a decimal part"));
        }
        if *self != NumberType::Long {
            return Ok(double_value.trunc() as i64);
        }
        // Doubles lose precision beyond 2^53: read the integer digits directly.
        match integer_part(raw) {
            Some(integer_digits) => integer_digits
                .parse::<i64>()
                .map_err(|_| self.out_of_range(raw)),
            None if double_value >= TWO_POW_63 => Err(self.out_of_range(raw)),
            None => Ok(double_value.trunc() as i64),
        }
    }

    fn parse_floating(&self, raw: &str) -> Result<f64, String> {
        let double_value = parse_double(raw)?;
        let (value, is_valid) = match self {
            NumberType::HalfFloat => (
                double_value,
                double_value.is_finite() && double_value.abs() < HALF_FLOAT_MAX_ROUNDABLE,
            ),
            NumberType::Float => {
                let float_value = double_value as f32;
                (float_value as f64, float_value.is_finite())
            }
            _ => (double_value, double_value.is_finite()),
        };
        if !is_valid {
            return Err(format!(
                "[{}] supports only finite values, but got [{raw}]",
                self.type_name()
            ));
        }
        Ok(value)
    }
}

fn parse_double(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| format!("For input string: \"{raw}\""))
}

/// Returns the digits before the decimal point of a plain decimal literal, or
/// `None` for exponent notation.
fn integer_part(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    if raw.contains(['e', 'E']) {
        return None;
    }
    match raw.split('.').next() {
        Some("") | Some("+") | Some("-") | None => Some("0"),
        Some(integer_digits) => Some(integer_digits),
    }
}

/// Returns the textual form of a numeric JSON input, or `None` if the value
/// is neither a number nor a string.
fn numeric_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(number) => Some(number_to_string(number)),
        JsonValue::String(text) => Some(text.trim().to_string()),
        _ => None,
    }
}

fn number_to_string(number: &Number) -> String {
    number.to_string()
}

fn has_decimal_part(raw: &str) -> bool {
    raw.parse::<i64>().is_err() && raw.parse::<f64>().map_or(false, |val| val.fract() != 0.0)
}

fn signum(raw: &str) -> f64 {
    raw.parse::<f64>().map_or(0.0, f64::signum)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default = "true_fn")]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coerce: Option<bool>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_value: Option<JsonValue>,
}

impl NumericOptions {
    const PARAMS: &'static [&'static str] = &[
        "index",
        "doc_values",
        "store",
        "coerce",
        "ignore_malformed",
        "null_value",
    ];
}

/// A `byte`, `short`, `integer`, `long`, `half_float`, `float` or `double`
/// field.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericFieldType {
    pub number_type: NumberType,
    pub options: NumericOptions,
}

impl NumericFieldType {
    pub(crate) fn parse(
        field_name: &str,
        number_type: NumberType,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<NumericFieldType, MappingError> {
        let mut options: NumericOptions = deserialize_options(
            field_name,
            number_type.type_name(),
            params,
            NumericOptions::PARAMS,
        )?;
        options.coerce.get_or_insert(ctx.settings.mapping.coerce);
        options
            .ignore_malformed
            .get_or_insert(ctx.settings.mapping.ignore_malformed);
        let numeric_type = NumericFieldType {
            number_type,
            options,
        };
        if let Some(null_value) = &numeric_type.options.null_value {
            numeric_type.parse_number(null_value).map_err(|error| {
                MappingError::invalid_parameter(
                    field_name,
                    format!("invalid [null_value]: {error}"),
                )
            })?;
        }
        Ok(numeric_type)
    }

    pub fn coerce(&self) -> bool {
        self.options.coerce.unwrap_or(true)
    }

    pub fn ignore_malformed(&self) -> bool {
        self.options.ignore_malformed.unwrap_or(false)
    }

    /// Parses a JSON number, or a string when coercion is enabled.
    pub(crate) fn parse_number(&self, value: &JsonValue) -> Result<IndexedValue, ValueError> {
        let raw = match value {
            JsonValue::Number(number) => number_to_string(number),
            JsonValue::String(text) => {
                if !self.coerce() {
                    return Err(ValueError::Malformed(format!(
                        "expected JSON number, got string \"{text}\". enable coercion to {} with \
                         the `coerce` parameter",
                        self.number_type.type_name()
                    )));
                }
                text.trim().to_string()
            }
            _ => {
                return Err(ValueError::Malformed(format!(
                    "expected JSON number, got {value}"
                )));
            }
        };
        self.parse_raw(&raw, self.coerce())
            .map_err(ValueError::Malformed)
    }

    fn parse_raw(&self, raw: &str, coerce: bool) -> Result<IndexedValue, String> {
        if self.number_type.is_integral() {
            self.number_type
                .parse_integral(raw, coerce)
                .map(IndexedValue::I64)
        } else {
            self.number_type.parse_floating(raw).map(IndexedValue::F64)
        }
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let indexed_value = self.parse_number(value)?;
        let mut field_values = FieldValues::default();
        field_values.add_point_value(
            field_name,
            indexed_value,
            self.options.index,
            self.options.doc_values,
            self.options.store,
        );
        Ok(field_values)
    }

    fn query_value(&self, field_name: &str, value: &JsonValue) -> Result<String, QueryError> {
        numeric_text(value).ok_or_else(|| QueryError::InvalidQueryValue {
            field: field_name.to_string(),
            reason: format!("expected a number, got {value}"),
        })
    }

    fn parse_query_raw(&self, field_name: &str, raw: &str) -> Result<IndexedValue, QueryError> {
        self.parse_raw(raw, true)
            .map_err(|reason| QueryError::InvalidQueryValue {
                field: field_name.to_string(),
                reason,
            })
    }

    pub(crate) fn term_query(&self, field_name: &str, value: &JsonValue) -> Result<Query, QueryError> {
        let raw = self.query_value(field_name, value)?;
        if self.number_type.is_integral() && has_decimal_part(&raw) {
            return Ok(Query::match_none(format!("Value [{raw}] has a decimal part")));
        }
        Ok(Query::Term {
            field: field_name.to_string(),
            value: self.parse_query_raw(field_name, &raw)?,
        })
    }

    pub(crate) fn terms_query(
        &self,
        field_name: &str,
        values: &[JsonValue],
    ) -> Result<Query, QueryError> {
        let mut terms = Vec::with_capacity(values.len());
        for value in values {
            let raw = self.query_value(field_name, value)?;
            if self.number_type.is_integral() && has_decimal_part(&raw) {
                continue;
            }
            terms.push(self.parse_query_raw(field_name, &raw)?);
        }
        if terms.is_empty() {
            return Ok(Query::match_none("All values have a decimal part"));
        }
        Ok(Query::Terms {
            field: field_name.to_string(),
            values: terms,
        })
    }

    /// Builds a range query. Bounds on integral types are turned into
    /// inclusive integer bounds: `gt 1.5` becomes `gte 2`, `lt -1.5` becomes
    /// `lte -2`.
    pub(crate) fn range_query(
        &self,
        field_name: &str,
        range: &RangeSpec,
    ) -> Result<Query, QueryError> {
        if !self.number_type.is_integral() {
            let lower = self.float_bound(field_name, range.lower.as_ref(), range.include_lower)?;
            let upper = self.float_bound(field_name, range.upper.as_ref(), range.include_upper)?;
            return Ok(Query::Range {
                field: field_name.to_string(),
                lower,
                upper,
            });
        }
        let (min_value, max_value) = self.number_type.integral_bounds();
        let mut lower_value = min_value;
        let mut upper_value = max_value;
        if let Some(lower) = &range.lower {
            let raw = self.query_value(field_name, lower)?;
            lower_value = self.parse_query_int(field_name, &raw)?;
            let decimal = has_decimal_part(&raw);
            if (!decimal && !range.include_lower) || (decimal && signum(&raw) > 0.0) {
                if lower_value == max_value {
                    return Ok(Query::match_none("empty range"));
                }
                lower_value += 1;
            }
        }
        if let Some(upper) = &range.upper {
            let raw = self.query_value(field_name, upper)?;
            upper_value = self.parse_query_int(field_name, &raw)?;
            let decimal = has_decimal_part(&raw);
            if (!decimal && !range.include_upper) || (decimal && signum(&raw) < 0.0) {
                if upper_value == min_value {
                    return Ok(Query::match_none("empty range"));
                }
                upper_value -= 1;
            }
        }
        if lower_value > upper_value {
            return Ok(Query::match_none("empty range"));
        }
        let to_bound = |is_set: bool, value: i64| {
            if is_set {
                Bound::Included(IndexedValue::I64(value))
            } else {
                Bound::Unbounded
            }
        };
        Ok(Query::Range {
            field: field_name.to_string(),
            lower: to_bound(range.lower.is_some(), lower_value),
            upper: to_bound(range.upper.is_some(), upper_value),
        })
    }

    fn parse_query_int(&self, field_name: &str, raw: &str) -> Result<i64, QueryError> {
        match self.parse_query_raw(field_name, raw)? {
            IndexedValue::I64(int_value) => Ok(int_value),
            other => Err(QueryError::InvalidQueryValue {
                field: field_name.to_string(),
                reason: format!("expected an integer, got {other:?}"),
            }),
        }
    }

    fn float_bound(
        &self,
        field_name: &str,
        bound: Option<&JsonValue>,
        inclusive: bool,
    ) -> Result<Bound<IndexedValue>, QueryError> {
        let Some(bound) = bound else {
            return Ok(Bound::Unbounded);
        };
        let raw = self.query_value(field_name, bound)?;
        let value = self.parse_query_raw(field_name, &raw)?;
        if inclusive {
            Ok(Bound::Included(value))
        } else {
            Ok(Bound::Excluded(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_config::IndexSettings;

    use super::*;
    use crate::field_types::{FieldKind, IndexedField};

    fn numeric_type(type_name: &str, params: JsonValue) -> NumericFieldType {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let JsonValue::Object(params) = params else {
            panic!("params must be an object");
        };
        let number_type = NumberType::from_type_name(type_name).unwrap();
        NumericFieldType::parse("field", number_type, &params, &ctx).unwrap()
    }

    fn parse(type_name: &str, value: JsonValue) -> Result<FieldValues, ValueError> {
        numeric_type(type_name, json!({})).parse_value("field", &value)
    }

    #[test]
    fn test_long_from_string_yields_point_and_doc_values() {
        let field_values = parse("long", json!("123")).unwrap();
        assert_eq!(
            field_values.fields,
            vec![
                IndexedField::new("field", FieldKind::Point, IndexedValue::I64(123)),
                IndexedField::new("field", FieldKind::DocValues, IndexedValue::I64(123)),
            ]
        );
        let stored = numeric_type("long", json!({"store": true}))
            .parse_value("field", &json!(123))
            .unwrap();
        assert_eq!(stored.fields.len(), 3);
        assert_eq!(stored.fields[2].kind, FieldKind::Stored);
    }

    #[test]
    fn test_integral_ranges() {
        let cases: [(&str, i64, i64, &str); 4] = [
            ("byte", -128, 127, "a byte"),
            ("short", -32768, 32767, "a short"),
            ("integer", -2147483648, 2147483647, "an integer"),
            ("long", i64::MIN, i64::MAX, "a long"),
        ];
        for (type_name, min_value, max_value, type_desc) in cases {
            for value in [min_value, max_value, 0] {
                assert_eq!(parse(type_name, json!(value)).unwrap().fields.len(), 2);
            }
            if type_name != "long" {
                for value in [min_value - 1, max_value + 1] {
                    let error = parse(type_name, json!(value)).unwrap_err();
                    assert_eq!(
                        error,
                        ValueError::Malformed(format!(
                            "Value [{value}] is out of range for {type_desc}"
                        ))
                    );
                }
            }
        }
        let error = parse("long", json!("9223372036854775808")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Value [9223372036854775808] is out of range for a long"
        );
        let error = parse("long", json!(18446744073709551615u64)).unwrap_err();
        assert!(error.to_string().contains("out of range for a long"));
        let error = parse("long", json!("-9223372036854775809")).unwrap_err();
        assert!(error.to_string().contains("out of range for a long"));
    }

    #[test]
    fn test_decimal_range_check_uses_original_magnitude() {
        let error = parse("byte", json!(127.5)).unwrap_err();
        assert_eq!(error.to_string(), "Value [127.5] is out of range for a byte");
        let field_values = parse("byte", json!("126.9")).unwrap();
        assert_eq!(field_values.fields[0].value, IndexedValue::I64(126));
        let field_values = parse("integer", json!(-12.7)).unwrap();
        assert_eq!(field_values.fields[0].value, IndexedValue::I64(-12));
        let field_values = parse("long", json!("9223372036854775806.5")).unwrap();
        assert_eq!(
            field_values.fields[0].value,
            IndexedValue::I64(9223372036854775806)
        );
        let field_values = parse("long", json!("1e3")).unwrap();
        assert_eq!(field_values.fields[0].value, IndexedValue::I64(1000));
    }

    #[test]
    fn test_coerce_disabled() {
        let numeric_type = numeric_type("integer", json!({"coerce": false}));
        let error = numeric_type.parse_value("field", &json!("12")).unwrap_err();
        assert!(error.to_string().starts_with("expected JSON number, got string"));
        let error = numeric_type.parse_value("field", &json!(1.5)).unwrap_err();
        assert_eq!(error.to_string(), "Value [1.5] has a decimal part");
        assert!(numeric_type.parse_value("field", &json!(12)).is_ok());
    }

    #[test]
    fn test_floating_types() {
        assert_eq!(
            parse("double", json!("1.5")).unwrap().fields[0].value,
            IndexedValue::F64(1.5)
        );
        let error = parse("float", json!("3.5e39")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "[float] supports only finite values, but got [3.5e39]"
        );
        let error = parse("half_float", json!(65520)).unwrap_err();
        assert!(error.to_string().starts_with("[half_float] supports only finite values"));
        assert!(parse("half_float", json!(65519.9)).is_ok());
        let error = parse("double", json!("NaN")).unwrap_err();
        assert!(error.to_string().starts_with("[double] supports only finite values"));
        let error = parse("double", json!("abc")).unwrap_err();
        assert_eq!(error.to_string(), "For input string: \"abc\"");
    }

    #[test]
    fn test_null_value_is_validated() {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let params = json!({"null_value": "abc"});
        let error = NumericFieldType::parse(
            "field",
            NumberType::Long,
            params.as_object().unwrap(),
            &ctx,
        )
        .unwrap_err();
        assert!(error.to_string().contains("invalid [null_value]"));
    }

    #[test]
    fn test_integral_term_and_range_queries() {
        let integer_type = numeric_type("integer", json!({}));
        assert!(matches!(
            integer_type.term_query("field", &json!(1.5)).unwrap(),
            Query::MatchNone { .. }
        ));
        assert_eq!(
            integer_type.term_query("field", &json!("7")).unwrap(),
            Query::Term {
                field: "field".to_string(),
                value: IndexedValue::I64(7)
            }
        );
        let range = RangeSpec {
            lower: Some(json!(1.5)),
            upper: Some(json!(-0.5)),
            include_lower: true,
            include_upper: true,
        };
        assert!(matches!(
            integer_type.range_query("field", &range).unwrap(),
            Query::MatchNone { .. }
        ));
        let range = RangeSpec {
            lower: Some(json!(1)),
            upper: Some(json!(10.5)),
            include_lower: false,
            include_upper: false,
        };
        assert_eq!(
            integer_type.range_query("field", &range).unwrap(),
            Query::Range {
                field: "field".to_string(),
                lower: Bound::Included(IndexedValue::I64(2)),
                upper: Bound::Included(IndexedValue::I64(10)),
            }
        );
        let range = RangeSpec {
            lower: Some(json!(i32::MAX)),
            upper: None,
            include_lower: false,
            include_upper: true,
        };
        assert!(matches!(
            integer_type.range_query("field", &range).unwrap(),
            Query::MatchNone { .. }
        ));
    }

    #[test]
    fn test_terms_query_skips_decimals() {
        let long_type = numeric_type("long", json!({}));
        assert!(matches!(
            long_type.terms_query("field", &[json!(1.5), json!("2.5")]).unwrap(),
            Query::MatchNone { .. }
        ));
        assert_eq!(
            long_type.terms_query("field", &[json!(1.5), json!(3)]).unwrap(),
            Query::Terms {
                field: "field".to_string(),
                values: vec![IndexedValue::I64(3)]
            }
        );
    }
}
