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

//! Date formats accepted by `date` fields and by date detection.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::{Iso8601, Rfc2822, Rfc3339};
use time::OffsetDateTime;

/// Default value of the `format` parameter of `date` fields.
pub(crate) const DEFAULT_DATE_FORMAT: &str = "strict_date_optional_time||epoch_millis";

/// Default value of `dynamic_date_formats`.
pub(crate) const DEFAULT_DYNAMIC_DATE_FORMATS: [&str; 2] = [
    "strict_date_optional_time",
    "yyyy/MM/dd HH:mm:ss||yyyy/MM/dd",
];

/// A single date format.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DateTimeFormat {
    /// `yyyy-MM-dd`, optionally followed by a time and an offset.
    StrictDateOptionalTime,
    EpochMillis,
    EpochSecond,
    Iso8601,
    Rfc2822,
    Rfc3339,
    /// A `yyyy-MM-dd HH:mm:ss` style pattern, kept with its strftime translation.
    Pattern {
        pattern: String,
        strftime_format: String,
        with_time: bool,
        with_timezone: bool,
    },
}

impl DateTimeFormat {
    pub fn as_str(&self) -> &str {
        match self {
            DateTimeFormat::StrictDateOptionalTime => "strict_date_optional_time",
            DateTimeFormat::EpochMillis => "epoch_millis",
            DateTimeFormat::EpochSecond => "epoch_second",
            DateTimeFormat::Iso8601 => "iso8601",
            DateTimeFormat::Rfc2822 => "rfc2822",
            DateTimeFormat::Rfc3339 => "rfc3339",
            DateTimeFormat::Pattern { pattern, .. } => pattern,
        }
    }

    /// Parses a `||` separated list of formats.
    pub fn parse_formats(formats_str: &str) -> Result<Vec<DateTimeFormat>, String> {
        let formats: Vec<DateTimeFormat> = formats_str
            .split("||")
            .map(DateTimeFormat::from_str)
            .collect::<Result<_, _>>()?;
        if formats.is_empty() {
            return Err("date format must not be empty".to_string());
        }
        Ok(formats)
    }

    /// Parses `date_time_str` into milliseconds since the epoch, UTC.
    pub fn parse_millis(&self, date_time_str: &str) -> Option<i64> {
        match self {
            DateTimeFormat::StrictDateOptionalTime => parse_strict_date_optional_time(date_time_str),
            DateTimeFormat::EpochMillis => parse_epoch(date_time_str, 1.0),
            DateTimeFormat::EpochSecond => parse_epoch(date_time_str, 1_000.0),
            DateTimeFormat::Iso8601 => OffsetDateTime::parse(date_time_str, &Iso8601::DEFAULT)
                .ok()
                .map(offset_date_time_to_millis),
            DateTimeFormat::Rfc2822 => OffsetDateTime::parse(date_time_str, &Rfc2822)
                .ok()
                .map(offset_date_time_to_millis),
            DateTimeFormat::Rfc3339 => OffsetDateTime::parse(date_time_str, &Rfc3339)
                .ok()
                .map(offset_date_time_to_millis),
            DateTimeFormat::Pattern {
                strftime_format,
                with_time,
                with_timezone,
                ..
            } => parse_strftime(date_time_str, strftime_format, *with_time, *with_timezone),
        }
    }
}

impl Display for DateTimeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateTimeFormat {
    type Err = String;

    fn from_str(format_str: &str) -> Result<Self, Self::Err> {
        let date_time_format = match format_str.trim() {
            "strict_date_optional_time" | "date_optional_time" => {
                DateTimeFormat::StrictDateOptionalTime
            }
            "epoch_millis" => DateTimeFormat::EpochMillis,
            "epoch_second" => DateTimeFormat::EpochSecond,
            "iso8601" => DateTimeFormat::Iso8601,
            "rfc2822" => DateTimeFormat::Rfc2822,
            "rfc3339" => DateTimeFormat::Rfc3339,
            "" => return Err("date format must not be empty".to_string()),
            pattern => {
                let (strftime_format, with_time, with_timezone) = pattern_to_strftime(pattern)
                    .map_err(|reason| format!("invalid date format [{pattern}]: {reason}"))?;
                DateTimeFormat::Pattern {
                    pattern: pattern.to_string(),
                    strftime_format,
                    with_time,
                    with_timezone,
                }
            }
        };
        Ok(date_time_format)
    }
}

impl Serialize for DateTimeFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: serde::Serializer {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DateTimeFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let format_str = String::deserialize(deserializer)?;
        DateTimeFormat::from_str(&format_str).map_err(serde::de::Error::custom)
    }
}

/// Parses `date_time_str` with the first matching format.
pub(crate) fn parse_date_time(
    date_time_str: &str,
    date_time_formats: &[DateTimeFormat],
) -> Result<i64, String> {
    date_time_formats
        .iter()
        .find_map(|date_time_format| date_time_format.parse_millis(date_time_str))
        .ok_or_else(|| {
            format!(
                "failed to parse date field [{date_time_str}] with format [{}]",
                date_time_formats.iter().map(DateTimeFormat::as_str).join("||")
            )
        })
}

fn offset_date_time_to_millis(date_time: OffsetDateTime) -> i64 {
    (date_time.unix_timestamp_nanos() / 1_000_000) as i64
}

fn naive_to_millis(date_time: NaiveDateTime) -> i64 {
    date_time.and_utc().timestamp_millis()
}

fn naive_date_to_millis(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0).map(naive_to_millis)
}

fn parse_epoch(date_time_str: &str, millis_per_unit: f64) -> Option<i64> {
    if let Ok(timestamp) = date_time_str.parse::<i64>() {
        return timestamp.checked_mul(millis_per_unit as i64);
    }
    let timestamp = date_time_str.parse::<f64>().ok()?;
    if !timestamp.is_finite() {
        return None;
    }
    let millis = timestamp * millis_per_unit;
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(millis.trunc() as i64)
}

fn parse_strict_date_optional_time(date_time_str: &str) -> Option<i64> {
    let bytes = date_time_str.as_bytes();
    if bytes.len() < 10
        || bytes[4] != b'-'
        || bytes[7] != b'-'
        || !bytes[..4].iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    if bytes.len() == 10 {
        return NaiveDate::parse_from_str(date_time_str, "%Y-%m-%d")
            .ok()
            .and_then(naive_date_to_millis);
    }
    if let Ok(date_time) = OffsetDateTime::parse(date_time_str, &Rfc3339) {
        return Some(offset_date_time_to_millis(date_time));
    }
    for format in ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M:%S%.f%:z"] {
        if let Ok(date_time) = DateTime::parse_from_str(date_time_str, format) {
            return Some(date_time.timestamp_millis());
        }
    }
    let naive_str = date_time_str.strip_suffix('Z').unwrap_or(date_time_str);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(date_time) = NaiveDateTime::parse_from_str(naive_str, format) {
            return Some(naive_to_millis(date_time));
        }
    }
    None
}

fn parse_strftime(
    date_time_str: &str,
    strftime_format: &str,
    with_time: bool,
    with_timezone: bool,
) -> Option<i64> {
    match (with_time, with_timezone) {
        (_, true) => DateTime::parse_from_str(date_time_str, strftime_format)
            .ok()
            .map(|date_time| date_time.timestamp_millis()),
        (true, false) => NaiveDateTime::parse_from_str(date_time_str, strftime_format)
            .ok()
            .map(naive_to_millis),
        (false, false) => NaiveDate::parse_from_str(date_time_str, strftime_format)
            .ok()
            .and_then(naive_date_to_millis),
    }
}

/// Translates a `yyyy-MM-dd'T'HH:mm:ss.SSSZ` style pattern into a strftime
/// format. Returns the format and whether it carries a time and a timezone.
fn pattern_to_strftime(pattern: &str) -> Result<(String, bool, bool), String> {
    let mut strftime_format = String::with_capacity(pattern.len() * 2);
    let mut with_time = false;
    let mut with_timezone = false;
    let chars: Vec<char> = pattern.chars().collect();
    let mut idx = 0;
    while idx < chars.len() {
        let letter = chars[idx];
        if letter == '\'' {
            let Some(closing) = chars[idx + 1..].iter().position(|&c| c == '\'') else {
                return Err("unterminated quoted literal".to_string());
            };
            for &literal in &chars[idx + 1..idx + 1 + closing] {
                push_literal(&mut strftime_format, literal);
            }
            idx += closing + 2;
            continue;
        }
        if !letter.is_ascii_alphabetic() {
            push_literal(&mut strftime_format, letter);
            idx += 1;
            continue;
        }
        let run_len = chars[idx..].iter().take_while(|&&c| c == letter).count();
        let specifier = match (letter, run_len) {
            ('y', 4) | ('u', 4) => "%Y",
            ('y', 2) | ('u', 2) => "%y",
            ('M', 1) | ('M', 2) => "%m",
            ('d', 1) | ('d', 2) => "%d",
            ('H', 1) | ('H', 2) => {
                with_time = true;
                "%H"
            }
            ('m', 1) | ('m', 2) => {
                with_time = true;
                "%M"
            }
            ('s', 1) | ('s', 2) => {
                with_time = true;
                "%S"
            }
            ('S', 3) => "%3f",
            ('S', 6) => "%6f",
            ('S', 9) => "%9f",
            ('Z', _) | ('X', _) | ('x', _) => {
                with_timezone = true;
                "%z"
            }
            _ => {
                return Err(format!(
                    "unsupported pattern letter [{}]",
                    chars[idx..idx + run_len].iter().collect::<String>()
                ));
            }
        };
        strftime_format.push_str(specifier);
        idx += run_len;
    }
    Ok((strftime_format, with_time, with_timezone))
}

fn push_literal(strftime_format: &mut String, literal: char) {
    if literal == '%' {
        strftime_format.push_str("%%");
    } else {
        strftime_format.push(literal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MILLIS_2021_01_01: i64 = 1_609_459_200_000;

    #[test]
    fn test_parse_formats() {
        let formats = DateTimeFormat::parse_formats("strict_date_optional_time||epoch_millis")
            .unwrap();
        assert_eq!(
            formats,
            vec![DateTimeFormat::StrictDateOptionalTime, DateTimeFormat::EpochMillis]
        );
        let error = DateTimeFormat::parse_formats("yyyy-MM-dd||qqq").unwrap_err();
        assert!(error.contains("unsupported pattern letter [qqq]"));
        assert!(DateTimeFormat::parse_formats("'unterminated").is_err());
    }

    #[test]
    fn test_strict_date_optional_time() {
        let format = DateTimeFormat::StrictDateOptionalTime;
        assert_eq!(format.parse_millis("2021-01-01"), Some(MILLIS_2021_01_01));
        assert_eq!(
            format.parse_millis("2021-01-01T00:00:00Z"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            format.parse_millis("2021-01-01T01:00:00.000+01:00"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            format.parse_millis("2021-01-01T00:00:01.5"),
            Some(MILLIS_2021_01_01 + 1_500)
        );
        assert_eq!(format.parse_millis("2021-01-01T00:00"), Some(MILLIS_2021_01_01));
        assert_eq!(format.parse_millis("2021"), None);
        assert_eq!(format.parse_millis("21-01-01"), None);
        assert_eq!(format.parse_millis("not a date at all"), None);
    }

    #[test]
    fn test_epoch_formats() {
        assert_eq!(
            DateTimeFormat::EpochMillis.parse_millis("1609459200000"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            DateTimeFormat::EpochSecond.parse_millis("1609459200"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            DateTimeFormat::EpochSecond.parse_millis("1609459200.25"),
            Some(MILLIS_2021_01_01 + 250)
        );
        assert_eq!(DateTimeFormat::EpochMillis.parse_millis("abc"), None);
    }

    #[test]
    fn test_pattern_formats() {
        let formats = DateTimeFormat::parse_formats("yyyy/MM/dd HH:mm:ss||yyyy/MM/dd").unwrap();
        assert_eq!(
            parse_date_time("2021/01/01 00:00:00", &formats),
            Ok(MILLIS_2021_01_01)
        );
        assert_eq!(parse_date_time("2021/01/01", &formats), Ok(MILLIS_2021_01_01));
        let with_zone = DateTimeFormat::from_str("yyyy-MM-dd'T'HH:mm:ssZ").unwrap();
        assert_eq!(
            with_zone.parse_millis("2021-01-01T02:00:00+0200"),
            Some(MILLIS_2021_01_01)
        );
        let error = parse_date_time("2021-01-01", &formats).unwrap_err();
        assert_eq!(
            error,
            "failed to parse date field [2021-01-01] with format [yyyy/MM/dd HH:mm:ss||yyyy/MM/dd]"
        );
    }

    #[test]
    fn test_well_known_formats() {
        assert_eq!(
            DateTimeFormat::Rfc3339.parse_millis("2021-01-01T00:00:00Z"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            DateTimeFormat::Rfc2822.parse_millis("Fri, 01 Jan 2021 00:00:00 +0000"),
            Some(MILLIS_2021_01_01)
        );
        assert_eq!(
            DateTimeFormat::Iso8601.parse_millis("2021-01-01T00:00:00Z"),
            Some(MILLIS_2021_01_01)
        );
    }

    #[test]
    fn test_date_time_format_serde() {
        let formats: Vec<DateTimeFormat> =
            serde_json::from_str(r#"["epoch_second", "yyyy-MM-dd"]"#).unwrap();
        assert_eq!(formats[0], DateTimeFormat::EpochSecond);
        assert_eq!(
            serde_json::to_value(&formats).unwrap(),
            serde_json::json!(["epoch_second", "yyyy-MM-dd"])
        );
    }
}
