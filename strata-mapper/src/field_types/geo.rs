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

use super::{deserialize_options, FieldKind, FieldValues, IndexedValue, MappingParserContext, ValueError};
use crate::error::MappingError;
use crate::JsonObject;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A point on earth, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint { lat, lon }
    }

    fn validate(self, field_name: &str) -> Result<GeoPoint, String> {
        if !(-90.0..=90.0).contains(&self.lat) || self.lat.is_nan() {
            return Err(format!(
                "illegal latitude value [{}] for [{field_name}]",
                self.lat
            ));
        }
        if !(-180.0..=180.0).contains(&self.lon) || self.lon.is_nan() {
            return Err(format!(
                "illegal longitude value [{}] for [{field_name}]",
                self.lon
            ));
        }
        Ok(self)
    }

    /// Decodes the center of the cell of a geohash.
    pub fn from_geohash(geohash: &str) -> Result<GeoPoint, String> {
        if geohash.is_empty() || geohash.len() > 12 {
            return Err(format!("unsupported geohash [{geohash}]"));
        }
        let (mut min_lat, mut max_lat) = (-90.0f64, 90.0f64);
        let (mut min_lon, mut max_lon) = (-180.0f64, 180.0f64);
        let mut is_lon_bit = true;
        for character in geohash.bytes() {
            let Some(cell) = GEOHASH_ALPHABET
                .iter()
                .position(|&symbol| symbol == character.to_ascii_lowercase())
            else {
                return Err(format!(
                    "unsupported symbol [{}] in geohash [{geohash}]",
                    character as char
                ));
            };
            for shift in (0..5).rev() {
                let bit_set = (cell >> shift) & 1 == 1;
                if is_lon_bit {
                    let mid = (min_lon + max_lon) / 2.0;
                    if bit_set {
                        min_lon = mid;
                    } else {
                        max_lon = mid;
                    }
                } else {
                    let mid = (min_lat + max_lat) / 2.0;
                    if bit_set {
                        min_lat = mid;
                    } else {
                        max_lat = mid;
                    }
                }
                is_lon_bit = !is_lon_bit;
            }
        }
        Ok(GeoPoint::new(
            (min_lat + max_lat) / 2.0,
            (min_lon + max_lon) / 2.0,
        ))
    }
}

fn coordinate(value: &JsonValue, name: &str) -> Result<f64, String> {
    match value {
        JsonValue::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("invalid [{name}] value [{number}]")),
        JsonValue::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("[{name}] must be a number, got [{text}]")),
        _ => Err(format!("[{name}] must be a number, got [{value}]")),
    }
}

/// Reads a `[lon, lat]` or `[lon, lat, z]` position.
fn parse_position(values: &[JsonValue], ignore_z_value: bool) -> Result<GeoPoint, String> {
    match values {
        [lon, lat] => Ok(GeoPoint::new(coordinate(lat, "lat")?, coordinate(lon, "lon")?)),
        [lon, lat, z] => {
            let z = coordinate(z, "z")?;
            if !ignore_z_value {
                return Err(format!(
                    "Exception parsing coordinates: found Z value [{z}] but [ignore_z_value] \
                     parameter is [false]"
                ));
            }
            Ok(GeoPoint::new(coordinate(lat, "lat")?, coordinate(lon, "lon")?))
        }
        _ => Err(format!(
            "geo point expected [lon, lat] coordinates, found [{}] values",
            values.len()
        )),
    }
}

/// Parses `lat,lon`, `POINT (lon lat)` or a geohash.
fn parse_point_str(text: &str, ignore_z_value: bool) -> Result<GeoPoint, String> {
    let trimmed = text.trim();
    if let Some(wkt_body) = trimmed
        .strip_prefix("POINT")
        .or_else(|| trimmed.strip_prefix("point"))
    {
        let coordinates = wkt_body
            .trim()
            .strip_prefix('(')
            .and_then(|body| body.strip_suffix(')'))
            .ok_or_else(|| format!("invalid WKT point [{text}]"))?;
        let values: Vec<JsonValue> = coordinates
            .split_whitespace()
            .map(|coordinate| JsonValue::String(coordinate.to_string()))
            .collect();
        return parse_position(&values, ignore_z_value);
    }
    if trimmed.contains(',') {
        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        let (lat, lon) = match parts.as_slice() {
            [lat, lon] => (lat, lon),
            [lat, lon, z] => {
                if !ignore_z_value {
                    return Err(format!(
                        "Exception parsing coordinates: found Z value [{z}] but \
                         [ignore_z_value] parameter is [false]"
                    ));
                }
                (lat, lon)
            }
            _ => return Err(format!("failed to parse [{text}] as a geo point")),
        };
        let lat = lat
            .parse::<f64>()
            .map_err(|_| format!("latitude must be a number, got [{lat}]"))?;
        let lon = lon
            .parse::<f64>()
            .map_err(|_| format!("longitude must be a number, got [{lon}]"))?;
        return Ok(GeoPoint::new(lat, lon));
    }
    GeoPoint::from_geohash(trimmed)
}

fn parse_point(value: &JsonValue, ignore_z_value: bool) -> Result<GeoPoint, String> {
    match value {
        JsonValue::Object(json_obj) => {
            if json_obj.contains_key("type") {
                return match GeoShape::parse_geojson(json_obj, ignore_z_value, false)? {
                    GeoShape::Point(point) => Ok(point),
                    _ => Err("geo_point expects a GeoJSON [Point]".to_string()),
                };
            }
            let mut lat = None;
            let mut lon = None;
            for (key, coordinate_value) in json_obj {
                match key.as_str() {
                    "lat" => lat = Some(coordinate(coordinate_value, "lat")?),
                    "lon" => lon = Some(coordinate(coordinate_value, "lon")?),
                    "z" => {
                        if !ignore_z_value {
                            return Err(format!(
                                "Exception parsing coordinates: found Z value \
                                 [{coordinate_value}] but [ignore_z_value] parameter is [false]"
                            ));
                        }
                    }
                    _ => {
                        return Err(
                            "field must be either [lat], [lon] or [type, coordinates]".to_string()
                        );
                    }
                }
            }
            match (lat, lon) {
                (Some(lat), Some(lon)) => Ok(GeoPoint::new(lat, lon)),
                (None, _) => Err("field [lat] missing".to_string()),
                (_, None) => Err("field [lon] missing".to_string()),
            }
        }
        JsonValue::String(text) => parse_point_str(text, ignore_z_value),
        JsonValue::Array(values) => parse_position(values, ignore_z_value),
        _ => Err(format!("failed to parse [{value}] as a geo point")),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoPointOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default = "true_fn")]
    pub doc_values: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default = "true_fn")]
    pub ignore_z_value: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_value: Option<JsonValue>,
}

impl GeoPointOptions {
    const PARAMS: &'static [&'static str] = &[
        "index",
        "doc_values",
        "store",
        "ignore_malformed",
        "ignore_z_value",
        "null_value",
    ];
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoPointFieldType {
    pub options: GeoPointOptions,
}

impl GeoPointFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<GeoPointFieldType, MappingError> {
        let mut options: GeoPointOptions =
            deserialize_options(field_name, "geo_point", params, GeoPointOptions::PARAMS)?;
        options
            .ignore_malformed
            .get_or_insert(ctx.settings.mapping.ignore_malformed);
        if let Some(null_value) = &options.null_value {
            parse_point(null_value, options.ignore_z_value)
                .and_then(|point| point.validate(field_name))
                .map_err(|error| {
                    MappingError::invalid_parameter(
                        field_name,
                        format!("invalid [null_value]: {error}"),
                    )
                })?;
        }
        Ok(GeoPointFieldType { options })
    }

    pub fn ignore_malformed(&self) -> bool {
        self.options.ignore_malformed.unwrap_or(false)
    }

    pub(crate) fn null_value(&self) -> Option<&JsonValue> {
        self.options.null_value.as_ref()
    }

    /// Parses one point, or several when `value` is an array of points. An
    /// array of numbers is a single `[lon, lat]` point.
    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let points: Vec<GeoPoint> = match value {
            JsonValue::Array(values)
                if values.first().map_or(false, |first| !first.is_number()) =>
            {
                values
                    .iter()
                    .filter(|value| !value.is_null())
                    .map(|value| self.parse_single_point(field_name, value))
                    .collect::<Result<_, _>>()?
            }
            _ => vec![self.parse_single_point(field_name, value)?],
        };
        let mut field_values = FieldValues::default();
        for point in points {
            field_values.add_point_value(
                field_name,
                IndexedValue::GeoPoint(point),
                self.options.index,
                self.options.doc_values,
                self.options.store,
            );
        }
        Ok(field_values)
    }

    fn parse_single_point(&self, field_name: &str, value: &JsonValue) -> Result<GeoPoint, ValueError> {
        parse_point(value, self.options.ignore_z_value)
            .and_then(|point| point.validate(field_name))
            .map_err(ValueError::Malformed)
    }
}

/// Bounding box of a shape, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// A shape read from GeoJSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum GeoShape {
    Point(GeoPoint),
    LineString(Vec<GeoPoint>),
    /// Outer ring first, then holes. Rings are closed.
    Polygon(Vec<Vec<GeoPoint>>),
    MultiPoint(Vec<GeoPoint>),
    Envelope {
        top_left: GeoPoint,
        bottom_right: GeoPoint,
    },
}

fn parse_positions(value: &JsonValue, ignore_z_value: bool) -> Result<Vec<GeoPoint>, String> {
    let JsonValue::Array(positions) = value else {
        return Err(format!("expected an array of positions, got [{value}]"));
    };
    positions
        .iter()
        .map(|position| match position {
            JsonValue::Array(values) => parse_position(values, ignore_z_value),
            _ => Err(format!("expected a position, got [{position}]")),
        })
        .collect()
}

impl GeoShape {
    /// Parses a GeoJSON object. Unclosed polygon rings are closed when
    /// `coerce` is set and rejected otherwise.
    pub(crate) fn parse_geojson(
        json_obj: &JsonObject,
        ignore_z_value: bool,
        coerce: bool,
    ) -> Result<GeoShape, String> {
        let shape_type = match json_obj.get("type") {
            Some(JsonValue::String(shape_type)) => shape_type.to_ascii_lowercase(),
            _ => return Err("shape type not included".to_string()),
        };
        let coordinates = json_obj
            .get("coordinates")
            .ok_or_else(|| "coordinates not included".to_string())?;
        match shape_type.as_str() {
            "point" => match coordinates {
                JsonValue::Array(values) => {
                    parse_position(values, ignore_z_value).map(GeoShape::Point)
                }
                _ => Err(format!("expected a position, got [{coordinates}]")),
            },
            "linestring" => {
                let points = parse_positions(coordinates, ignore_z_value)?;
                if points.len() < 2 {
                    return Err(format!(
                        "invalid number of points in LineString (found [{}] - must be >= 2)",
                        points.len()
                    ));
                }
                Ok(GeoShape::LineString(points))
            }
            "multipoint" => parse_positions(coordinates, ignore_z_value).map(GeoShape::MultiPoint),
            "polygon" => {
                let JsonValue::Array(ring_values) = coordinates else {
                    return Err(format!("expected an array of rings, got [{coordinates}]"));
                };
                if ring_values.is_empty() {
                    return Err("invalid LinearRing provided for type polygon".to_string());
                }
                let rings = ring_values
                    .iter()
                    .map(|ring_value| {
                        let ring = parse_positions(ring_value, ignore_z_value)?;
                        close_ring(ring, coerce)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GeoShape::Polygon(rings))
            }
            "envelope" => {
                let corners = parse_positions(coordinates, ignore_z_value)?;
                let [top_left, bottom_right] = corners.as_slice() else {
                    return Err("envelope expects exactly two corners".to_string());
                };
                if top_left.lat < bottom_right.lat {
                    return Err(format!(
                        "top y coordinate [{}] is below bottom y coordinate [{}]",
                        top_left.lat, bottom_right.lat
                    ));
                }
                Ok(GeoShape::Envelope {
                    top_left: *top_left,
                    bottom_right: *bottom_right,
                })
            }
            _ => Err(format!("unknown geo_shape [{shape_type}]")),
        }
    }

    fn points(&self) -> Vec<GeoPoint> {
        match self {
            GeoShape::Point(point) => vec![*point],
            GeoShape::LineString(points) | GeoShape::MultiPoint(points) => points.clone(),
            GeoShape::Polygon(rings) => rings.iter().flatten().copied().collect(),
            GeoShape::Envelope {
                top_left,
                bottom_right,
            } => vec![*top_left, *bottom_right],
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let points = self.points();
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        for point in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(point.lat);
            bbox.max_lat = bbox.max_lat.max(point.lat);
            bbox.min_lon = bbox.min_lon.min(point.lon);
            bbox.max_lon = bbox.max_lon.max(point.lon);
        }
        Some(bbox)
    }
}

fn close_ring(mut ring: Vec<GeoPoint>, coerce: bool) -> Result<Vec<GeoPoint>, String> {
    let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) else {
        return Err("invalid LinearRing found (empty ring)".to_string());
    };
    if first != last {
        if !coerce {
            return Err("invalid LinearRing found (coordinates are not closed)".to_string());
        }
        ring.push(first);
    }
    if ring.len() < 4 {
        return Err(format!(
            "invalid number of points in LinearRing (found [{}] - must be >= 4)",
            ring.len()
        ));
    }
    Ok(ring)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoShapeOptions {
    #[serde(default = "true_fn")]
    pub index: bool,
    #[serde(default)]
    pub coerce: bool,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_malformed: Option<bool>,
    #[serde(default = "true_fn")]
    pub ignore_z_value: bool,
}

impl GeoShapeOptions {
    const PARAMS: &'static [&'static str] = &["index", "coerce", "ignore_malformed", "ignore_z_value"];
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoShapeFieldType {
    pub options: GeoShapeOptions,
}

impl GeoShapeFieldType {
    pub(crate) fn parse(
        field_name: &str,
        params: &JsonObject,
        ctx: &MappingParserContext,
    ) -> Result<GeoShapeFieldType, MappingError> {
        let mut options: GeoShapeOptions =
            deserialize_options(field_name, "geo_shape", params, GeoShapeOptions::PARAMS)?;
        options
            .ignore_malformed
            .get_or_insert(ctx.settings.mapping.ignore_malformed);
        Ok(GeoShapeFieldType { options })
    }

    pub fn ignore_malformed(&self) -> bool {
        self.options.ignore_malformed.unwrap_or(false)
    }

    pub(crate) fn parse_value(
        &self,
        field_name: &str,
        value: &JsonValue,
    ) -> Result<FieldValues, ValueError> {
        let JsonValue::Object(json_obj) = value else {
            return Err(ValueError::Malformed(format!(
                "expected a GeoJSON object, got [{value}]"
            )));
        };
        let shape = GeoShape::parse_geojson(json_obj, self.options.ignore_z_value, self.options.coerce)
            .map_err(ValueError::Malformed)?;
        for point in shape.points() {
            point.validate(field_name).map_err(ValueError::Malformed)?;
        }
        let mut field_values = FieldValues::default();
        if self.options.index {
            let bounding_box = shape.bounding_box();
            field_values.push(
                field_name,
                FieldKind::Indexed,
                IndexedValue::GeoShape(shape, bounding_box),
            );
        }
        Ok(field_values)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_config::IndexSettings;

    use super::*;

    fn geo_point_type(params: JsonValue) -> GeoPointFieldType {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        GeoPointFieldType::parse("location", params.as_object().unwrap(), &ctx).unwrap()
    }

    fn first_point(field_values: &FieldValues) -> GeoPoint {
        match &field_values.fields[0].value {
            IndexedValue::GeoPoint(point) => *point,
            other => panic!("expected a geo point, got {other:?}"),
        }
    }

    #[test]
    fn test_geo_point_formats() {
        let geo_point_type = geo_point_type(json!({}));
        for value in [
            json!({"lat": 41.12, "lon": -71.34}),
            json!({"lat": "41.12", "lon": "-71.34"}),
            json!("41.12,-71.34"),
            json!("POINT (-71.34 41.12)"),
            json!([-71.34, 41.12]),
            json!({"type": "Point", "coordinates": [-71.34, 41.12]}),
        ] {
            let field_values = geo_point_type.parse_value("location", &value).unwrap();
            assert_eq!(field_values.fields.len(), 2, "{value}");
            assert_eq!(first_point(&field_values), GeoPoint::new(41.12, -71.34), "{value}");
        }
    }

    #[test]
    fn test_geo_point_geohash() {
        let point = GeoPoint::from_geohash("drm3btev3e86").unwrap();
        assert!((point.lat - 41.12).abs() < 1e-4);
        assert!((point.lon + 71.34).abs() < 1e-4);
        assert!(GeoPoint::from_geohash("a").is_err());
    }

    #[test]
    fn test_geo_point_array_of_points() {
        let geo_point_type = geo_point_type(json!({}));
        let field_values = geo_point_type
            .parse_value("location", &json!([[1.0, 2.0], "3.0,4.0"]))
            .unwrap();
        assert_eq!(field_values.fields.len(), 4);
    }

    #[test]
    fn test_geo_point_validation() {
        let geo_point_type = geo_point_type(json!({"ignore_z_value": false}));
        let error = geo_point_type
            .parse_value("location", &json!({"lat": 91, "lon": 0}))
            .unwrap_err();
        assert_eq!(error.to_string(), "illegal latitude value [91] for [location]");
        let error = geo_point_type
            .parse_value("location", &json!([0.0, 0.0, 10.0]))
            .unwrap_err();
        assert!(error.to_string().contains("found Z value [10]"));
        let error = geo_point_type
            .parse_value("location", &json!({"lat": 1, "lng": 0}))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "field must be either [lat], [lon] or [type, coordinates]"
        );
    }

    #[test]
    fn test_geo_shape_polygon_closing() {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let open_polygon = json!({
            "type": "polygon",
            "coordinates": [[[100.0, 0.0], [101.0, 0.0], [101.0, 1.0], [100.0, 1.0]]]
        });
        let strict_type = GeoShapeFieldType::parse("shape", &JsonObject::new(), &ctx).unwrap();
        let error = strict_type.parse_value("shape", &open_polygon).unwrap_err();
        assert!(error.to_string().contains("coordinates are not closed"));
        let params = json!({"coerce": true});
        let coerce_type =
            GeoShapeFieldType::parse("shape", params.as_object().unwrap(), &ctx).unwrap();
        let field_values = coerce_type.parse_value("shape", &open_polygon).unwrap();
        let IndexedValue::GeoShape(GeoShape::Polygon(rings), Some(bbox)) =
            &field_values.fields[0].value
        else {
            panic!("expected a polygon");
        };
        assert_eq!(rings[0].len(), 5);
        assert_eq!(bbox.min_lon, 100.0);
        assert_eq!(bbox.max_lat, 1.0);
    }

    #[test]
    fn test_geo_shape_linestring_and_envelope() {
        let settings = IndexSettings::default();
        let ctx = MappingParserContext {
            settings: &settings,
        };
        let shape_type = GeoShapeFieldType::parse("shape", &JsonObject::new(), &ctx).unwrap();
        let error = shape_type
            .parse_value("shape", &json!({"type": "LineString", "coordinates": [[1.0, 1.0]]}))
            .unwrap_err();
        assert!(error.to_string().contains("must be >= 2"));
        let envelope = json!({"type": "envelope", "coordinates": [[100.0, 1.0], [101.0, 0.0]]});
        assert_eq!(shape_type.parse_value("shape", &envelope).unwrap().fields.len(), 1);
        let inverted = json!({"type": "envelope", "coordinates": [[100.0, 0.0], [101.0, 1.0]]});
        assert!(shape_type.parse_value("shape", &inverted).is_err());
    }
}
