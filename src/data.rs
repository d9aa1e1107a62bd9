use crate::error::LoadError;
use crate::types::{
    AttributeValue, Column, ColumnType, Feature, GeometryCollection, GeometrySchema, TableSchema,
    TabularSeries, Value,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, Trim};
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::dbase::FieldValue;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Attribute as read from the file, before dates are rendered to text.
#[derive(Debug, Clone, PartialEq)]
enum RawValue {
    Plain(AttributeValue),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

struct RawFeature {
    geometry: MultiPolygon<f64>,
    attributes: BTreeMap<String, RawValue>,
}

/// Load a polygon layer (GeoJSON or Shapefile) and normalize it against `schema`.
pub fn load_geometry(path: &Path, schema: &GeometrySchema) -> Result<GeometryCollection, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let origin = path.display().to_string();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| LoadError::parse(&origin, "geometry file has no extension"))?;

    let features = match extension.as_str() {
        "shp" => read_shapefile(path, &origin)?,
        "json" | "geojson" => {
            let file = File::open(path).map_err(|e| LoadError::parse(&origin, e.to_string()))?;
            read_geojson_features(BufReader::new(file), &origin)?
        }
        _ => {
            return Err(LoadError::parse(
                &origin,
                format!("unsupported geometry format: {}", extension),
            ))
        }
    };

    let collection = normalize(features, schema, &origin)?;
    debug!(path = %origin, features = collection.len(), "loaded geometry");
    Ok(collection)
}

/// Same as [`load_geometry`] for a GeoJSON payload that is not on disk.
pub fn read_geojson<R: Read>(
    reader: R,
    schema: &GeometrySchema,
    origin: &str,
) -> Result<GeometryCollection, LoadError> {
    let features = read_geojson_features(reader, origin)?;
    normalize(features, schema, origin)
}

fn read_geojson_features<R: Read>(reader: R, origin: &str) -> Result<Vec<RawFeature>, LoadError> {
    let geojson = GeoJson::from_reader(reader).map_err(|e| LoadError::parse(origin, e.to_string()))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(LoadError::parse(origin, "GeoJSON must be a FeatureCollection")),
    };

    let mut features = Vec::with_capacity(collection.features.len());

    for (i, feature) in collection.features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(geom) => {
                let geometry: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| LoadError::parse(origin, format!("feature {}: {:?}", i, e)))?;
                match geometry {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => return Err(LoadError::parse(origin, format!("feature {} is not a polygon", i))),
                }
            }
            None => return Err(LoadError::parse(origin, format!("feature {} has no geometry", i))),
        };
        let geometry = non_empty(geometry, origin, i)?;

        let attributes = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, RawValue::Plain(json_to_attribute(value))))
            .collect();

        features.push(RawFeature { geometry, attributes });
    }

    Ok(features)
}

fn non_empty(geometry: MultiPolygon<f64>, origin: &str, i: usize) -> Result<MultiPolygon<f64>, LoadError> {
    if geometry.0.is_empty() {
        return Err(LoadError::parse(origin, format!("feature {} has an empty geometry", i)));
    }
    Ok(geometry)
}

fn json_to_attribute(value: serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::Null => AttributeValue::Null,
        serde_json::Value::Bool(b) => AttributeValue::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Integer(i),
            None => n.as_f64().map(AttributeValue::Float).unwrap_or(AttributeValue::Null),
        },
        serde_json::Value::String(s) => AttributeValue::Text(s),
        other => AttributeValue::Text(other.to_string()),
    }
}

fn read_shapefile(path: &Path, origin: &str) -> Result<Vec<RawFeature>, LoadError> {
    let mut reader =
        shapefile::Reader::from_path(path).map_err(|e| LoadError::parse(origin, e.to_string()))?;

    let mut features = Vec::new();

    for (i, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| LoadError::parse(origin, e.to_string()))?;

        let convert_err = |e: &dyn std::fmt::Debug| LoadError::parse(origin, format!("feature {}: {:?}", i, e));
        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into().map_err(|e| convert_err(&e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into().map_err(|e| convert_err(&e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into().map_err(|e| convert_err(&e))?,
            shapefile::Shape::NullShape => {
                return Err(LoadError::parse(origin, format!("feature {} has no geometry", i)))
            }
            _ => return Err(LoadError::parse(origin, format!("feature {} is not a polygon", i))),
        };
        let geometry = non_empty(geometry, origin, i)?;

        let mut attributes = BTreeMap::new();
        for (name, value) in record {
            attributes.insert(name, field_to_raw(value, origin)?);
        }

        features.push(RawFeature { geometry, attributes });
    }

    Ok(features)
}

fn field_to_raw(value: FieldValue, origin: &str) -> Result<RawValue, LoadError> {
    let plain = |v: AttributeValue| -> Result<RawValue, LoadError> { Ok(RawValue::Plain(v)) };
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => plain(AttributeValue::Text(s)),
        FieldValue::Numeric(Some(n)) => plain(AttributeValue::Float(n)),
        FieldValue::Float(Some(f)) => plain(AttributeValue::Float(f as f64)),
        FieldValue::Double(d) | FieldValue::Currency(d) => plain(AttributeValue::Float(d)),
        FieldValue::Integer(i) => plain(AttributeValue::Integer(i as i64)),
        FieldValue::Logical(Some(b)) => plain(AttributeValue::Bool(b)),
        FieldValue::Date(Some(d)) => NaiveDate::from_ymd_opt(d.year() as i32, d.month(), d.day())
            .map(RawValue::Date)
            .ok_or_else(|| LoadError::parse(origin, format!("invalid date {:?}", d))),
        FieldValue::DateTime(dt) => {
            let (d, t) = (dt.date(), dt.time());
            NaiveDate::from_ymd_opt(d.year() as i32, d.month(), d.day())
                .zip(NaiveTime::from_hms_opt(t.hours(), t.minutes(), t.seconds()))
                .map(|(date, time)| RawValue::DateTime(date.and_time(time)))
                .ok_or_else(|| LoadError::parse(origin, format!("invalid datetime {:?}", dt)))
        }
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => plain(AttributeValue::Null),
        #[allow(unreachable_patterns)]
        other => plain(AttributeValue::Text(format!("{:?}", other))),
    }
}

/// Parse a textual date attribute: ISO date, ISO datetime or RFC 3339.
fn parse_date_attribute(text: &str) -> Option<RawValue> {
    let text = text.trim();
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(RawValue::Date(d));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(RawValue::DateTime(dt));
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| RawValue::DateTime(dt.naive_utc()))
}

fn render_attribute(value: RawValue) -> AttributeValue {
    match value {
        RawValue::Plain(v) => v,
        RawValue::Date(d) => AttributeValue::Text(d.format("%Y-%m-%d").to_string()),
        RawValue::DateTime(dt) => AttributeValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

fn normalize(
    features: Vec<RawFeature>,
    schema: &GeometrySchema,
    origin: &str,
) -> Result<GeometryCollection, LoadError> {
    let expected: Option<BTreeSet<String>> =
        features.first().map(|f| f.attributes.keys().cloned().collect());

    let mut normalized = Vec::with_capacity(features.len());

    for (i, mut feature) in features.into_iter().enumerate() {
        if let Some(expected) = &expected {
            if !feature.attributes.keys().eq(expected.iter()) {
                return Err(LoadError::schema(
                    origin,
                    format!("feature {} does not share the attribute set of feature 0", i),
                ));
            }
        }

        for name in &schema.required {
            if !feature.attributes.contains_key(name) {
                return Err(LoadError::schema(origin, format!("required attribute '{}' is missing", name)));
            }
        }

        for name in &schema.dates {
            let Some(value) = feature.attributes.get_mut(name) else {
                return Err(LoadError::schema(origin, format!("date attribute '{}' is missing", name)));
            };
            let parsed = match value {
                RawValue::Plain(AttributeValue::Text(text)) => {
                    Some(parse_date_attribute(text).ok_or_else(|| LoadError::TypeCastError {
                        origin: origin.to_string(),
                        column: name.clone(),
                        row: i + 1,
                        value: text.clone(),
                        expected: ColumnType::Date,
                    })?)
                }
                _ => None,
            };
            if let Some(parsed) = parsed {
                *value = parsed;
            }
        }

        let mut attributes: BTreeMap<String, AttributeValue> = feature
            .attributes
            .into_iter()
            .map(|(name, value)| (name, render_attribute(value)))
            .collect();

        for (from, to) in &schema.rename {
            let value = attributes
                .remove(from)
                .ok_or_else(|| LoadError::schema(origin, format!("cannot rename missing attribute '{}'", from)))?;
            if attributes.insert(to.clone(), value).is_some() {
                return Err(LoadError::schema(
                    origin,
                    format!("renaming '{}' to '{}' collides with an existing attribute", from, to),
                ));
            }
        }

        normalized.push(Feature {
            geometry: feature.geometry,
            attributes,
        });
    }

    Ok(GeometryCollection { features: normalized })
}

/// Load a comma-delimited table and cast every declared column.
pub fn load_table(path: &Path, schema: &TableSchema) -> Result<TabularSeries, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let origin = path.display().to_string();
    let file = File::open(path).map_err(|e| LoadError::parse(&origin, e.to_string()))?;
    let series = read_table(file, schema, &origin)?;
    debug!(path = %origin, rows = series.len(), "loaded table");
    Ok(series)
}

/// Same as [`load_table`] for CSV text that is not on disk.
pub fn read_table<R: Read>(
    reader: R,
    schema: &TableSchema,
    origin: &str,
) -> Result<TabularSeries, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| LoadError::parse(origin, e.to_string()))?
        .clone();

    let mut seen = HashSet::new();
    for header in headers.iter() {
        if !seen.insert(header) {
            return Err(LoadError::schema(origin, format!("column '{}' appears twice", header)));
        }
    }

    for name in schema.columns.keys() {
        if !seen.contains(name.as_str()) {
            return Err(LoadError::schema(origin, format!("declared column '{}' is missing", name)));
        }
    }

    let columns: Vec<Column> = headers
        .iter()
        .map(|name| Column {
            name: name.to_string(),
            kind: schema.columns.get(name).copied().unwrap_or(ColumnType::String),
        })
        .collect();

    let mut rows = Vec::new();

    for (i, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| LoadError::parse(origin, e.to_string()))?;
        let mut row = Vec::with_capacity(columns.len());

        for (column, raw) in columns.iter().zip(record.iter()) {
            let value = cast(raw, column.kind, schema.date_format.as_deref()).ok_or_else(|| {
                LoadError::TypeCastError {
                    origin: origin.to_string(),
                    column: column.name.clone(),
                    row: i + 1,
                    value: raw.to_string(),
                    expected: column.kind,
                }
            })?;
            row.push(value);
        }

        rows.push(row);
    }

    Ok(TabularSeries { columns, rows })
}

fn cast(raw: &str, kind: ColumnType, date_format: Option<&str>) -> Option<Value> {
    match kind {
        ColumnType::Int => raw.parse().ok().map(Value::Int),
        ColumnType::Float => parse_finite(raw).map(Value::Float),
        ColumnType::String => Some(Value::Text(raw.to_string())),
        ColumnType::Date => parse_date(raw, date_format).map(Value::Date),
        ColumnType::FloatList => parse_float_list(raw).map(Value::FloatList),
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_date(raw: &str, format: Option<&str>) -> Option<NaiveDate> {
    match format {
        Some(format) => NaiveDate::parse_from_str(raw, format)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(raw, format).ok().map(|dt| dt.date())),
        None => DATE_FORMATS
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
            .or_else(|| {
                DATETIME_FORMATS
                    .iter()
                    .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                    .map(|dt| dt.date())
            }),
    }
}

// "[0.12, nan, 0.5]" as stored for per-basin NDVI time series; `nan` marks a
// cloudy day with no observation.
fn parse_float_list(raw: &str) -> Option<Vec<f64>> {
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(str::trim)
        .map(|part| {
            if part.eq_ignore_ascii_case("nan") {
                Some(f64::NAN)
            } else {
                parse_finite(part)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    const BASINS: &str = "basin_id,year_2015,year_2018\n1,12.5,31.0\n2,4.0,9.0\n";

    const CATCHMENTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[[-2.8, 48.4], [-2.6, 48.4], [-2.6, 48.6], [-2.8, 48.4]]]},
                "properties": {"ida": "13", "area_km2": 42.5, "DateCreationOH": "2015-03-01T00:00:00"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "MultiPolygon", "coordinates": [[[[-2.5, 48.4], [-2.3, 48.4], [-2.3, 48.6], [-2.5, 48.4]]]]},
                "properties": {"ida": "14", "area_km2": 17, "DateCreationOH": "2016-11-20"}
            }
        ]
    }"#;

    fn basin_schema() -> TableSchema {
        TableSchema::new([
            ("basin_id", ColumnType::Int),
            ("year_2015", ColumnType::Float),
            ("year_2018", ColumnType::Float),
        ])
    }

    fn catchment_schema() -> GeometrySchema {
        GeometrySchema {
            required: vec!["ida".into(), "area_km2".into()],
            dates: vec!["DateCreationOH".into()],
            rename: BTreeMap::from([("ida".to_string(), "BV Ref".to_string())]),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ifm-data-{}-{}", std::process::id(), name))
    }

    #[test]
    fn basin_table_keeps_exact_values() {
        let series = read_table(BASINS.as_bytes(), &basin_schema(), "inline").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(
            series.rows()[0],
            vec![Value::Int(1), Value::Float(12.5), Value::Float(31.0)]
        );
        assert_eq!(
            series.rows()[1],
            vec![Value::Int(2), Value::Float(4.0), Value::Float(9.0)]
        );
    }

    #[test]
    fn declared_float_columns_hold_only_floats() {
        let series = read_table(BASINS.as_bytes(), &basin_schema(), "inline").unwrap();
        assert!(series
            .column("year_2018")
            .unwrap()
            .all(|v| matches!(v, Value::Float(_))));
    }

    #[test]
    fn missing_declared_column_is_schema_mismatch() {
        let schema = TableSchema::new([("year_2021", ColumnType::Float)]);
        let err = read_table(BASINS.as_bytes(), &schema, "inline").unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn unparseable_cell_fails_whole_load() {
        let csv = "basin_id,year_2015,year_2018\n1,12.5,31.0\n2,n/a,9.0\n";
        match read_table(csv.as_bytes(), &basin_schema(), "inline").unwrap_err() {
            LoadError::TypeCastError { column, row, value, expected, .. } => {
                assert_eq!(column, "year_2015");
                assert_eq!(row, 2);
                assert_eq!(value, "n/a");
                assert_eq!(expected, ColumnType::Float);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_cell_is_not_defaulted() {
        let csv = "basin_id,year_2015,year_2018\n1,,31.0\n";
        let err = read_table(csv.as_bytes(), &basin_schema(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::TypeCastError { .. }));
    }

    #[test]
    fn nan_is_rejected_for_floats() {
        let csv = "basin_id,year_2015,year_2018\n1,NaN,31.0\n";
        let err = read_table(csv.as_bytes(), &basin_schema(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::TypeCastError { .. }));
    }

    #[test]
    fn ragged_row_is_parse_error() {
        let csv = "basin_id,year_2015,year_2018\n1,12.5\n";
        let err = read_table(csv.as_bytes(), &basin_schema(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { .. }));
    }

    #[test]
    fn header_only_table_is_empty() {
        let csv = "basin_id,year_2015,year_2018\n";
        let series = read_table(csv.as_bytes(), &basin_schema(), "inline").unwrap();
        assert!(series.is_empty());
        assert_eq!(series.columns().len(), 3);
    }

    #[test]
    fn undeclared_columns_stay_text() {
        let csv = "Crop,2017 (%)\nWheat,31.2\n";
        let schema = TableSchema::new([("2017 (%)", ColumnType::Float)]);
        let series = read_table(csv.as_bytes(), &schema, "inline").unwrap();
        assert_eq!(series.column_type("Crop"), Some(ColumnType::String));
        assert_eq!(series.value(0, "Crop"), Some(&Value::Text("Wheat".into())));
    }

    #[test]
    fn dates_follow_declared_format() {
        let csv = "date,perc_cloud\n20-04-2024,12.5\n09-06-2024,80\n";
        let schema = TableSchema::new([("date", ColumnType::Date), ("perc_cloud", ColumnType::Float)])
            .with_date_format("%d-%m-%Y");
        let series = read_table(csv.as_bytes(), &schema, "inline").unwrap();
        assert_eq!(
            series.value(1, "date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()))
        );
    }

    #[test]
    fn default_date_formats_accept_timestamps() {
        let csv = "date\n2022-03-05 10:41:00\n2022-03-10\n";
        let schema = TableSchema::new([("date", ColumnType::Date)]);
        let series = read_table(csv.as_bytes(), &schema, "inline").unwrap();
        assert_eq!(
            series.value(0, "date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2022, 3, 5).unwrap()))
        );
    }

    #[test]
    fn float_list_cells_are_parsed() {
        let csv = "ida,ts_mean_raw_s2\n13,\"[0.21, 0.35,0.5]\"\n14,[]\n";
        let schema = TableSchema::new([("ts_mean_raw_s2", ColumnType::FloatList)]);
        let series = read_table(csv.as_bytes(), &schema, "inline").unwrap();
        match series.value(0, "ts_mean_raw_s2") {
            Some(Value::FloatList(values)) => {
                assert_eq!(values.len(), 3);
                assert_relative_eq!(values[1], 0.35);
            }
            other => panic!("unexpected value: {other:?}"),
        }
        assert_eq!(series.value(1, "ts_mean_raw_s2"), Some(&Value::FloatList(vec![])));
    }

    #[test]
    fn float_lists_keep_gaps_but_reject_infinity() {
        let schema = TableSchema::new([("ts", ColumnType::FloatList)]);
        let series = read_table("ts\n\"[0.4, nan, 0.6]\"\n".as_bytes(), &schema, "inline").unwrap();
        match series.value(0, "ts") {
            Some(Value::FloatList(values)) => {
                assert_eq!(values.len(), 3);
                assert!(values[1].is_nan());
            }
            other => panic!("unexpected value: {other:?}"),
        }

        let err = read_table("ts\n\"[0.4, inf]\"\n".as_bytes(), &schema, "inline").unwrap_err();
        assert!(matches!(err, LoadError::TypeCastError { .. }));
    }

    #[test]
    fn duplicate_header_is_schema_mismatch() {
        let csv = "a,a\n1,2\n";
        let err = read_table(csv.as_bytes(), &TableSchema::default(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn geojson_feature_count_and_geometry() {
        let collection = read_geojson(CATCHMENTS.as_bytes(), &catchment_schema(), "inline").unwrap();
        assert_eq!(collection.len(), 2);
        assert!(collection.features.iter().all(|f| !f.geometry.0.is_empty()));
    }

    #[test]
    fn date_attribute_becomes_canonical_text() {
        let collection = read_geojson(CATCHMENTS.as_bytes(), &catchment_schema(), "inline").unwrap();
        assert_eq!(
            collection.features[0].attributes["DateCreationOH"],
            AttributeValue::Text("2015-03-01 00:00:00".into())
        );
        assert_eq!(
            collection.features[1].attributes["DateCreationOH"],
            AttributeValue::Text("2016-11-20".into())
        );
    }

    #[test]
    fn rename_applies_display_labels() {
        let collection = read_geojson(CATCHMENTS.as_bytes(), &catchment_schema(), "inline").unwrap();
        let names = collection.attribute_names();
        assert!(names.contains(&"BV Ref"));
        assert!(!names.contains(&"ida"));
        assert_eq!(
            collection.features[1].attributes["BV Ref"],
            AttributeValue::Text("14".into())
        );
        assert_eq!(collection.features[1].attributes["area_km2"], AttributeValue::Integer(17));
    }

    #[test]
    fn missing_required_attribute_is_schema_mismatch() {
        let schema = GeometrySchema {
            required: vec!["SITECODE".into()],
            ..Default::default()
        };
        let err = read_geojson(CATCHMENTS.as_bytes(), &schema, "inline").unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn bad_date_attribute_is_type_cast_error() {
        let geojson = CATCHMENTS.replace("2016-11-20", "sometime in 2016");
        let err = read_geojson(geojson.as_bytes(), &catchment_schema(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::TypeCastError { row: 2, .. }));
    }

    #[test]
    fn non_uniform_attributes_are_rejected() {
        let geojson = CATCHMENTS.replace(r#""area_km2": 17, "#, "");
        let err = read_geojson(geojson.as_bytes(), &GeometrySchema::default(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn null_geometry_is_parse_error() {
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": null, "properties": {}}
        ]}"#;
        let err = read_geojson(geojson.as_bytes(), &GeometrySchema::default(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { .. }));
    }

    #[test]
    fn point_geometry_is_parse_error() {
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {}}
        ]}"#;
        let err = read_geojson(geojson.as_bytes(), &GeometrySchema::default(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { .. }));
    }

    #[test]
    fn empty_multipolygon_is_parse_error() {
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "MultiPolygon", "coordinates": []}, "properties": {}}
        ]}"#;
        let err = read_geojson(geojson.as_bytes(), &GeometrySchema::default(), "inline").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { .. }));
    }

    #[test]
    fn offset_datetime_is_rendered_in_utc() {
        let geojson = CATCHMENTS.replace("2016-11-20", "2015-03-01T02:00:00+02:00");
        let collection = read_geojson(geojson.as_bytes(), &catchment_schema(), "inline").unwrap();
        assert_eq!(
            collection.features[1].attributes["DateCreationOH"],
            AttributeValue::Text("2015-03-01 00:00:00".into())
        );
    }

    #[test]
    fn shapefile_dates_become_canonical_text() {
        use shapefile::dbase::{self, FieldName, TableWriterBuilder};
        use shapefile::{Point, Polygon, PolygonRing};

        let path = temp_path("basins.shp");
        let table = TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("ida").unwrap(), 8)
            .add_date_field(FieldName::try_from("created").unwrap());
        {
            let mut writer = shapefile::Writer::from_path(&path, table).unwrap();
            let polygon = Polygon::new(PolygonRing::Outer(vec![
                Point::new(-3.0, 48.0),
                Point::new(-3.0, 48.5),
                Point::new(-2.5, 48.5),
                Point::new(-2.5, 48.0),
                Point::new(-3.0, 48.0),
            ]));
            let mut record = dbase::Record::default();
            record.insert("ida".to_string(), FieldValue::Character(Some("12".to_string())));
            record.insert("created".to_string(), FieldValue::Date(Some(dbase::Date::new(5, 5, 2015))));
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }

        let schema = GeometrySchema {
            required: vec!["ida".into(), "created".into()],
            ..Default::default()
        };
        let collection = load_geometry(&path, &schema);
        for ext in ["shp", "shx", "dbf"] {
            let _ = std::fs::remove_file(path.with_extension(ext));
        }

        let collection = collection.unwrap();
        assert_eq!(collection.len(), 1);
        assert!(!collection.features[0].geometry.0.is_empty());
        assert_eq!(
            collection.features[0].attributes["created"],
            AttributeValue::Text("2015-05-05".into())
        );
    }

    #[test]
    fn empty_feature_collection_is_valid() {
        let geojson = r#"{"type": "FeatureCollection", "features": []}"#;
        let collection = read_geojson(geojson.as_bytes(), &catchment_schema(), "inline").unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn missing_files_are_not_found() {
        let path = temp_path("absent.geojson");
        assert!(matches!(
            load_geometry(&path, &GeometrySchema::default()),
            Err(LoadError::NotFound(_))
        ));
        assert!(matches!(
            load_table(&temp_path("absent.csv"), &basin_schema()),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn unsupported_extension_is_parse_error() {
        let path = temp_path("layer.kml");
        std::fs::write(&path, "<kml/>").unwrap();
        let err = load_geometry(&path, &GeometrySchema::default()).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, LoadError::ParseError { .. }));
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let path = temp_path("catchments.geojson");
        std::fs::write(&path, CATCHMENTS).unwrap();
        let first = load_geometry(&path, &catchment_schema()).unwrap();
        let second = load_geometry(&path, &catchment_schema()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(first, second);
    }
}
