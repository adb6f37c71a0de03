//! Turns a `GeoJSON` `FeatureCollection` into [`Region`] rows.
//!
//! Each feature's name is read from a configurable property. Features
//! without a name or geometry are skipped. Geometry is kept as `GeoJSON`
//! text; whether it is a usable polygon is decided later by the region
//! index, which reports unusable boundaries per region.

use tree_map_geography_models::{Region, RegionId, RegionKind};

use crate::DbError;

/// Extracts the `features` array of a `FeatureCollection` document.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the document is not JSON or has no
/// `features` array.
pub fn parse_feature_collection(document: &str) -> Result<Vec<serde_json::Value>, DbError> {
    let value: serde_json::Value =
        serde_json::from_str(document).map_err(|e| DbError::Conversion {
            message: format!("invalid GeoJSON document: {e}"),
        })?;

    match value.get("features") {
        Some(serde_json::Value::Array(features)) => Ok(features.clone()),
        _ => Err(DbError::Conversion {
            message: "document is not a FeatureCollection".to_string(),
        }),
    }
}

/// Normalizes features into regions of one kind, numbering them from
/// `first_id` in document order.
#[must_use]
pub fn normalize_features(
    features: &[serde_json::Value],
    name_field: &str,
    kind: RegionKind,
    first_id: i64,
) -> Vec<Region> {
    let mut next_id = first_id;
    let mut regions = Vec::new();

    for feature in features {
        let Some((name, boundary_geojson)) = normalize_feature(feature, name_field) else {
            log::debug!("Skipping feature without a {name_field} name or geometry");
            continue;
        };

        regions.push(Region {
            id: RegionId(next_id),
            kind,
            name,
            boundary_geojson,
        });
        next_id += 1;
    }

    regions
}

fn normalize_feature(feature: &serde_json::Value, name_field: &str) -> Option<(String, String)> {
    let name = feature
        .get("properties")?
        .get(name_field)
        .and_then(|value| match value {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())?;

    let geometry = feature.get("geometry")?;
    if geometry.is_null() {
        return None;
    }

    Some((name, serde_json::to_string(geometry).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"NAME": " Fishtown "},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type": "Feature", "properties": {"NAME": ""},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type": "Feature", "properties": {"NAME": "Nowhere"}, "geometry": null},
            {"type": "Feature", "properties": {"NAME": 19103},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,0]]]}}
        ]
    }"#;

    #[test]
    fn keeps_named_features_with_geometry() {
        let features = parse_feature_collection(DOC).unwrap();
        let regions = normalize_features(&features, "NAME", RegionKind::ZipCode, 10);

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id, RegionId(10));
        assert_eq!(regions[0].name, "Fishtown");
        assert_eq!(regions[1].id, RegionId(11));
        assert_eq!(regions[1].name, "19103");
        assert!(regions[1].boundary_geojson.contains("Polygon"));
    }

    #[test]
    fn rejects_non_collections() {
        assert!(parse_feature_collection(r#"{"type":"Point"}"#).is_err());
        assert!(parse_feature_collection("nope").is_err());
    }
}
