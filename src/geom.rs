//! Detection geometry: the 3D point type and the geometry-source boundary.
//!
//! Upstream sensor records carry coordinates as KML-style text: each entry is
//! a `lon,lat,alt` comma triple, with multiple entries per record separated by
//! whitespace. The parsers here turn that text into [`Point3D`] values and
//! silently skip anything malformed; bad entries never reach the estimator.

/// A single detection: latitude, longitude, altitude.
///
/// Immutable value type. Note that [`parse_coordinates`] swaps the KML field
/// order (`lon,lat,alt`) into `(latitude, longitude, altitude)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
}

impl Point3D {
    /// Create a point from latitude, longitude, altitude.
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// The point as a coordinate row in (lat, lon, alt) order.
    pub(crate) fn to_row(self) -> Vec<f64> {
        vec![self.latitude, self.longitude, self.altitude]
    }

    /// Rebuild a point from a (lat, lon, alt) row.
    pub(crate) fn from_row(row: &[f64]) -> Self {
        Self {
            latitude: row[0],
            longitude: row[1],
            altitude: row[2],
        }
    }
}

/// Parse whitespace-separated `lon,lat,alt` entries into points.
///
/// Entries with fewer than three fields or with non-numeric fields are
/// skipped. Fields beyond the third are ignored. The order of the surviving
/// points matches the order of their entries in the input.
pub fn parse_coordinates(text: &str) -> Vec<Point3D> {
    text.split_whitespace().filter_map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Option<Point3D> {
    let mut fields = entry.split(',');
    let longitude = fields.next()?.parse::<f64>().ok()?;
    let latitude = fields.next()?.parse::<f64>().ok()?;
    let altitude = fields.next()?.parse::<f64>().ok()?;
    Some(Point3D::new(latitude, longitude, altitude))
}

/// Extract every point from the `<coordinates>` elements of a KML-style
/// document.
///
/// This is a boundary convenience, not an XML parser: it scans for
/// `<coordinates ...>` / `</coordinates>` pairs and hands their text content
/// to [`parse_coordinates`]. Documents without such elements yield no points.
pub fn extract_kml_points(doc: &str) -> Vec<Point3D> {
    const CLOSE: &str = "</coordinates>";

    let mut points = Vec::new();
    let mut rest = doc;
    while let Some(start) = rest.find("<coordinates") {
        rest = &rest[start..];
        let Some(open_end) = rest.find('>') else {
            break;
        };
        let Some(close) = rest.find(CLOSE) else {
            break;
        };
        if close > open_end {
            points.extend(parse_coordinates(&rest[open_end + 1..close]));
        }
        rest = &rest[close + CLOSE.len()..];
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_entry() {
        let points = parse_coordinates("-123.25,49.26,110.5");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0], Point3D::new(49.26, -123.25, 110.5));
    }

    #[test]
    fn test_parse_multiple_entries_preserves_order() {
        let points = parse_coordinates("1.0,2.0,3.0  4.0,5.0,6.0\n7.0,8.0,9.0");
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].longitude, 1.0);
        assert_eq!(points[1].longitude, 4.0);
        assert_eq!(points[2].latitude, 8.0);
    }

    #[test]
    fn test_parse_skips_wrong_field_count() {
        // Two fields is not enough; the valid neighbor survives.
        let points = parse_coordinates("1.0,2.0 3.0,4.0,5.0");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0], Point3D::new(4.0, 3.0, 5.0));
    }

    #[test]
    fn test_parse_skips_non_numeric() {
        let points = parse_coordinates("a,b,c 1.0,x,3.0 1.0,2.0,3.0");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0], Point3D::new(2.0, 1.0, 3.0));
    }

    #[test]
    fn test_parse_ignores_surplus_fields() {
        let points = parse_coordinates("1.0,2.0,3.0,99.0");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].altitude, 3.0);
    }

    #[test]
    fn test_parse_empty_text() {
        assert!(parse_coordinates("").is_empty());
        assert!(parse_coordinates("   \n\t ").is_empty());
    }

    #[test]
    fn test_extract_kml_points() {
        let doc = r#"<kml>
          <Placemark>
            <name>alpha</name>
            <Point><coordinates>-123.1,49.2,100.0</coordinates></Point>
          </Placemark>
          <Placemark>
            <LineString>
              <coordinates>
                10.0,20.0,0.0 11.0,21.0,0.0
              </coordinates>
            </LineString>
          </Placemark>
        </kml>"#;

        let points = extract_kml_points(doc);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], Point3D::new(49.2, -123.1, 100.0));
        assert_eq!(points[1], Point3D::new(20.0, 10.0, 0.0));
        assert_eq!(points[2], Point3D::new(21.0, 11.0, 0.0));
    }

    #[test]
    fn test_extract_kml_no_coordinates() {
        assert!(extract_kml_points("<kml><Placemark/></kml>").is_empty());
    }

    #[test]
    fn test_extract_kml_unclosed_element() {
        // A dangling open tag terminates the scan without panicking.
        let points = extract_kml_points("<coordinates>1.0,2.0,3.0");
        assert!(points.is_empty());
    }

    #[test]
    fn test_row_round_trip() {
        let p = Point3D::new(49.0, -123.0, 80.0);
        assert_eq!(Point3D::from_row(&p.to_row()), p);
    }
}
