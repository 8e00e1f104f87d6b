use crate::types::{BoundingBox, CompareError, CompareResult, ImageRecord};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use geo::{Area, BoundingRect, Centroid, Intersects, Line, LineString, Polygon};
use geojson::GeoJson;
use serde_json::Value;

/// Meters per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111_319.49;

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CompareResult<Self> {
        if end <= start {
            return Err(CompareError::InvalidDate(format!(
                "window end {} is not after start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Window starting at `start` and lasting `days` whole days
    pub fn advance(start: DateTime<Utc>, days: i64) -> CompareResult<Self> {
        if days <= 0 {
            return Err(CompareError::InvalidDate(format!(
                "window length must be at least one day, got {}",
                days
            )));
        }
        let end = Duration::try_days(days)
            .and_then(|length| start.checked_add_signed(length))
            .ok_or_else(|| {
                CompareError::InvalidDate(format!(
                    "{} + {} days is outside the representable date range",
                    start.to_rfc3339(),
                    days
                ))
            })?;
        Self::new(start, end)
    }

    /// Parse `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp
    pub fn parse_date(text: &str) -> CompareResult<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| CompareError::InvalidDate(text.to_string()))?;
            return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CompareError::InvalidDate(format!("'{}': {}", text, e)))
    }

    /// Window from a literal start date plus a day count
    pub fn from_date_str(start: &str, days: i64) -> CompareResult<Self> {
        Self::advance(Self::parse_date(start)?, days)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// STAC `datetime` interval. STAC ranges are closed, so the end is
    /// pulled back by one millisecond to keep the window half-open.
    pub fn to_stac_interval(&self) -> String {
        let end = self
            .end
            .checked_sub_signed(Duration::milliseconds(1))
            .unwrap_or(self.end);
        format!(
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            end.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Area of interest: a polygon in lon/lat without holes
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    polygon: Polygon<f64>,
}

impl Aoi {
    /// Build from ring vertices; the ring is closed if it is not already
    pub fn from_ring(ring: Vec<(f64, f64)>) -> CompareResult<Self> {
        Self::from_polygon(Polygon::new(LineString::from(ring), vec![]))
    }

    /// Axis-aligned rectangle
    pub fn from_bbox(bbox: &BoundingBox) -> CompareResult<Self> {
        Self::from_ring(vec![
            (bbox.min_lon, bbox.min_lat),
            (bbox.max_lon, bbox.min_lat),
            (bbox.max_lon, bbox.max_lat),
            (bbox.min_lon, bbox.max_lat),
        ])
    }

    /// Interior rings are dropped: only the outer boundary bounds the search
    pub fn from_polygon(polygon: Polygon<f64>) -> CompareResult<Self> {
        let (exterior, interiors) = polygon.into_inner();
        if !interiors.is_empty() {
            log::warn!("Ignoring {} interior ring(s) of AOI polygon", interiors.len());
        }
        let aoi = Self {
            polygon: Polygon::new(exterior, vec![]),
        };
        aoi.validate()?;
        Ok(aoi)
    }

    /// Accepts a GeoJSON Polygon, a Feature wrapping one, or a
    /// FeatureCollection holding exactly one such Feature
    pub fn from_geojson(value: &Value) -> CompareResult<Self> {
        let geojson = GeoJson::from_json_value(value.clone())
            .map_err(|e| CompareError::InvalidGeometry(format!("not valid GeoJSON: {}", e)))?;
        Self::from_parsed(geojson)
    }

    pub fn from_geojson_str(text: &str) -> CompareResult<Self> {
        let geojson = text
            .parse::<GeoJson>()
            .map_err(|e| CompareError::InvalidGeometry(format!("not valid GeoJSON: {}", e)))?;
        Self::from_parsed(geojson)
    }

    fn from_parsed(geojson: GeoJson) -> CompareResult<Self> {
        let geometry = match geojson {
            GeoJson::Geometry(geometry) => geometry,
            GeoJson::Feature(feature) => feature
                .geometry
                .ok_or_else(|| CompareError::InvalidGeometry("Feature has no geometry".to_string()))?,
            GeoJson::FeatureCollection(collection) => {
                if collection.features.len() != 1 {
                    return Err(CompareError::InvalidGeometry(format!(
                        "expected exactly one feature, found {}",
                        collection.features.len()
                    )));
                }
                collection
                    .features
                    .into_iter()
                    .next()
                    .and_then(|feature| feature.geometry)
                    .ok_or_else(|| CompareError::InvalidGeometry("Feature has no geometry".to_string()))?
            }
        };
        Self::from_geometry(geometry)
    }

    fn from_geometry(geometry: geojson::Geometry) -> CompareResult<Self> {
        match &geometry.value {
            geojson::Value::Polygon(rings) => {
                if rings.iter().flatten().any(|position| position.len() < 2) {
                    return Err(CompareError::InvalidGeometry(
                        "polygon position has fewer than 2 coordinates".to_string(),
                    ));
                }
            }
            other => {
                return Err(CompareError::InvalidGeometry(format!(
                    "unsupported geometry type '{}', expected Polygon",
                    geometry_type(other)
                )))
            }
        }
        match geo::Geometry::<f64>::try_from(geometry) {
            Ok(geo::Geometry::Polygon(polygon)) => Self::from_polygon(polygon),
            Ok(_) => Err(CompareError::InvalidGeometry("expected a Polygon".to_string())),
            Err(e) => Err(CompareError::InvalidGeometry(e.to_string())),
        }
    }

    fn validate(&self) -> CompareResult<()> {
        let ring = self.polygon.exterior();
        // Closed ring: distinct vertices plus the repeated first one
        if ring.0.len() < 4 {
            return Err(CompareError::InvalidGeometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                ring.0.len().saturating_sub(1)
            )));
        }
        for c in ring.coords() {
            if !c.x.is_finite() || !c.y.is_finite() {
                return Err(CompareError::InvalidGeometry("non-finite coordinate".to_string()));
            }
            if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
                return Err(CompareError::InvalidGeometry(format!(
                    "coordinate ({}, {}) outside lon/lat range",
                    c.x, c.y
                )));
            }
        }
        if self.polygon.unsigned_area() < 1e-14 {
            return Err(CompareError::InvalidGeometry("polygon has zero area".to_string()));
        }

        let edges: Vec<Line<f64>> = ring.lines().collect();
        let n = edges.len();
        for i in 0..n {
            for j in (i + 2)..n {
                // The first and last edges share the closing vertex
                if i == 0 && j == n - 1 {
                    continue;
                }
                if edges[i].intersects(&edges[j]) {
                    return Err(CompareError::InvalidGeometry("polygon ring intersects itself".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bbox(&self) -> BoundingBox {
        match self.polygon.bounding_rect() {
            Some(rect) => BoundingBox {
                min_lon: rect.min().x,
                max_lon: rect.max().x,
                min_lat: rect.min().y,
                max_lat: rect.max().y,
            },
            None => BoundingBox {
                min_lon: 0.0,
                max_lon: 0.0,
                min_lat: 0.0,
                max_lat: 0.0,
            },
        }
    }

    /// Area centroid (lon, lat)
    pub fn centroid(&self) -> (f64, f64) {
        match self.polygon.centroid() {
            Some(point) => (point.x(), point.y()),
            None => {
                let bbox = self.bbox();
                ((bbox.min_lon + bbox.max_lon) / 2.0, (bbox.min_lat + bbox.max_lat) / 2.0)
            }
        }
    }

    /// Approximate planar area in square meters (local equirectangular)
    pub fn area_m2(&self) -> f64 {
        let (_, lat0) = self.centroid();
        let kx = METERS_PER_DEGREE * lat0.to_radians().cos();
        self.polygon.unsigned_area() * kx * METERS_PER_DEGREE
    }
}

fn geometry_type(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        _ => "GeometryCollection",
    }
}

/// Spatial + temporal filter shared by both collection queries
#[derive(Debug, Clone)]
pub struct CollectionFilter {
    pub aoi: Aoi,
    pub window: TimeWindow,
}

impl CollectionFilter {
    pub fn new(aoi: Aoi, window: TimeWindow) -> Self {
        Self { aoi, window }
    }

    /// Records without a bbox are trusted to match spatially
    pub fn matches(&self, record: &ImageRecord) -> bool {
        if !self.window.contains(record.acquired) {
            return false;
        }
        match &record.bbox {
            Some(bbox) => bbox.intersects(&self.aoi.bbox()),
            None => true,
        }
    }

    /// Keep the matching records, ordered by acquisition time then id
    pub fn apply(&self, records: Vec<ImageRecord>) -> Vec<ImageRecord> {
        let total = records.len();
        let mut kept: Vec<ImageRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
        if kept.len() < total {
            log::debug!("Filter dropped {} of {} records", total - kept.len(), total);
        }
        kept.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        kept
    }
}
