// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route export: persisted route records and GPX 1.1 documents.
//!
//! Everything here is pure. Validation happens before any record is built,
//! so a rejected save never reaches the store.

use crate::models::{
    LatLng, NewRoute, PointMetadata, Route, RouteBounds, RouteGeometry, RouteMetadata,
    TrackPoint, Visibility,
};
use crate::services::distance::Accumulator;
use crate::services::session::TrackingSession;
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{DateTime, Utc};
use geo::{BoundingRect, Coord, LineString};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use validator::Validate;

/// Minimum number of points for a route.
pub const MIN_ROUTE_POINTS: usize = 2;

const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
const GPX_CREATOR: &str = "moto-tracker";
/// Google polyline precision (5 decimal places).
const POLYLINE_PRECISION: u32 = 5;

/// Export and import errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("A route needs at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid route details: {0}")]
    Validation(String),

    #[error("Invalid GPX: {0}")]
    InvalidGpx(String),

    #[error("Failed to write GPX: {0}")]
    Write(String),
}

/// User-supplied route details.
#[derive(Debug, Validate)]
struct RouteDetails {
    #[validate(length(min = 1, max = 120, message = "Title must be 1 to 120 characters"))]
    title: String,
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    description: Option<String>,
}

impl RouteDetails {
    fn parse(title: &str, description: Option<&str>) -> Result<Self, ExportError> {
        let details = Self {
            title: title.trim().to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        };
        details
            .validate()
            .map_err(|e| ExportError::Validation(e.to_string()))?;
        Ok(details)
    }
}

/// A track ready to be written as GPX, or read back from one.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxTrack {
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub points: Vec<TrackPoint>,
}

impl GpxTrack {
    /// Track for a session, stamped with its start time.
    pub fn from_session(session: &TrackingSession, title: &str, description: Option<&str>) -> Self {
        let created_at = session
            .started_at()
            .or_else(|| session.points().first().map(|p| p.captured_at))
            .unwrap_or_default();
        Self {
            title: title.to_string(),
            description: description.map(str::to_string),
            created_at,
            points: session.points().to_vec(),
        }
    }

    /// Track for a stored route. Per-point metadata is used when present,
    /// otherwise the bare geometry stamped with the route's creation time.
    pub fn from_route(route: &Route) -> Self {
        let created_at = route.created_at.unwrap_or_default();
        let points = match &route.metadata {
            Some(meta) if !meta.points.is_empty() => meta
                .points
                .iter()
                .map(|p| TrackPoint {
                    latitude: p.lat,
                    longitude: p.lng,
                    captured_at: p.timestamp,
                    speed_kmh: p.speed_kmh,
                    accuracy_m: None,
                    photo_url: p.photo_url.clone(),
                    note: p.note.clone(),
                })
                .collect(),
            _ => route
                .points
                .coordinates
                .iter()
                .map(|c| TrackPoint::new(c.lat, c.lng, created_at))
                .collect(),
        };
        Self {
            title: route.title.clone(),
            description: route.description.clone(),
            created_at,
            points,
        }
    }
}

/// Builds route records and GPX documents.
pub struct RouteExporter;

impl RouteExporter {
    /// Build the insert payload for a stopped session.
    pub fn build_route(
        session: &TrackingSession,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NewRoute, ExportError> {
        let details = RouteDetails::parse(title, description)?;
        let points = session.points();
        require_points(points)?;

        let metadata = RouteMetadata {
            points: point_metadata(points),
            duration_seconds: session.elapsed_seconds(now),
            average_speed_kmh: session.average_speed_kmh(now),
            max_speed_kmh: session.max_speed_kmh(),
            bounds: None,
        };
        assemble(owner_id, details, points, session.distance_km(), metadata, None)
    }

    /// Build the insert payload for an imported GPX track.
    ///
    /// Duration spans the first to the last point's timestamp.
    pub fn build_imported_route(
        track: &GpxTrack,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
        gpx_url: Option<String>,
    ) -> Result<NewRoute, ExportError> {
        let details = RouteDetails::parse(title, description)?;
        let points = &track.points;
        require_points(points)?;

        let totals = Accumulator::from_points(points);
        let duration_seconds = match (points.first(), points.last()) {
            (Some(first), Some(last)) => {
                ((last.captured_at - first.captured_at).num_milliseconds() as f64 / 1000.0)
                    .max(0.0)
            }
            _ => 0.0,
        };
        let average_speed_kmh = if duration_seconds > 0.0 {
            totals.distance_km() / (duration_seconds / 3600.0)
        } else {
            0.0
        };
        let metadata = RouteMetadata {
            points: point_metadata(points),
            duration_seconds,
            average_speed_kmh,
            max_speed_kmh: totals.max_speed_kmh(),
            bounds: None,
        };
        assemble(owner_id, details, points, totals.distance_km(), metadata, gpx_url)
    }

    /// Serialize a track as a GPX 1.1 document.
    pub fn to_gpx(track: &GpxTrack) -> Result<String, ExportError> {
        let mut w = GpxWriter::new();
        w.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("gpx");
        root.push_attribute(("version", "1.1"));
        root.push_attribute(("creator", GPX_CREATOR));
        root.push_attribute(("xmlns", GPX_NAMESPACE));
        w.event(Event::Start(root))?;

        w.start("metadata")?;
        w.text_element("name", &track.title)?;
        if let Some(desc) = &track.description {
            w.text_element("desc", desc)?;
        }
        w.text_element("time", &format_utc_rfc3339(track.created_at))?;
        w.end("metadata")?;

        // GPX 1.1 orders waypoints before tracks.
        for (index, point) in track.points.iter().enumerate() {
            if !point.has_annotation() {
                continue;
            }
            w.event(Event::Start(coordinate_element("wpt", point)))?;
            w.text_element("name", &format!("Point {}", index + 1))?;
            if let Some(note) = &point.note {
                w.text_element("desc", note)?;
            }
            if let Some(url) = &point.photo_url {
                let mut link = BytesStart::new("link");
                link.push_attribute(("href", url.as_str()));
                w.event(Event::Start(link))?;
                w.text_element("text", "Photo")?;
                w.end("link")?;
            }
            w.end("wpt")?;
        }

        w.start("trk")?;
        w.text_element("name", &track.title)?;
        if let Some(desc) = &track.description {
            w.text_element("desc", desc)?;
        }
        w.start("trkseg")?;
        for point in &track.points {
            w.event(Event::Start(coordinate_element("trkpt", point)))?;
            w.text_element("time", &format_utc_rfc3339(point.captured_at))?;
            if let Some(note) = &point.note {
                w.text_element("cmt", note)?;
            }
            if let Some(speed) = point.speed_kmh {
                w.start("extensions")?;
                w.text_element("speed", &speed.to_string())?;
                w.end("extensions")?;
            }
            w.end("trkpt")?;
        }
        w.end("trkseg")?;
        w.end("trk")?;
        w.end("gpx")?;

        w.finish()
    }

    /// Parse a GPX document into a track.
    ///
    /// Waypoint links and descriptions are attached to the track point at the
    /// same coordinates. Points without a timestamp take the document's
    /// metadata time. Free text (descriptions, comments) is kept verbatim;
    /// names, times and numbers are trimmed.
    pub fn parse_gpx(text: &str) -> Result<GpxTrack, ExportError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut doc = GpxDocument::default();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    doc.open(&name, &e, &path)?;
                    path.push(name);
                }
                Ok(Event::Empty(e)) => {
                    let name = local_name(&e);
                    doc.open(&name, &e, &path)?;
                    doc.close(&name)?;
                }
                Ok(Event::End(_)) => {
                    if let Some(name) = path.pop() {
                        doc.close(&name)?;
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| ExportError::InvalidGpx(e.to_string()))?;
                    doc.text(&path, text.into_owned())?;
                }
                Ok(Event::CData(t)) => {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    doc.text(&path, text)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ExportError::InvalidGpx(format!(
                        "XML error at position {}: {}",
                        reader.error_position(),
                        e
                    )))
                }
            }
        }

        doc.finish()
    }
}

fn require_points(points: &[TrackPoint]) -> Result<(), ExportError> {
    if points.len() < MIN_ROUTE_POINTS {
        return Err(ExportError::InsufficientData {
            required: MIN_ROUTE_POINTS,
            actual: points.len(),
        });
    }
    Ok(())
}

fn point_metadata(points: &[TrackPoint]) -> Vec<PointMetadata> {
    points
        .iter()
        .map(|p| PointMetadata {
            lat: p.latitude,
            lng: p.longitude,
            timestamp: p.captured_at,
            speed_kmh: p.speed_kmh,
            photo_url: p.photo_url.clone(),
            note: p.note.clone(),
        })
        .collect()
}

fn assemble(
    owner_id: &str,
    details: RouteDetails,
    points: &[TrackPoint],
    distance_km: f64,
    mut metadata: RouteMetadata,
    gpx_url: Option<String>,
) -> Result<NewRoute, ExportError> {
    // geo and polyline use (x, y) = (longitude, latitude).
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();
    let encoded_polyline = polyline::encode_coordinates(line.coords().copied(), POLYLINE_PRECISION)
        .map_err(|e| ExportError::Write(format!("Failed to encode polyline: {}", e)))?;
    metadata.bounds = line.bounding_rect().map(|rect| RouteBounds {
        min_lat: rect.min().y,
        min_lng: rect.min().x,
        max_lat: rect.max().y,
        max_lng: rect.max().x,
    });

    Ok(NewRoute {
        user_id: owner_id.to_string(),
        title: details.title,
        description: details.description,
        distance_km,
        points: RouteGeometry {
            coordinates: points
                .iter()
                .map(|p| LatLng {
                    lat: p.latitude,
                    lng: p.longitude,
                })
                .collect(),
        },
        encoded_polyline,
        metadata: Some(metadata),
        gpx_url,
        visibility: Visibility::Private,
        is_published: false,
    })
}

fn coordinate_element(name: &str, point: &TrackPoint) -> BytesStart<'static> {
    let mut element = BytesStart::new(name.to_string());
    element.push_attribute(("lat", point.latitude.to_string().as_str()));
    element.push_attribute(("lon", point.longitude.to_string().as_str()));
    element
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Thin event writer that maps XML errors into `ExportError::Write`.
struct GpxWriter {
    inner: Writer<Vec<u8>>,
}

impl GpxWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), ExportError> {
        self.inner
            .write_event(event)
            .map_err(|e| ExportError::Write(e.to_string()))
    }

    fn start(&mut self, name: &str) -> Result<(), ExportError> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<(), ExportError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), ExportError> {
        self.start(name)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> Result<String, ExportError> {
        String::from_utf8(self.inner.into_inner()).map_err(|e| ExportError::Write(e.to_string()))
    }
}

#[derive(Default)]
struct PendingPoint {
    latitude: f64,
    longitude: f64,
    time: Option<DateTime<Utc>>,
    speed_kmh: Option<f64>,
    note: Option<String>,
}

#[derive(Default)]
struct PendingWaypoint {
    latitude: f64,
    longitude: f64,
    name: Option<String>,
    desc: Option<String>,
    link: Option<String>,
}

/// Accumulates GPX elements while the document is read.
#[derive(Default)]
struct GpxDocument {
    seen_root: bool,
    name: Option<String>,
    description: Option<String>,
    time: Option<DateTime<Utc>>,
    track_name: Option<String>,
    track_description: Option<String>,
    points: Vec<PendingPoint>,
    waypoints: Vec<PendingWaypoint>,
    point: Option<PendingPoint>,
    waypoint: Option<PendingWaypoint>,
}

fn coordinate(e: &BytesStart<'_>, attr: &str) -> Result<f64, ExportError> {
    let raw = e
        .try_get_attribute(attr)
        .map_err(|err| ExportError::InvalidGpx(err.to_string()))?
        .ok_or_else(|| ExportError::InvalidGpx(format!("Missing {} attribute", attr)))?;
    let value = raw
        .unescape_value()
        .map_err(|err| ExportError::InvalidGpx(err.to_string()))?;
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ExportError::InvalidGpx(format!("Invalid {} value: {}", attr, value)))
}

impl GpxDocument {
    fn open(&mut self, name: &str, e: &BytesStart<'_>, path: &[String]) -> Result<(), ExportError> {
        match name {
            "gpx" if path.is_empty() => self.seen_root = true,
            "trkpt" => {
                self.point = Some(PendingPoint {
                    latitude: coordinate(e, "lat")?,
                    longitude: coordinate(e, "lon")?,
                    ..PendingPoint::default()
                });
            }
            "wpt" => {
                self.waypoint = Some(PendingWaypoint {
                    latitude: coordinate(e, "lat")?,
                    longitude: coordinate(e, "lon")?,
                    ..PendingWaypoint::default()
                });
            }
            "link" => {
                if let Some(wpt) = self.waypoint.as_mut() {
                    if let Ok(Some(href)) = e.try_get_attribute("href") {
                        let href = href
                            .unescape_value()
                            .map_err(|err| ExportError::InvalidGpx(err.to_string()))?;
                        wpt.link = Some(href.into_owned());
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), ExportError> {
        match name {
            "trkpt" => {
                if let Some(point) = self.point.take() {
                    self.points.push(point);
                }
            }
            "wpt" => {
                if let Some(wpt) = self.waypoint.take() {
                    self.waypoints.push(wpt);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, path: &[String], text: String) -> Result<(), ExportError> {
        let Some(element) = path.last().map(String::as_str) else {
            return Ok(());
        };
        let parent = path
            .len()
            .checked_sub(2)
            .and_then(|i| path.get(i))
            .map(String::as_str);

        match (parent, element) {
            (Some("metadata"), "name") => self.name = Some(text.trim().to_string()),
            (Some("metadata"), "desc") => self.description = Some(text),
            (Some("metadata"), "time") => self.time = parse_utc_rfc3339(text.trim()),
            (Some("trk"), "name") => self.track_name = Some(text.trim().to_string()),
            (Some("trk"), "desc") => self.track_description = Some(text),
            (Some("trkpt"), "time") => {
                if let Some(p) = self.point.as_mut() {
                    p.time = Some(parse_utc_rfc3339(text.trim()).ok_or_else(|| {
                        ExportError::InvalidGpx(format!("Invalid time: {}", text))
                    })?);
                }
            }
            (Some("trkpt"), "cmt") => {
                if let Some(p) = self.point.as_mut() {
                    p.note = Some(text);
                }
            }
            (Some("extensions"), "speed") => {
                if let Some(p) = self.point.as_mut() {
                    p.speed_kmh = text.trim().parse().ok();
                }
            }
            (Some("wpt"), "name") => {
                if let Some(w) = self.waypoint.as_mut() {
                    w.name = Some(text.trim().to_string());
                }
            }
            (Some("wpt"), "desc") => {
                if let Some(w) = self.waypoint.as_mut() {
                    w.desc = Some(text);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<GpxTrack, ExportError> {
        if !self.seen_root {
            return Err(ExportError::InvalidGpx("Not a GPX document".to_string()));
        }

        let fallback_time = self.time.unwrap_or_default();
        let mut points: Vec<TrackPoint> = self
            .points
            .into_iter()
            .map(|p| TrackPoint {
                latitude: p.latitude,
                longitude: p.longitude,
                captured_at: p.time.unwrap_or(fallback_time),
                speed_kmh: p.speed_kmh,
                accuracy_m: None,
                photo_url: None,
                note: p.note,
            })
            .collect();

        for wpt in self.waypoints {
            let same_place =
                |p: &TrackPoint| p.latitude == wpt.latitude && p.longitude == wpt.longitude;
            let by_name = wpt
                .name
                .as_deref()
                .and_then(|n| n.strip_prefix("Point "))
                .and_then(|n| n.trim().parse::<usize>().ok())
                .and_then(|n| n.checked_sub(1))
                .filter(|&i| points.get(i).is_some_and(same_place));
            let Some(index) = by_name.or_else(|| points.iter().position(same_place)) else {
                tracing::debug!(
                    latitude = wpt.latitude,
                    longitude = wpt.longitude,
                    "Waypoint does not match any track point"
                );
                continue;
            };
            let point = &mut points[index];
            if point.photo_url.is_none() {
                point.photo_url = wpt.link;
            }
            if point.note.is_none() {
                point.note = wpt.desc;
            }
        }

        let created_at = self
            .time
            .or_else(|| points.first().map(|p| p.captured_at))
            .unwrap_or_default();

        Ok(GpxTrack {
            title: self.name.or(self.track_name).unwrap_or_default(),
            description: self.description.or(self.track_description),
            created_at,
            points,
        })
    }
}
