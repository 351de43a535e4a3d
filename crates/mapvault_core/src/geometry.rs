//! Feature geometries and their validation.
//!
//! Geometries are plain `geo` types. A geometry is accepted into a table only
//! if it has the table's geometry type, every coordinate is finite, it is not
//! degenerate, and its bounding box lies within the table extent enlarged by
//! the store's tolerance.

use crate::error::{CoreError, CoreResult};
use geo::{Area, BoundingRect, Coord, LineString, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of geometry a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    /// Single point.
    Point,
    /// Polyline.
    Line,
    /// Polygon with an exterior ring and optional holes.
    Polygon,
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Polygon => "polygon",
        };
        f.write_str(name)
    }
}

/// The shape of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    /// A point.
    Point(Point<f64>),
    /// A polyline.
    Line(LineString<f64>),
    /// A polygon.
    Polygon(Polygon<f64>),
}

impl Geometry {
    /// Convenience constructor for a point.
    #[must_use]
    pub fn point(x: f64, y: f64) -> Self {
        Self::Point(Point::new(x, y))
    }

    /// Returns the geometry type.
    #[must_use]
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Self::Point(_) => GeometryType::Point,
            Self::Line(_) => GeometryType::Line,
            Self::Polygon(_) => GeometryType::Polygon,
        }
    }

    /// Returns the bounding box, or `None` for an empty line or polygon.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Point(p) => Some(p.bounding_rect()),
            Self::Line(l) => l.bounding_rect(),
            Self::Polygon(p) => p.bounding_rect(),
        }
    }

    /// Checks that the geometry is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for non-finite coordinates, lines
    /// with fewer than two distinct vertices, and polygons whose exterior is
    /// open, has fewer than three distinct vertices, or encloses no area.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::Point(p) => check_finite(std::iter::once(p.0)),
            Self::Line(line) => {
                check_finite(line.coords().copied())?;
                if distinct_vertices(&line.0) < 2 {
                    return Err(CoreError::validation(
                        "line needs at least two distinct vertices",
                    ));
                }
                Ok(())
            }
            Self::Polygon(polygon) => {
                let exterior = polygon.exterior();
                check_finite(exterior.coords().copied())?;
                for ring in polygon.interiors() {
                    check_finite(ring.coords().copied())?;
                }
                if !exterior.is_closed() || exterior.0.is_empty() {
                    return Err(CoreError::validation("polygon ring is not closed"));
                }
                let open_ring = &exterior.0[..exterior.0.len() - 1];
                if distinct_vertices(open_ring) < 3 {
                    return Err(CoreError::validation(
                        "polygon needs at least three distinct vertices",
                    ));
                }
                if polygon.unsigned_area() <= 0.0 {
                    return Err(CoreError::validation("polygon has zero area"));
                }
                Ok(())
            }
        }
    }

    /// Checks that the geometry lies within `extent` grown by `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if any part of the geometry falls
    /// outside.
    pub fn check_within(&self, extent: &Rect<f64>, tolerance: f64) -> CoreResult<()> {
        let bounds = self
            .bounding_rect()
            .ok_or_else(|| CoreError::validation("geometry is empty"))?;
        let min = extent.min();
        let max = extent.max();
        let inside = bounds.min().x >= min.x - tolerance
            && bounds.min().y >= min.y - tolerance
            && bounds.max().x <= max.x + tolerance
            && bounds.max().y <= max.y + tolerance;
        if inside {
            Ok(())
        } else {
            Err(CoreError::validation(format!(
                "geometry {:?} lies outside the table extent {:?}",
                (bounds.min().x_y(), bounds.max().x_y()),
                (min.x_y(), max.x_y())
            )))
        }
    }
}

fn check_finite(mut coords: impl Iterator<Item = Coord<f64>>) -> CoreResult<()> {
    if coords.all(|c| c.x.is_finite() && c.y.is_finite()) {
        Ok(())
    } else {
        Err(CoreError::validation("geometry has a non-finite coordinate"))
    }
}

fn distinct_vertices(coords: &[Coord<f64>]) -> usize {
    let mut seen: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for c in coords {
        if !seen.contains(c) {
            seen.push(*c);
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, line_string, polygon};

    fn extent() -> Rect<f64> {
        Rect::new(coord! { x: -10.0, y: -10.0 }, coord! { x: 10.0, y: 10.0 })
    }

    #[test]
    fn points_must_be_finite() {
        assert!(Geometry::point(1.0, 2.0).validate().is_ok());
        assert!(matches!(
            Geometry::point(f64::NAN, 2.0).validate(),
            Err(CoreError::Validation { .. })
        ));
        assert!(Geometry::point(f64::INFINITY, 0.0).validate().is_err());
    }

    #[test]
    fn lines_need_two_distinct_vertices() {
        let good = Geometry::Line(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        assert!(good.validate().is_ok());

        let collapsed = Geometry::Line(line_string![(x: 3.0, y: 3.0), (x: 3.0, y: 3.0)]);
        assert!(collapsed.validate().is_err());

        let empty = Geometry::Line(LineString::new(vec![]));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn polygons_need_area() {
        let square = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]);
        assert!(square.validate().is_ok());

        let flat = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
        ]);
        assert!(matches!(flat.validate(), Err(CoreError::Validation { .. })));

        let two_points = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]);
        assert!(two_points.validate().is_err());
    }

    #[test]
    fn extent_check_honours_tolerance() {
        let near_edge = Geometry::point(10.4, 0.0);
        assert!(near_edge.check_within(&extent(), 0.0).is_err());
        assert!(near_edge.check_within(&extent(), 0.5).is_ok());

        let line = Geometry::Line(line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 25.0)]);
        assert!(line.check_within(&extent(), 1.0).is_err());
    }

    #[test]
    fn geometry_types() {
        assert_eq!(Geometry::point(0.0, 0.0).geometry_type(), GeometryType::Point);
        assert_eq!(GeometryType::Polygon.to_string(), "polygon");
    }
}
