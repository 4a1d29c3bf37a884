//! Reduction of nested geometry values to flat sequences of basic shapes.

use geo::{BooleanOps, MultiPolygon};
use thiserror::Error;

use crate::geometry::{BasicShape, Geometry, Line};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Geometry of kind '{kind}' cannot be converted to a basic shape")]
    NotSupported { kind: &'static str },
}

/// What to do with geometry kinds that have no basic-shape form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsupportedPolicy {
    /// Warn and drop the item. Used by export.
    #[default]
    Skip,
    /// Fail with [`GeometryError::NotSupported`].
    Strict,
}

/// Flatten `geometry` into basic shapes, in traversal order. Empty shapes are dropped.
pub fn normalize(
    geometry: &Geometry,
    policy: UnsupportedPolicy,
) -> Result<Vec<BasicShape>, GeometryError> {
    let mut out = Vec::new();
    normalize_into(geometry, policy, &mut out)?;
    Ok(out)
}

fn normalize_into(
    geometry: &Geometry,
    policy: UnsupportedPolicy,
    out: &mut Vec<BasicShape>,
) -> Result<(), GeometryError> {
    match geometry {
        Geometry::Polygon(p) => push_nonempty(out, BasicShape::Polygon(p.clone())),
        Geometry::MultiPolygon(mp) => {
            for p in mp {
                push_nonempty(out, BasicShape::Polygon(p.clone()));
            }
        }
        Geometry::Line(l) => push_nonempty(out, BasicShape::Line(l.clone())),
        Geometry::MultiLine { lines, width } => {
            for ls in lines {
                push_nonempty(out, BasicShape::Line(Line::new(ls.clone(), *width)));
            }
        }
        Geometry::Collection(items) => {
            for item in items {
                normalize_into(item, policy, out)?;
            }
        }
        Geometry::Part(part) => normalize_into(&part.realize(), policy, out)?,
        Geometry::Point(_) => {
            let kind = geometry.kind();
            match policy {
                UnsupportedPolicy::Skip => {
                    log::warn!("Geometry of kind '{}' not convertible, skipping", kind);
                }
                UnsupportedPolicy::Strict => return Err(GeometryError::NotSupported { kind }),
            }
        }
    }
    Ok(())
}

fn push_nonempty(out: &mut Vec<BasicShape>, shape: BasicShape) {
    if !shape.is_empty() {
        out.push(shape);
    }
}

/// Planar union of the polygonal shapes in `shapes`. Lines carry no area and
/// do not contribute.
pub fn union(shapes: &[BasicShape]) -> MultiPolygon<f64> {
    let mut polygons = shapes.iter().filter_map(|s| match s {
        BasicShape::Polygon(p) => Some(p),
        BasicShape::Line(_) => None,
    });

    let Some(first) = polygons.next() else {
        return MultiPolygon::new(Vec::new());
    };
    let mut acc = MultiPolygon::new(vec![first.clone()]);
    for p in polygons {
        acc = acc.union(&MultiPolygon::new(vec![p.clone()]));
    }
    acc
}

/// Normalize every geometry (skipping unsupported kinds) and union the result.
pub fn geometric_union(geometries: &[Geometry]) -> MultiPolygon<f64> {
    let shapes: Vec<BasicShape> = geometries
        .iter()
        .flat_map(|g| normalize(g, UnsupportedPolicy::Skip).unwrap_or_default())
        .collect();
    union(&shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Coord, LineString, Rect};
    use std::sync::Arc;

    use crate::geometry::Realize;

    fn square(x: f64, y: f64, size: f64) -> geo::Polygon<f64> {
        Rect::new(Coord { x, y }, Coord { x: x + size, y: y + size }).to_polygon()
    }

    #[derive(Debug)]
    struct TwoSquares;

    impl Realize for TwoSquares {
        fn realize(&self) -> Geometry {
            Geometry::MultiPolygon(MultiPolygon::new(vec![
                square(0.0, 0.0, 1.0),
                square(5.0, 0.0, 1.0),
            ]))
        }
    }

    #[test]
    fn test_nested_collections_flatten_in_order() {
        let geometry = Geometry::Collection(vec![
            Geometry::Polygon(square(0.0, 0.0, 1.0)),
            Geometry::Collection(vec![
                Geometry::Line(Line::new(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]), None)),
                Geometry::Part(Arc::new(TwoSquares)),
            ]),
        ]);
        let shapes = normalize(&geometry, UnsupportedPolicy::Strict).unwrap();
        assert_eq!(shapes.len(), 4);
        assert!(matches!(shapes[1], BasicShape::Line(_)));
        assert_eq!(shapes[3].extent().unwrap().min.x, 5.0);
    }

    #[test]
    fn test_points_are_skipped_or_rejected() {
        let geometry = Geometry::Collection(vec![
            Geometry::Point(Coord { x: 1.0, y: 1.0 }),
            Geometry::Polygon(square(0.0, 0.0, 1.0)),
        ]);
        assert_eq!(normalize(&geometry, UnsupportedPolicy::Skip).unwrap().len(), 1);
        assert_eq!(
            normalize(&geometry, UnsupportedPolicy::Strict),
            Err(GeometryError::NotSupported { kind: "point" })
        );
    }

    #[test]
    fn test_union_is_order_independent() {
        let shapes = vec![
            BasicShape::Polygon(square(0.0, 0.0, 2.0)),
            BasicShape::Polygon(square(1.0, 1.0, 2.0)),
            BasicShape::Polygon(square(10.0, 10.0, 1.0)),
        ];
        let mut reversed = shapes.clone();
        reversed.reverse();

        let a = union(&shapes);
        let b = union(&reversed);
        assert!((a.unsigned_area() - 8.0).abs() < 1e-9);
        assert!((b.unsigned_area() - a.unsigned_area()).abs() < 1e-9);
        assert_eq!(a.0.len(), 2);
        assert_eq!(b.0.len(), 2);
        assert!(union(&[]).0.is_empty());
    }

    #[test]
    fn test_geometric_union_skips_unsupported_kinds() {
        let geometries = vec![
            Geometry::Point(Coord { x: 50.0, y: 50.0 }),
            Geometry::Polygon(square(0.0, 0.0, 2.0)),
            Geometry::Part(Arc::new(TwoSquares)),
            Geometry::Line(Line::new(LineString::from(vec![(0.0, 9.0), (9.0, 9.0)]), Some(1.0))),
        ];
        let merged = geometric_union(&geometries);
        // the unit square at the origin lies inside the 2x2 one
        assert_eq!(merged.0.len(), 2);
        assert!((merged.unsigned_area() - 5.0).abs() < 1e-9);
        assert!(geometric_union(&[]).0.is_empty());
    }
}
