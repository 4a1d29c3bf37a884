use std::fmt;
use std::sync::Arc;

use geo::{BoundingRect, Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

/// A 2D point in user units (micrometres unless the export says otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

impl From<Coord<f64>> for Point {
    fn from(c: Coord<f64>) -> Self {
        Self::new(c.x, c.y)
    }
}

impl From<Point> for Coord<f64> {
    fn from(p: Point) -> Self {
        Coord { x: p.x, y: p.y }
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    pub fn from_rect(rect: geo::Rect<f64>) -> Self {
        Self::new(rect.min().into(), rect.max().into())
    }

    /// Union of an arbitrary number of boxes, `None` when there are none.
    pub fn union_all<I: IntoIterator<Item = BBox>>(boxes: I) -> Option<Self> {
        boxes.into_iter().reduce(|acc, b| acc.union(&b))
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Grow the box by `padding` on every side.
    pub fn expand(&self, padding: f64) -> Self {
        Self {
            min: self.min.translate(-padding, -padding),
            max: self.max.translate(padding, padding),
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }

    /// `(min_x, min_y, max_x, max_y)`
    pub fn to_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min.x, self.min.y, self.max.x, self.max.y)
    }
}

/// An open point chain, exported as a path when it carries a width.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub points: LineString<f64>,
    pub width: Option<f64>,
}

impl Line {
    pub fn new(points: impl Into<LineString<f64>>, width: Option<f64>) -> Self {
        Self {
            points: points.into(),
            width,
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        let half_w = self.width.unwrap_or(0.0) / 2.0;
        self.points
            .bounding_rect()
            .map(|r| BBox::from_rect(r).expand(half_w))
    }
}

/// A geometry producer outside the core, e.g. a parametric device generator
/// or an imported pattern.
pub trait Realize: fmt::Debug + Send + Sync {
    /// Produce the geometry this value stands for.
    fn realize(&self) -> Geometry;

    /// Bounds of the realized geometry, `None` when it is empty.
    fn bounds(&self) -> Option<BBox> {
        self.realize().bounds()
    }
}

/// Any geometry value that can be placed on a layer.
#[derive(Debug, Clone)]
pub enum Geometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
    Line(Line),
    MultiLine {
        lines: MultiLineString<f64>,
        width: Option<f64>,
    },
    /// Points have no representation in the stream format.
    Point(Coord<f64>),
    Collection(Vec<Geometry>),
    Part(Arc<dyn Realize>),
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Polygon(_) => "polygon",
            Geometry::MultiPolygon(_) => "multipolygon",
            Geometry::Line(_) => "line",
            Geometry::MultiLine { .. } => "multiline",
            Geometry::Point(_) => "point",
            Geometry::Collection(_) => "collection",
            Geometry::Part(_) => "part",
        }
    }

    pub fn bounds(&self) -> Option<BBox> {
        match self {
            Geometry::Polygon(p) => p.bounding_rect().map(BBox::from_rect),
            Geometry::MultiPolygon(mp) => mp.bounding_rect().map(BBox::from_rect),
            Geometry::Line(l) => l.bbox(),
            Geometry::MultiLine { lines, width } => BBox::union_all(
                lines
                    .iter()
                    .filter_map(|ls| Line::new(ls.clone(), *width).bbox()),
            ),
            Geometry::Point(c) => Some(BBox::new((*c).into(), (*c).into())),
            Geometry::Collection(items) => BBox::union_all(items.iter().filter_map(|g| g.bounds())),
            Geometry::Part(part) => part.bounds(),
        }
    }
}

impl From<Polygon<f64>> for Geometry {
    fn from(p: Polygon<f64>) -> Self {
        Geometry::Polygon(p)
    }
}

impl From<MultiPolygon<f64>> for Geometry {
    fn from(mp: MultiPolygon<f64>) -> Self {
        Geometry::MultiPolygon(mp)
    }
}

impl From<Line> for Geometry {
    fn from(l: Line) -> Self {
        Geometry::Line(l)
    }
}

impl From<Vec<Geometry>> for Geometry {
    fn from(items: Vec<Geometry>) -> Self {
        Geometry::Collection(items)
    }
}

impl<R: Realize + 'static> From<Arc<R>> for Geometry {
    fn from(part: Arc<R>) -> Self {
        Geometry::Part(part)
    }
}

/// The minimal unit the codec can emit: a polygon with at most one hole
/// (after fracturing) or a line.
#[derive(Debug, Clone, PartialEq)]
pub enum BasicShape {
    Polygon(Polygon<f64>),
    Line(Line),
}

impl BasicShape {
    /// Number of stored coordinates, closing points of rings included.
    pub fn point_count(&self) -> usize {
        match self {
            BasicShape::Polygon(p) => {
                p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>()
            }
            BasicShape::Line(l) => l.points.0.len(),
        }
    }

    /// Points of the outline as it is written to a stream record. A polygon
    /// with one hole is keyholed, which visits the bridge point twice.
    pub fn emitted_point_count(&self) -> usize {
        match self {
            BasicShape::Polygon(p) if p.interiors().len() == 1 => self.point_count() + 2,
            _ => self.point_count(),
        }
    }

    pub fn hole_count(&self) -> usize {
        match self {
            BasicShape::Polygon(p) => p.interiors().len(),
            BasicShape::Line(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            BasicShape::Polygon(p) => p.exterior().0.is_empty(),
            BasicShape::Line(l) => l.points.0.len() < 2,
        }
    }

    /// Bounding box of the coordinates alone, ignoring line width.
    pub fn extent(&self) -> Option<BBox> {
        match self {
            BasicShape::Polygon(p) => p.bounding_rect().map(BBox::from_rect),
            BasicShape::Line(l) => l.points.bounding_rect().map(BBox::from_rect),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        match self {
            BasicShape::Polygon(_) => self.extent(),
            BasicShape::Line(l) => l.bbox(),
        }
    }
}
