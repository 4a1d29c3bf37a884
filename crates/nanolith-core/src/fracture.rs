//! Fracturing of oversized shapes into fragments that fit the vertex and hole
//! budgets of a pattern generator, and greedy healing of fragments back into
//! larger pieces.
//!
//! Fracturing keeps every shape in an arena and drives a queue of pending
//! arena indices: each pending shape either satisfies its budgets (and is
//! marked done) or is cut in two along an axis-parallel line, its fragments
//! appended to the arena as new pending entries. Output order is arena order.

use std::collections::VecDeque;

use geo::{Area, BooleanOps, Centroid, Intersects, MultiLineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::geometry::{BBox, BasicShape, Line};
use crate::spatial::{SpatialEntry, SpatialIndex};

/// Smallest usable point limit. Axis-parallel cuts cannot reduce a fragment
/// below a closed quadrilateral plus one vertex of the original outline.
pub const MIN_POINT_BUDGET: usize = 6;

/// Tuning knobs of the fracture and heal loops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractureConfig {
    /// Padding added on every side of a shape's bounding box before it is cut,
    /// so the cut boxes never share an edge with the shape.
    pub cut_padding: f64,
    /// Maximum number of cuts spent on one input shape.
    pub max_iterations: usize,
    /// Maximum number of heal passes. `None` runs to a fixed point.
    pub max_heal_passes: Option<usize>,
}

impl Default for FractureConfig {
    fn default() -> Self {
        Self {
            cut_padding: 1.0,
            max_iterations: 100_000,
            max_heal_passes: None,
        }
    }
}

/// Budgets applied to every shape of a cell during export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractureOptions {
    /// Point limit for polygons. `None` disables the limit.
    pub max_points: Option<usize>,
    /// Point limit for lines. `None` disables the limit.
    pub max_points_line: Option<usize>,
    pub max_interior_holes: usize,
    /// Fracture to `max_points / factor` first, then heal. Below 1 skips healing.
    pub over_fracture_factor: f64,
    pub config: FractureConfig,
}

impl FractureOptions {
    /// Reject point limits no fragment can satisfy. `Some(0)` means unlimited.
    pub fn validate(&self) -> Result<(), LayoutError> {
        check_budget(self.max_points)?;
        check_budget(self.max_points_line)
    }
}

impl Default for FractureOptions {
    fn default() -> Self {
        Self {
            max_points: Some(4000),
            max_points_line: Some(4000),
            max_interior_holes: 0,
            over_fracture_factor: 1.0,
            config: FractureConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CutAxis {
    /// Cut along the vertical line `x = value`.
    Vertical(f64),
    /// Cut along the horizontal line `y = value`.
    Horizontal(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Done,
    Split,
}

#[derive(Debug)]
struct Slot {
    shape: BasicShape,
    points: usize,
    state: SlotState,
}

impl Slot {
    fn pending(shape: BasicShape) -> Self {
        Self {
            points: shape.emitted_point_count(),
            shape,
            state: SlotState::Pending,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Fracturer {
    config: FractureConfig,
}

impl Fracturer {
    pub fn new(config: FractureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FractureConfig {
        &self.config
    }

    /// Apply `options` to one shape: over-fracture and heal, or plain fracture.
    pub fn apply(
        &self,
        shape: BasicShape,
        options: &FractureOptions,
    ) -> Result<Vec<BasicShape>, LayoutError> {
        self.fracture_intelligently(
            shape,
            options.max_points,
            options.max_points_line,
            options.over_fracture_factor,
            options.max_interior_holes,
        )
    }

    /// Split `shape` until every fragment has at most the budgeted number of
    /// points for its kind and at most `max_interior_holes` holes.
    pub fn fracture(
        &self,
        shape: BasicShape,
        max_points_poly: Option<usize>,
        max_points_line: Option<usize>,
        max_interior_holes: usize,
    ) -> Result<Vec<BasicShape>, LayoutError> {
        check_budget(max_points_poly)?;
        check_budget(max_points_line)?;
        let (max_points_poly, max_points_line) = (limit(max_points_poly), limit(max_points_line));

        let mut arena = vec![Slot::pending(shape)];
        let mut queue = VecDeque::from([0usize]);
        let mut cuts = 0usize;

        while let Some(index) = queue.pop_front() {
            let slot = &arena[index];
            let budget = match slot.shape {
                BasicShape::Polygon(_) => max_points_poly,
                BasicShape::Line(_) => max_points_line,
            };

            let axis = if slot.shape.hole_count() > max_interior_holes {
                self.hole_cut_axis(&slot.shape)
            } else if budget.is_some_and(|max| slot.points > max) {
                self.midpoint_cut_axis(&slot.shape)
            } else {
                None
            };

            let Some(axis) = axis else {
                arena[index].state = SlotState::Done;
                continue;
            };

            cuts += 1;
            if cuts > self.config.max_iterations {
                return Err(LayoutError::FractureLimit {
                    iterations: self.config.max_iterations,
                });
            }

            let fragments = self.cut(&arena[index].shape, axis);
            arena[index].state = SlotState::Split;
            for fragment in fragments {
                queue.push_back(arena.len());
                arena.push(Slot::pending(fragment));
            }
        }

        log::debug!("Fractured shape with {} cuts into {} slots", cuts, arena.len());

        Ok(arena
            .into_iter()
            .filter(|slot| slot.state == SlotState::Done)
            .map(|slot| slot.shape)
            .collect())
    }

    /// Greedily merge touching polygon fragments while the merged polygon stays
    /// a single polygon within the point and hole budgets. Lines pass through
    /// untouched. Runs until no pair can be merged.
    pub fn heal(
        &self,
        fragments: Vec<BasicShape>,
        max_points: Option<usize>,
        max_interior_holes: usize,
    ) -> Vec<BasicShape> {
        let max_points = limit(max_points);
        let mut slots: Vec<(BasicShape, usize)> = fragments
            .into_iter()
            .map(|s| {
                let points = s.emitted_point_count();
                (s, points)
            })
            .collect();
        let mut passes = 0usize;

        'pass: loop {
            if self.config.max_heal_passes.is_some_and(|cap| passes >= cap) {
                log::debug!("Heal pass limit of {} reached", passes);
                break;
            }
            passes += 1;

            let index = SpatialIndex::build(
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, (s, _))| matches!(s, BasicShape::Polygon(_)))
                    .filter_map(|(i, (s, _))| {
                        s.extent().map(|bbox| SpatialEntry {
                            shape_index: i,
                            bbox,
                        })
                    })
                    .collect(),
            );

            for i in 0..slots.len() {
                let Some(bbox) = slots[i].0.extent() else {
                    continue;
                };
                if !matches!(slots[i].0, BasicShape::Polygon(_)) {
                    continue;
                }
                for j in index.query_intersecting(&bbox) {
                    if j == i {
                        continue;
                    }
                    let Some(merged) = try_merge(&slots[i], &slots[j], max_points, max_interior_holes)
                    else {
                        continue;
                    };
                    let (keep, drop) = (i.min(j), i.max(j));
                    slots.remove(drop);
                    slots[keep] = merged;
                    continue 'pass;
                }
            }
            break;
        }

        slots.into_iter().map(|(shape, _)| shape).collect()
    }

    /// Fracture at `max_points / over_fracture_factor` and heal at
    /// `max_points`, which packs points better than fracturing directly.
    /// A factor below 1 fractures at `max_points` and skips healing.
    pub fn fracture_intelligently(
        &self,
        shape: BasicShape,
        max_points: Option<usize>,
        max_points_line: Option<usize>,
        over_fracture_factor: f64,
        max_interior_holes: usize,
    ) -> Result<Vec<BasicShape>, LayoutError> {
        if over_fracture_factor >= 1.0 {
            check_budget(max_points)?;
            let reduced = limit(max_points).map(|max| {
                ((max as f64 / over_fracture_factor).floor() as usize).max(MIN_POINT_BUDGET)
            });
            let fragments = self.fracture(shape, reduced, max_points_line, max_interior_holes)?;
            Ok(self.heal(fragments, max_points, max_interior_holes))
        } else {
            self.fracture(shape, max_points, max_points_line, max_interior_holes)
        }
    }

    fn hole_cut_axis(&self, shape: &BasicShape) -> Option<CutAxis> {
        let BasicShape::Polygon(polygon) = shape else {
            return None;
        };
        let hole = polygon.interiors().first()?;
        match Polygon::new(hole.clone(), vec![]).centroid() {
            Some(c) => self.axis_through(shape, c.x(), c.y()),
            None => self.midpoint_cut_axis(shape),
        }
    }

    fn midpoint_cut_axis(&self, shape: &BasicShape) -> Option<CutAxis> {
        let center = self.padded_extent(shape)?.center();
        self.axis_through(shape, center.x, center.y)
    }

    /// Cut through `(x, y)` across the longer side of the padded box:
    /// vertically when it is at least as wide as it is tall.
    fn axis_through(&self, shape: &BasicShape, x: f64, y: f64) -> Option<CutAxis> {
        let bbox = self.padded_extent(shape)?;
        if bbox.width() >= bbox.height() {
            Some(CutAxis::Vertical(x))
        } else {
            Some(CutAxis::Horizontal(y))
        }
    }

    fn padded_extent(&self, shape: &BasicShape) -> Option<BBox> {
        shape.extent().map(|b| b.expand(self.config.cut_padding))
    }

    fn cut(&self, shape: &BasicShape, axis: CutAxis) -> Vec<BasicShape> {
        let Some(bbox) = self.padded_extent(shape) else {
            return Vec::new();
        };
        let (lo, hi) = (bbox.min, bbox.max);
        let halves = match axis {
            CutAxis::Vertical(x) => [
                Rect::new((lo.x, lo.y), (x, hi.y)),
                Rect::new((x, lo.y), (hi.x, hi.y)),
            ],
            CutAxis::Horizontal(y) => [
                Rect::new((lo.x, lo.y), (hi.x, y)),
                Rect::new((lo.x, y), (hi.x, hi.y)),
            ],
        };

        let mut fragments = Vec::new();
        for half in halves {
            let half = half.to_polygon();
            match shape {
                BasicShape::Polygon(polygon) => {
                    // Degenerate slivers and collapsed rings carry no area.
                    fragments.extend(
                        polygon
                            .intersection(&half)
                            .into_iter()
                            .filter(|p| p.unsigned_area() > 0.0)
                            .map(BasicShape::Polygon),
                    );
                }
                BasicShape::Line(line) => {
                    let clipped =
                        half.clip(&MultiLineString::new(vec![line.points.clone()]), false);
                    fragments.extend(
                        clipped
                            .into_iter()
                            .filter(|ls| ls.0.len() >= 2)
                            .map(|ls| BasicShape::Line(Line::new(ls, line.width))),
                    );
                }
            }
        }
        fragments
    }
}

/// Union of two fragments if it is acceptable as one healed polygon.
fn try_merge(
    (a, a_points): &(BasicShape, usize),
    (b, b_points): &(BasicShape, usize),
    max_points: Option<usize>,
    max_interior_holes: usize,
) -> Option<(BasicShape, usize)> {
    let (BasicShape::Polygon(a), BasicShape::Polygon(b)) = (a, b) else {
        return None;
    };
    // The union drops at least the two shared vertices, hence the slack of 2.
    if max_points.is_some_and(|max| a_points + b_points >= max.saturating_sub(2)) {
        return None;
    }
    if !a.intersects(b) {
        return None;
    }

    let mut joined: MultiPolygon<f64> = a.union(b);
    if joined.0.len() != 1 {
        return None;
    }
    let merged = BasicShape::Polygon(joined.0.remove(0));
    if merged.hole_count() > max_interior_holes {
        return None;
    }
    let points = merged.emitted_point_count();
    if max_points.is_some_and(|max| points >= max) {
        return None;
    }
    Some((merged, points))
}

/// A point limit of zero disables the limit.
fn limit(budget: Option<usize>) -> Option<usize> {
    budget.filter(|&max| max > 0)
}

fn check_budget(budget: Option<usize>) -> Result<(), LayoutError> {
    match budget {
        Some(max) if max > 0 && max < MIN_POINT_BUDGET => Err(LayoutError::InvalidPointBudget {
            budget: max,
            minimum: MIN_POINT_BUDGET,
        }),
        _ => Ok(()),
    }
}

/// [`Fracturer::fracture`] with the default configuration.
pub fn fracture(
    shape: BasicShape,
    max_points_poly: Option<usize>,
    max_points_line: Option<usize>,
    max_interior_holes: usize,
) -> Result<Vec<BasicShape>, LayoutError> {
    Fracturer::default().fracture(shape, max_points_poly, max_points_line, max_interior_holes)
}

/// [`Fracturer::heal`] with the default configuration.
pub fn heal(
    fragments: Vec<BasicShape>,
    max_points: Option<usize>,
    max_interior_holes: usize,
) -> Vec<BasicShape> {
    Fracturer::default().heal(fragments, max_points, max_interior_holes)
}

/// [`Fracturer::fracture_intelligently`] with the default configuration and
/// hole-free output.
pub fn fracture_intelligently(
    shape: BasicShape,
    max_points: Option<usize>,
    max_points_line: Option<usize>,
    over_fracture_factor: f64,
) -> Result<Vec<BasicShape>, LayoutError> {
    Fracturer::default().fracture_intelligently(
        shape,
        max_points,
        max_points_line,
        over_fracture_factor,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, LineString};

    use crate::normalize::union;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn circle(n: usize, radius: f64) -> Polygon<f64> {
        let ring: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let t = i as f64 / n as f64 * std::f64::consts::TAU;
                (radius * t.cos(), radius * t.sin())
            })
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }

    fn square_ring(x: f64, y: f64, size: f64) -> LineString<f64> {
        Rect::new(Coord { x, y }, Coord { x: x + size, y: y + size })
            .to_polygon()
            .exterior()
            .clone()
    }

    fn area_of(shapes: &[BasicShape]) -> f64 {
        union(shapes).unsigned_area()
    }

    fn assert_same_region(original: &Polygon<f64>, fragments: &[BasicShape]) {
        let rebuilt = union(fragments);
        let lost = MultiPolygon::new(vec![original.clone()]).difference(&rebuilt);
        let gained = rebuilt.difference(original);
        let scale = original.unsigned_area();
        assert!(lost.unsigned_area() < scale * 1e-6, "area lost: {}", lost.unsigned_area());
        assert!(gained.unsigned_area() < scale * 1e-6, "area gained: {}", gained.unsigned_area());
    }

    #[test]
    fn test_small_polygon_is_returned_unchanged() {
        let polygon = circle(64, 10.0);
        let out = fracture_intelligently(
            BasicShape::Polygon(polygon.clone()),
            Some(4000),
            Some(4000),
            1.0,
        )
        .unwrap();
        assert_eq!(out, vec![BasicShape::Polygon(polygon)]);
    }

    #[test]
    fn test_large_polygon_fractures_within_budget() {
        init_logging();
        let polygon = circle(5000, 100.0);
        let out = fracture_intelligently(
            BasicShape::Polygon(polygon.clone()),
            Some(4000),
            Some(4000),
            1.0,
        )
        .unwrap();

        assert!(out.len() >= 2);
        for fragment in &out {
            assert!(fragment.point_count() <= 4000);
            assert_eq!(fragment.hole_count(), 0);
        }
        assert_same_region(&polygon, &out);
    }

    #[test]
    fn test_fracture_respects_small_budgets() {
        init_logging();
        let polygon = circle(400, 50.0);
        let out = fracture(BasicShape::Polygon(polygon.clone()), Some(30), Some(30), 0).unwrap();
        assert!(out.len() > 10);
        assert!(out.iter().all(|s| s.point_count() <= 30));
        assert_same_region(&polygon, &out);
    }

    #[test]
    fn test_two_holes_split_to_one_hole_each() {
        let polygon = Polygon::new(
            square_ring(0.0, 0.0, 100.0),
            vec![square_ring(20.0, 20.0, 10.0), square_ring(70.0, 70.0, 10.0)],
        );
        let out = fracture(BasicShape::Polygon(polygon.clone()), Some(4000), Some(4000), 1).unwrap();
        assert!(out.len() >= 2);
        assert!(out.iter().all(|s| s.hole_count() <= 1));
        assert_same_region(&polygon, &out);

        let hole_free = fracture(BasicShape::Polygon(polygon.clone()), None, None, 0).unwrap();
        assert!(hole_free.iter().all(|s| s.hole_count() == 0));
        assert!((area_of(&hole_free) - (10_000.0 - 200.0)).abs() < 1e-3);
    }

    #[test]
    fn test_heal_reaches_fixed_point() {
        let polygon = circle(600, 40.0);
        let fragments = fracture(BasicShape::Polygon(polygon.clone()), Some(50), None, 0).unwrap();
        let once = heal(fragments, Some(200), 0);
        let twice = heal(once.clone(), Some(200), 0);
        assert_eq!(once, twice);
        assert!(once.iter().all(|s| s.point_count() < 200));
        assert_same_region(&polygon, &once);
    }

    #[test]
    fn test_heal_merges_touching_squares() {
        let left = Polygon::new(square_ring(0.0, 0.0, 1.0), vec![]);
        let right = Polygon::new(square_ring(1.0, 0.0, 1.0), vec![]);
        let far = Polygon::new(square_ring(5.0, 0.0, 1.0), vec![]);
        let out = heal(
            vec![
                BasicShape::Polygon(left),
                BasicShape::Polygon(far),
                BasicShape::Polygon(right),
            ],
            None,
            0,
        );
        assert_eq!(out.len(), 2);
        assert!((area_of(&out) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_over_fracture_below_one_skips_healing() {
        let polygon = circle(200, 10.0);
        let plain = fracture(BasicShape::Polygon(polygon.clone()), Some(60), None, 0).unwrap();
        let zero = fracture_intelligently(BasicShape::Polygon(polygon), Some(60), None, 0.0).unwrap();
        assert_eq!(plain, zero);
    }

    #[test]
    fn test_long_line_is_split_into_chained_pieces() {
        let points: Vec<(f64, f64)> = (0..1000).map(|i| (i as f64, (i % 7) as f64)).collect();
        let line = Line::new(LineString::from(points), Some(0.5));
        let out = fracture(BasicShape::Line(line), None, Some(100), 0).unwrap();
        assert!(out.len() >= 10);
        for piece in &out {
            let BasicShape::Line(l) = piece else {
                panic!("polygon produced from a line");
            };
            assert!(l.points.0.len() <= 100);
            assert_eq!(l.width, Some(0.5));
        }
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let fracturer = Fracturer::new(FractureConfig {
            max_iterations: 2,
            ..FractureConfig::default()
        });
        let err = fracturer
            .fracture(BasicShape::Polygon(circle(1000, 10.0)), Some(10), None, 0)
            .unwrap_err();
        assert!(matches!(err, LayoutError::FractureLimit { iterations: 2 }));
    }

    #[test]
    fn test_zero_point_limit_means_unlimited() {
        let square = BasicShape::Polygon(Polygon::new(square_ring(0.0, 0.0, 1.0), vec![]));
        let out = fracture(square.clone(), Some(0), Some(0), 0).unwrap();
        assert_eq!(out, vec![square.clone()]);

        let big = BasicShape::Polygon(circle(500, 10.0));
        let out = fracture_intelligently(big.clone(), Some(0), Some(0), 1.0).unwrap();
        assert_eq!(out, vec![big]);
    }

    #[test]
    fn test_unworkable_point_limit_is_rejected() {
        let square = BasicShape::Polygon(Polygon::new(square_ring(0.0, 0.0, 1.0), vec![]));
        let err = fracture(square.clone(), Some(3), None, 0).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::InvalidPointBudget { budget: 3, minimum: MIN_POINT_BUDGET }
        ));
        assert!(fracture(square, None, Some(5), 0).is_err());

        let options = FractureOptions {
            max_points_line: Some(1),
            ..FractureOptions::default()
        };
        assert!(options.validate().is_err());
        assert!(FractureOptions::default().validate().is_ok());
    }

    #[test]
    fn test_large_over_fracture_factor_keeps_a_workable_budget() {
        init_logging();
        let polygon = circle(64, 10.0);
        let out = fracture_intelligently(
            BasicShape::Polygon(polygon.clone()),
            Some(200),
            None,
            1000.0,
        )
        .unwrap();
        assert!(out.iter().all(|s| s.point_count() < 200));
        assert_same_region(&polygon, &out);
    }

    #[test]
    fn test_one_hole_budget_counts_keyhole_bridge() {
        let polygon = Polygon::new(
            circle(100, 50.0).exterior().clone(),
            vec![circle(50, 10.0).exterior().clone()],
        );
        let shape = BasicShape::Polygon(polygon.clone());
        let budget = shape.point_count();

        let out = fracture(shape.clone(), Some(budget), None, 1).unwrap();
        assert!(out.len() >= 2);
        assert!(out.iter().all(|s| s.emitted_point_count() <= budget));
        assert_same_region(&polygon, &out);

        let healed = heal(out, Some(budget), 1);
        assert!(healed.iter().all(|s| s.emitted_point_count() <= budget));

        let fits = fracture(shape.clone(), Some(budget + 2), None, 1).unwrap();
        assert_eq!(fits, vec![shape]);
    }
}
