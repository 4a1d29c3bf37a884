use std::sync::{Arc, OnceLock};

use geo::{Coord, MapCoords, MultiPolygon};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::LayoutError;
use crate::fracture::{FractureOptions, Fracturer};
use crate::geometry::{BBox, BasicShape, Geometry, Point};
use crate::layer::LayerId;
use crate::normalize::{geometric_union, normalize, union, UnsupportedPolicy};

/// Unique cell identifier. Stable for the lifetime of a cell object.
pub type CellId = Uuid;

/// A transformation for placing subcell instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Translation offset.
    pub offset: Point,
    /// Counter-clockwise rotation in degrees.
    pub rotation: f64,
    /// Mirror about X axis, applied before rotation.
    pub mirror_x: bool,
    /// Uniform magnification.
    pub scale: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            offset: Point::new(0.0, 0.0),
            rotation: 0.0,
            mirror_x: false,
            scale: 1.0,
        }
    }
}

impl Transform {
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            offset: Point::new(x, y),
            ..Default::default()
        }
    }

    pub fn apply(&self, point: &Point) -> Point {
        let mut p = *point;

        if self.mirror_x {
            p.y = -p.y;
        }

        p.x *= self.scale;
        p.y *= self.scale;

        let rad = self.rotation.to_radians();
        let cos_r = rad.cos();
        let sin_r = rad.sin();
        let rx = p.x * cos_r - p.y * sin_r;
        let ry = p.x * sin_r + p.y * cos_r;

        Point::new(rx + self.offset.x, ry + self.offset.y)
    }
}

/// A placement of a child cell: one copy, or a `columns` x `rows` grid of
/// copies stepped by `spacing`.
#[derive(Debug, Clone)]
pub struct CellInstance {
    pub cell: Arc<Cell>,
    pub origin: Point,
    /// Rotation in degrees, `None` for no rotation.
    pub angle: Option<f64>,
    pub magnification: Option<f64>,
    pub x_reflection: bool,
    pub columns: u32,
    pub rows: u32,
    pub spacing: Option<(f64, f64)>,
}

impl CellInstance {
    pub fn new(cell: Arc<Cell>, origin: impl Into<Point>) -> Self {
        Self {
            cell,
            origin: origin.into(),
            angle: None,
            magnification: None,
            x_reflection: false,
            columns: 1,
            rows: 1,
            spacing: None,
        }
    }

    pub fn with_angle(mut self, degrees: f64) -> Self {
        self.angle = Some(degrees);
        self
    }

    pub fn with_magnification(mut self, magnification: f64) -> Self {
        self.magnification = Some(magnification);
        self
    }

    pub fn with_x_reflection(mut self) -> Self {
        self.x_reflection = true;
        self
    }

    pub fn with_array(mut self, columns: u32, rows: u32, spacing: (f64, f64)) -> Self {
        self.columns = columns;
        self.rows = rows;
        self.spacing = Some(spacing);
        self
    }

    /// Whether this instance is written as an array reference.
    pub fn is_array(&self) -> bool {
        !(self.columns == 1 && self.rows == 1 && self.spacing.is_none())
    }

    pub fn transform(&self) -> Transform {
        Transform {
            offset: self.origin,
            rotation: self.angle.unwrap_or(0.0),
            mirror_x: self.x_reflection,
            scale: self.magnification.unwrap_or(1.0),
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let invalid = |reason: String| {
            Err(LayoutError::InvalidArray {
                cell: self.cell.name().to_string(),
                reason,
            })
        };
        if self.columns == 0 || self.rows == 0 {
            return invalid(format!("{} columns x {} rows", self.columns, self.rows));
        }
        let limit = i16::MAX as u32;
        if self.columns > limit || self.rows > limit {
            return invalid(format!("more than {} columns or rows", limit));
        }
        if (self.columns > 1 || self.rows > 1) && self.spacing.is_none() {
            return invalid("spacing is required for more than one placement".into());
        }
        Ok(())
    }

    /// Offsets of every placement in the grid, row-major.
    pub fn grid_offsets(&self) -> Vec<(f64, f64)> {
        let (sx, sy) = self.spacing.unwrap_or((0.0, 0.0));
        (0..self.rows)
            .flat_map(|j| (0..self.columns).map(move |i| (i as f64 * sx, j as f64 * sy)))
            .collect()
    }

    /// Bounds of all placements, given the child's bounds in its own frame.
    pub fn transform_bounds(&self, bbox: &BBox) -> Option<BBox> {
        let t = self.transform();
        let corners: Vec<Point> = bbox.corners().iter().map(|c| t.apply(c)).collect();
        let placed = BBox::from_points(&corners)?;

        let (sx, sy) = self.spacing.unwrap_or((0.0, 0.0));
        let last_x = (self.columns.max(1) - 1) as f64 * sx;
        let last_y = (self.rows.max(1) - 1) as f64 * sy;
        BBox::union_all(
            [(0.0, 0.0), (last_x, 0.0), (0.0, last_y), (last_x, last_y)]
                .into_iter()
                .map(|(dx, dy)| BBox::new(placed.min.translate(dx, dy), placed.max.translate(dx, dy))),
        )
    }
}

/// Positioned auxiliary record attached to a cell, e.g. data for a
/// direct-laser-writing step that must line up with the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxRecord {
    pub origin: Point,
    pub data: Value,
}

/// Auxiliary records by kind, then by id.
pub type AuxTable = IndexMap<String, IndexMap<String, AuxRecord>>;

/// A layout cell containing per-layer geometry and subcell references.
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    name: String,
    layers: IndexMap<LayerId, Vec<Geometry>>,
    children: Vec<CellInstance>,
    desc: Map<String, Value>,
    aux_data: AuxTable,
    /// Bumped on every mutation; keys caches of derived forms.
    revision: u64,
    /// Bounds of this cell's own geometry. Children are never cached here.
    bounds_cache: OnceLock<Option<BBox>>,
}

impl Cell {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            layers: IndexMap::new(),
            children: Vec::new(),
            desc: Map::new(),
            aux_data: AuxTable::new(),
            revision: 0,
            bounds_cache: OnceLock::new(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn layers(&self) -> &IndexMap<LayerId, Vec<Geometry>> {
        &self.layers
    }

    pub fn children(&self) -> &[CellInstance] {
        &self.children
    }

    // ── Construction ─────────────────────────────────────────────────

    pub fn add_to_layer(&mut self, layer: impl Into<LayerId>, geometry: impl Into<Geometry>) {
        self.layers
            .entry(layer.into())
            .or_default()
            .push(geometry.into());
        self.bounds_cache = OnceLock::new();
        self.revision += 1;
    }

    /// Place a single copy of `cell` at `origin`, rotated by `angle` degrees.
    pub fn add_cell(&mut self, cell: Arc<Cell>, origin: impl Into<Point>, angle: Option<f64>) {
        let mut instance = CellInstance::new(cell, origin);
        instance.angle = angle;
        self.push_instance(instance);
    }

    pub fn add_cell_array(
        &mut self,
        cell: Arc<Cell>,
        origin: impl Into<Point>,
        columns: u32,
        rows: u32,
        spacing: (f64, f64),
    ) -> Result<(), LayoutError> {
        self.add_instance(CellInstance::new(cell, origin).with_array(columns, rows, spacing))
    }

    pub fn add_instance(&mut self, instance: CellInstance) -> Result<(), LayoutError> {
        instance.validate()?;
        self.push_instance(instance);
        Ok(())
    }

    fn push_instance(&mut self, instance: CellInstance) {
        if self
            .children
            .iter()
            .any(|c| c.cell.name() == instance.cell.name())
        {
            log::warn!(
                "Cell name \"{}\" added multiple times to {}, its description entries will collide",
                instance.cell.name(),
                self.name
            );
        }
        self.children.push(instance);
        self.revision += 1;
    }

    // ── Bounds ───────────────────────────────────────────────────────

    /// Outer bounding box of the cell and all its children, `None` if empty.
    pub fn bounds(&self) -> Option<BBox> {
        self.get_bounds(None)
    }

    /// Bounding box restricted to `layers`, or over all layers for `None`.
    pub fn get_bounds(&self, layers: Option<&[LayerId]>) -> Option<BBox> {
        let own = match layers {
            None => *self.bounds_cache.get_or_init(|| self.local_bounds(None)),
            Some(filter) => self.local_bounds(Some(filter)),
        };
        let children = self.children.iter().filter_map(|inst| {
            inst.cell
                .get_bounds(layers)
                .and_then(|b| inst.transform_bounds(&b))
        });
        BBox::union_all(own.into_iter().chain(children))
    }

    fn local_bounds(&self, layers: Option<&[LayerId]>) -> Option<BBox> {
        BBox::union_all(
            self.layers
                .iter()
                .filter(|(id, _)| layers.map_or(true, |f| f.contains(id)))
                .flat_map(|(_, geometries)| geometries.iter().filter_map(|g| g.bounds())),
        )
    }

    /// Width and height of [`Cell::bounds`], zero for an empty cell.
    pub fn size(&self) -> (f64, f64) {
        self.bounds()
            .map_or((0.0, 0.0), |b| (b.width(), b.height()))
    }

    // ── Export views ─────────────────────────────────────────────────

    /// Every layer's geometry reduced to basic shapes that satisfy the
    /// budgets in `options`. Unsupported geometry is skipped with a warning.
    pub fn get_fractured_layers(
        &self,
        options: &FractureOptions,
    ) -> Result<IndexMap<LayerId, Vec<BasicShape>>, LayoutError> {
        let fracturer = Fracturer::new(options.config);
        let mut out = IndexMap::with_capacity(self.layers.len());

        for (layer, geometries) in &self.layers {
            let mut fragments = Vec::new();
            for geometry in geometries {
                for shape in normalize(geometry, UnsupportedPolicy::Skip)? {
                    fragments.extend(fracturer.apply(shape, options)?);
                }
            }
            log::debug!(
                "Cell '{}' layer {}: {} items -> {} shapes",
                self.name,
                layer,
                geometries.len(),
                fragments.len()
            );
            out.insert(*layer, fragments);
        }

        Ok(out)
    }

    /// Union of everything on `layer`, including all placed children, in
    /// this cell's frame.
    pub fn reduced_layer(&self, layer: LayerId) -> MultiPolygon<f64> {
        let own = self
            .layers
            .get(&layer)
            .map(|geometries| geometric_union(geometries))
            .unwrap_or_else(|| MultiPolygon::new(Vec::new()));
        let mut shapes: Vec<BasicShape> = own.into_iter().map(BasicShape::Polygon).collect();

        for inst in &self.children {
            let child = inst.cell.reduced_layer(layer);
            if child.0.is_empty() {
                continue;
            }
            let t = inst.transform();
            for (dx, dy) in inst.grid_offsets() {
                shapes.extend(child.iter().map(|p| {
                    BasicShape::Polygon(p.map_coords(move |c| {
                        let q = t.apply(&c.into());
                        Coord {
                            x: q.x + dx,
                            y: q.y + dy,
                        }
                    }))
                }));
            }
        }

        union(&shapes)
    }

    // ── Sidecar data ─────────────────────────────────────────────────

    /// Attach free-form JSON to the description document.
    pub fn add_to_desc(&mut self, key: &str, data: Value) {
        self.desc.insert(key.to_string(), data);
    }

    /// Register an auxiliary record. Ids must be unique per kind.
    pub fn add_aux_data(
        &mut self,
        kind: &str,
        id: &str,
        origin: impl Into<Point>,
        data: Value,
    ) -> Result<(), LayoutError> {
        let table = self.aux_data.entry(kind.to_string()).or_default();
        if table.contains_key(id) {
            return Err(LayoutError::DuplicateAuxId {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        table.insert(
            id.to_string(),
            AuxRecord {
                origin: origin.into(),
                data,
            },
        );
        self.revision += 1;
        Ok(())
    }

    /// Auxiliary records of this cell and all children. Child ids are
    /// prefixed with the child's name and their origins shifted by the
    /// instance origin.
    pub fn get_aux_data(&self) -> AuxTable {
        let mut merged = self.aux_data.clone();
        for inst in &self.children {
            for (kind, entries) in inst.cell.get_aux_data() {
                let table = merged.entry(kind).or_default();
                for (id, mut record) in entries {
                    record.origin = record.origin.translate(inst.origin.x, inst.origin.y);
                    table.insert(format!("{}.{}", inst.cell.name(), id), record);
                }
            }
        }
        merged
    }

    /// Nested description document: this cell's entries plus one entry per
    /// child with its placement.
    pub fn get_desc(&self) -> Value {
        let cells: Map<String, Value> = self
            .children
            .iter()
            .map(|inst| {
                let mut entry = Map::new();
                entry.insert("offset".into(), json!([inst.origin.x, inst.origin.y]));
                entry.insert("angle".into(), json!(inst.angle.unwrap_or(0.0)));
                if let Value::Object(child) = inst.cell.get_desc() {
                    entry.extend(child);
                }
                (inst.cell.name().to_string(), Value::Object(entry))
            })
            .collect();

        json!({
            "desc": self.desc,
            "aux": self.aux_data,
            "cells": cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Coord, LineString, Polygon, Rect};

    use crate::geometry::Line;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }).to_polygon()
    }

    #[test]
    fn test_cell_bbox() {
        let mut cell = Cell::new("test_cell");
        cell.add_to_layer(1u16, rect(0.0, 0.0, 100.0, 50.0));
        cell.add_to_layer(2u16, rect(50.0, 25.0, 200.0, 75.0));
        let bb = cell.bounds().unwrap();
        assert_eq!(bb.to_tuple(), (0.0, 0.0, 200.0, 75.0));
        assert_eq!(cell.size(), (200.0, 75.0));

        let only_first = cell.get_bounds(Some(&[LayerId::Layer(1)])).unwrap();
        assert_eq!(only_first.to_tuple(), (0.0, 0.0, 100.0, 50.0));
    }

    #[test]
    fn test_bounds_cache_invalidated_by_geometry_only() {
        let mut cell = Cell::new("top");
        assert!(cell.bounds_cache.get().is_none());
        cell.add_to_layer(1u16, rect(0.0, 0.0, 1.0, 1.0));
        assert!(cell.bounds().is_some());
        assert!(cell.bounds_cache.get().is_some());

        let mut child = Cell::new("child");
        child.add_to_layer(1u16, rect(0.0, 0.0, 1.0, 1.0));
        cell.add_cell(Arc::new(child), (10.0, 10.0), None);
        assert!(cell.bounds_cache.get().is_some());
        assert_eq!(cell.bounds().unwrap().to_tuple(), (0.0, 0.0, 11.0, 11.0));

        cell.add_to_layer(1u16, rect(-5.0, 0.0, 1.0, 1.0));
        assert!(cell.bounds_cache.get().is_none());
        assert_eq!(cell.bounds().unwrap().min.x, -5.0);
    }

    #[test]
    fn test_transform_translate() {
        let t = Transform::translate(10.0, 20.0);
        let result = t.apply(&Point::new(5.0, 5.0));
        assert!((result.x - 15.0).abs() < 1e-10);
        assert!((result.y - 25.0).abs() < 1e-10);
    }

    #[test]
    fn test_rotated_child_bounds() {
        let mut child = Cell::new("child");
        child.add_to_layer(1u16, rect(0.0, 0.0, 10.0, 2.0));
        let mut top = Cell::new("top");
        top.add_cell(Arc::new(child), (10.0, 10.0), Some(90.0));
        let bb = top.bounds().unwrap();
        assert!((bb.min.x - 8.0).abs() < 1e-9);
        assert!((bb.max.x - 10.0).abs() < 1e-9);
        assert!((bb.min.y - 10.0).abs() < 1e-9);
        assert!((bb.max.y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_array_bounds_and_validation() {
        let mut child = Cell::new("pad");
        child.add_to_layer(1u16, rect(0.0, 0.0, 1.0, 1.0));
        let child = Arc::new(child);

        let mut top = Cell::new("top");
        top.add_cell_array(child.clone(), (0.0, 0.0), 3, 2, (5.0, 10.0)).unwrap();
        assert_eq!(top.bounds().unwrap().to_tuple(), (0.0, 0.0, 11.0, 11.0));
        assert!(top.children()[0].is_array());

        let err = top
            .add_instance(CellInstance {
                columns: 4,
                spacing: None,
                ..CellInstance::new(child.clone(), (0.0, 0.0))
            })
            .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidArray { .. }));
        assert!(top.add_cell_array(child, (0.0, 0.0), 0, 1, (1.0, 1.0)).is_err());
        assert_eq!(top.children().len(), 1);
    }

    #[test]
    fn test_fractured_layers_keep_layer_order_and_skip_points() {
        let mut cell = Cell::new("c");
        cell.add_to_layer(5u16, rect(0.0, 0.0, 1.0, 1.0));
        cell.add_to_layer(
            (1u16, 2u16),
            Geometry::Collection(vec![
                Geometry::Point(Coord { x: 0.0, y: 0.0 }),
                Geometry::Line(Line::new(LineString::from(vec![(0.0, 0.0), (3.0, 0.0)]), Some(1.0))),
            ]),
        );
        let layers = cell.get_fractured_layers(&FractureOptions::default()).unwrap();
        let keys: Vec<LayerId> = layers.keys().copied().collect();
        assert_eq!(keys, vec![LayerId::Layer(5), LayerId::WithDatatype(1, 2)]);
        assert_eq!(layers[&LayerId::WithDatatype(1, 2)].len(), 1);
    }

    #[test]
    fn test_reduced_layer_includes_arrayed_children() {
        let mut child = Cell::new("unit");
        child.add_to_layer(1u16, rect(0.0, 0.0, 1.0, 1.0));
        let mut top = Cell::new("top");
        top.add_to_layer(1u16, rect(-1.0, 0.0, 0.0, 1.0));
        top.add_cell_array(Arc::new(child), (0.0, 0.0), 4, 1, (1.0, 0.0)).unwrap();

        let reduced = top.reduced_layer(LayerId::Layer(1));
        assert_eq!(reduced.0.len(), 1);
        assert!((reduced.unsigned_area() - 5.0).abs() < 1e-9);
        assert!(top.reduced_layer(LayerId::Layer(2)).0.is_empty());
    }

    #[test]
    fn test_aux_data_ids_are_unique_and_merged() {
        let mut child = Cell::new("child");
        child
            .add_aux_data("marker", "A", (1.0, 2.0), json!({"size": 3}))
            .unwrap();
        let err = child
            .add_aux_data("marker", "A", (0.0, 0.0), Value::Null)
            .unwrap_err();
        assert!(matches!(err, LayoutError::DuplicateAuxId { .. }));

        let mut top = Cell::new("top");
        top.add_aux_data("marker", "A", (0.0, 0.0), Value::Null).unwrap();
        top.add_cell(Arc::new(child), (10.0, 10.0), None);

        let aux = top.get_aux_data();
        let markers = &aux["marker"];
        assert_eq!(markers.len(), 2);
        assert_eq!(markers["child.A"].origin, Point::new(11.0, 12.0));
    }

    #[test]
    fn test_desc_nests_children() {
        let mut child = Cell::new("child");
        child.add_to_desc("gap", json!(0.25));
        let mut top = Cell::new("top");
        top.add_to_desc("sweep", json!([1, 2, 3]));
        top.add_cell(Arc::new(child), (1.0, 2.0), Some(45.0));

        let desc = top.get_desc();
        assert_eq!(desc["desc"]["sweep"], json!([1, 2, 3]));
        assert_eq!(desc["cells"]["child"]["offset"], json!([1.0, 2.0]));
        assert_eq!(desc["cells"]["child"]["angle"], json!(45.0));
        assert_eq!(desc["cells"]["child"]["desc"]["gap"], json!(0.25));
    }
}
