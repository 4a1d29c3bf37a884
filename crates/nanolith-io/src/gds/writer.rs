//! Serialization of a cell tree into a GDS-II stream.

use std::io::Write;

use geo::orient::Direction;
use geo::{Coord, Orient, Polygon};

use nanolith_core::{
    BasicShape, Cell, CellInstance, DatatypePolicy, FractureOptions, LayerId, LayoutError, Library,
};

use super::record::{quantize, record_type, RecordSink, GDS_VERSION, STRANS_REFLECTION};
use super::GdsError;
use crate::coordinator::{self, RealizationCache};
use crate::options::{ExportOptions, Timestamp};

/// Everything a worker needs to turn one cell into its structure block.
#[derive(Debug, Clone, PartialEq)]
pub struct CellExportParams {
    pub grid_steps_per_unit: f64,
    pub fracture: FractureOptions,
    pub datatype_policy: DatatypePolicy,
    pub timestamp: Timestamp,
}

impl CellExportParams {
    /// Whether two parameter sets produce the same structure body. The
    /// timestamp only affects the BGNSTR record.
    pub fn same_body(&self, other: &CellExportParams) -> bool {
        self.grid_steps_per_unit == other.grid_steps_per_unit
            && self.fracture == other.fracture
            && self.datatype_policy == other.datatype_policy
    }
}

/// Encode one cell as a complete structure block, BGNSTR through ENDSTR.
pub fn encode_cell(cell: &Cell, params: &CellExportParams) -> Result<Vec<u8>, GdsError> {
    let body = encode_cell_body(cell, params)?;
    Ok(frame_structure(&body, &params.timestamp))
}

/// Prefix a structure body with its BGNSTR record.
pub(crate) fn frame_structure(body: &[u8], timestamp: &Timestamp) -> Vec<u8> {
    let mut block = Vec::with_capacity(body.len() + 28);
    block.extend_from_slice(&28u16.to_be_bytes());
    block.extend_from_slice(&record_type::BGNSTR.to_be_bytes());
    for v in timestamp.record_fields() {
        block.extend_from_slice(&v.to_be_bytes());
    }
    block.extend_from_slice(body);
    block
}

/// Encode everything of a structure block after BGNSTR.
pub(crate) fn encode_cell_body(cell: &Cell, params: &CellExportParams) -> Result<Vec<u8>, GdsError> {
    let mut sink = RecordSink::new(Vec::new());
    sink.string(record_type::STRNAME, cell.name())?;

    let grid = params.grid_steps_per_unit;
    let layers = cell.get_fractured_layers(&params.fracture)?;
    for (layer, shapes) in &layers {
        let gds_layer = layer.layer();
        let datatype = layer.datatype(params.datatype_policy);

        for shape in shapes {
            match shape {
                BasicShape::Polygon(polygon) => {
                    let ring = boundary_ring(cell, *layer, polygon)?;
                    sink.empty(record_type::BOUNDARY)?;
                    sink.u16s(record_type::LAYER, &[gds_layer])?;
                    sink.u16s(record_type::DATATYPE, &[datatype])?;
                    sink.xy(&quantize_all(&ring, grid)?)?;
                }
                BasicShape::Line(line) => {
                    sink.empty(record_type::PATH)?;
                    sink.u16s(record_type::LAYER, &[gds_layer])?;
                    sink.u16s(record_type::DATATYPE, &[datatype])?;
                    if let Some(width) = line.width {
                        sink.i32s(record_type::WIDTH, &[quantize(width, grid)?])?;
                    }
                    sink.xy(&quantize_all(&line.points.0, grid)?)?;
                }
            }
            sink.empty(record_type::ENDEL)?;
        }
    }

    for inst in cell.children() {
        encode_reference(&mut sink, inst, grid)?;
    }

    sink.empty(record_type::ENDSTR)?;
    Ok(sink.into_inner())
}

fn quantize_all(coords: &[Coord<f64>], grid: f64) -> Result<Vec<[i32; 2]>, GdsError> {
    coords
        .iter()
        .map(|c| Ok([quantize(c.x, grid)?, quantize(c.y, grid)?]))
        .collect()
}

/// The closed outline written for a polygon. A single hole is joined to the
/// exterior through a zero-width bridge.
fn boundary_ring(cell: &Cell, layer: LayerId, polygon: &Polygon<f64>) -> Result<Vec<Coord<f64>>, GdsError> {
    match polygon.interiors().len() {
        0 => Ok(polygon.exterior().0.clone()),
        1 => Ok(keyhole(polygon).unwrap_or_else(|| {
            log::warn!(
                "Hole of polygon on layer {} in cell '{}' has no exterior edge to its left, dropping it",
                layer,
                cell.name()
            );
            polygon.exterior().0.clone()
        })),
        holes => Err(LayoutError::TooManyHoles {
            cell: cell.name().to_string(),
            layer,
            holes,
        }
        .into()),
    }
}

/// Join the first hole to the exterior along a leftward horizontal ray from
/// the hole's leftmost vertex.
fn keyhole(polygon: &Polygon<f64>) -> Option<Vec<Coord<f64>>> {
    // exterior counter-clockwise, hole clockwise
    let polygon = polygon.orient(Direction::Default);
    let exterior = &polygon.exterior().0;
    let hole = &polygon.interiors().first()?.0;
    let n = hole.len().checked_sub(1).filter(|n| *n >= 3)?;

    let (start, anchor) = hole[..n]
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.x.total_cmp(&b.1.x))?;

    // Closest exterior edge crossing the ray.
    let mut hit: Option<(usize, f64)> = None;
    for (i, edge) in exterior.windows(2).enumerate() {
        let (a, b) = (edge[0], edge[1]);
        if (a.y > anchor.y) == (b.y > anchor.y) {
            continue;
        }
        let x = a.x + (anchor.y - a.y) * (b.x - a.x) / (b.y - a.y);
        if x <= anchor.x && hit.map_or(true, |(_, best)| x > best) {
            hit = Some((i, x));
        }
    }
    let (edge, x) = hit?;
    let bridge = Coord { x, y: anchor.y };

    let mut ring = Vec::with_capacity(exterior.len() + n + 3);
    ring.extend_from_slice(&exterior[..=edge]);
    ring.push(bridge);
    ring.extend((0..=n).map(|k| hole[(start + k) % n]));
    ring.push(bridge);
    ring.extend_from_slice(&exterior[edge + 1..]);
    Some(ring)
}

fn encode_reference<W: Write>(
    sink: &mut RecordSink<W>,
    inst: &CellInstance,
    grid: f64,
) -> Result<(), GdsError> {
    inst.validate()?;
    let is_array = inst.is_array();

    sink.empty(if is_array { record_type::AREF } else { record_type::SREF })?;
    sink.string(record_type::SNAME, inst.cell.name())?;

    let angle = inst
        .angle
        .map(|a| a.rem_euclid(360.0))
        .filter(|a| *a != 0.0);
    let magnification = inst.magnification.filter(|m| *m != 1.0);
    if inst.x_reflection || angle.is_some() || magnification.is_some() {
        let bits = if inst.x_reflection { STRANS_REFLECTION } else { 0 };
        sink.u16s(record_type::STRANS, &[bits])?;
        if let Some(m) = magnification {
            sink.real8s(record_type::MAG, &[m])?;
        }
        if let Some(a) = angle {
            sink.real8s(record_type::ANGLE, &[a])?;
        }
    }

    let (ox, oy) = (inst.origin.x, inst.origin.y);
    let origin = [quantize(ox, grid)?, quantize(oy, grid)?];
    if is_array {
        sink.i16s(record_type::COLROW, &[inst.columns as i16, inst.rows as i16])?;
        let (sx, sy) = inst.spacing.unwrap_or((0.0, 0.0));
        let x_edge = [quantize(ox + sx * inst.columns as f64, grid)?, origin[1]];
        let y_edge = [origin[0], quantize(oy + sy * inst.rows as f64, grid)?];
        sink.xy(&[origin, x_edge, y_edge])?;
    } else {
        sink.xy(&[origin])?;
    }

    sink.empty(record_type::ENDEL)
}

// ── GDS-II Writer ─────────────────────────────────────────────────────

/// Writes a whole library, rooted at one top cell, to a byte sink.
///
/// Every structure block is encoded before the first byte reaches the sink,
/// so a failing export leaves the sink untouched.
pub struct GdsWriter<W: Write> {
    sink: RecordSink<W>,
    options: ExportOptions,
}

impl<W: Write> GdsWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, ExportOptions::default())
    }

    pub fn with_options(writer: W, options: ExportOptions) -> Self {
        Self {
            sink: RecordSink::new(writer),
            options,
        }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Write the library rooted at `top` as a GDS-II stream.
    pub fn write(&mut self, top: &Cell) -> Result<(), GdsError> {
        self.write_library(top, None)
    }

    /// Like [`GdsWriter::write`], reusing structure bodies from `cache` for
    /// cells that have not changed since they were last encoded.
    pub fn write_cached(&mut self, top: &Cell, cache: &RealizationCache) -> Result<(), GdsError> {
        self.write_library(top, Some(cache))
    }

    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }

    fn write_library(&mut self, top: &Cell, cache: Option<&RealizationCache>) -> Result<(), GdsError> {
        self.options.validate()?;
        let library = Library::from_root(&self.options.library_name, top)?;
        let params = self.options.cell_params();
        let blocks = coordinator::encode_cells(
            library.cells(),
            &params,
            self.options.execution(),
            cache,
        )?;

        self.write_header(&library.name, &params.timestamp)?;
        for block in &blocks {
            self.sink.raw(block)?;
        }
        self.sink.empty(record_type::ENDLIB)?;
        self.sink.get_mut().flush()?;

        log::info!(
            "Wrote library '{}': {} cells, {} bytes of structure data",
            library.name,
            blocks.len(),
            blocks.iter().map(Vec::len).sum::<usize>()
        );
        Ok(())
    }

    fn write_header(&mut self, name: &str, timestamp: &Timestamp) -> Result<(), GdsError> {
        self.sink.i16s(record_type::HEADER, &[GDS_VERSION])?;
        self.sink.i16s(record_type::BGNLIB, &timestamp.record_fields())?;
        self.sink.string(record_type::LIBNAME, name)?;

        // user units per database unit, metres per database unit
        let grid = self.options.grid_steps_per_unit;
        self.sink
            .real8s(record_type::UNITS, &[1.0 / grid, self.options.unit / grid])
    }
}
