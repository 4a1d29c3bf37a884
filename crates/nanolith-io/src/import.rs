//! Reuse of patterns from existing GDS-II files as placeable parts.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::{BoundingRect, Coord, LineString, MapCoords, MultiPolygon, Polygon};

use nanolith_core::{BBox, Geometry, Point, Realize, Transform};

use crate::gds::{GdsElement, GdsError, GdsLibrary, GdsReader};

/// Boundaries of one structure, flattened through all of its references.
///
/// Paths are not imported. The flattened polygons are computed once at
/// construction, so realizing the part is a clone.
#[derive(Debug, Clone)]
pub struct GdsImport {
    cell_name: String,
    polygons: MultiPolygon<f64>,
}

impl GdsImport {
    /// Import `cell_name` (or the first top structure for `None`), keeping
    /// only boundaries on `layer` / `datatype` when given.
    pub fn from_library(
        library: &GdsLibrary,
        cell_name: Option<&str>,
        layer: Option<u16>,
        datatype: Option<u16>,
    ) -> Result<Self, GdsError> {
        let name = match cell_name {
            Some(name) => name.to_string(),
            None => library
                .top_structures()
                .first()
                .map(|s| s.name.clone())
                .ok_or_else(|| GdsError::UndefinedCell("<top>".into()))?,
        };

        let filter = ElementFilter { layer, datatype };
        let mut stack = Vec::new();
        let polygons = flatten(library, &name, &filter, &mut stack)?;
        log::info!(
            "Imported {} polygons from structure '{}'",
            polygons.len(),
            name
        );

        Ok(Self {
            cell_name: name,
            polygons: MultiPolygon::new(polygons),
        })
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        cell_name: Option<&str>,
        layer: Option<u16>,
        datatype: Option<u16>,
    ) -> Result<Self, GdsError> {
        let file = BufReader::new(File::open(path)?);
        let library = GdsReader::new(file).read()?;
        Self::from_library(&library, cell_name, layer, datatype)
    }

    pub fn cell_name(&self) -> &str {
        &self.cell_name
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }
}

impl Realize for GdsImport {
    fn realize(&self) -> Geometry {
        Geometry::MultiPolygon(self.polygons.clone())
    }

    fn bounds(&self) -> Option<BBox> {
        self.polygons.bounding_rect().map(BBox::from_rect)
    }
}

struct ElementFilter {
    layer: Option<u16>,
    datatype: Option<u16>,
}

impl ElementFilter {
    fn accepts(&self, element: &GdsElement) -> bool {
        self.layer.map_or(true, |l| l == element.layer())
            && self.datatype.map_or(true, |d| d == element.datatype())
    }
}

fn flatten(
    library: &GdsLibrary,
    name: &str,
    filter: &ElementFilter,
    stack: &mut Vec<String>,
) -> Result<Vec<Polygon<f64>>, GdsError> {
    if stack.iter().any(|s| s == name) {
        return Err(GdsError::InvalidRecord {
            offset: 0,
            message: format!("Structure '{}' references itself", name),
        });
    }
    let structure = library
        .structure(name)
        .ok_or_else(|| GdsError::UndefinedCell(name.to_string()))?;

    let mut polygons: Vec<Polygon<f64>> = structure
        .elements
        .iter()
        .filter(|e| filter.accepts(e))
        .filter_map(|e| match e {
            GdsElement::Boundary { points, .. } if points.len() >= 3 => {
                Some(Polygon::new(LineString::from(points.clone()), vec![]))
            }
            _ => None,
        })
        .collect();

    stack.push(name.to_string());
    for reference in &structure.references {
        let children = flatten(library, &reference.name, filter, stack)?;
        if children.is_empty() {
            continue;
        }
        let transform = Transform {
            offset: Point::from(reference.origin),
            rotation: reference.angle.unwrap_or(0.0),
            mirror_x: reference.x_reflection,
            scale: reference.magnification.unwrap_or(1.0),
        };
        let (sx, sy) = reference.spacing.unwrap_or((0.0, 0.0));
        for row in 0..reference.rows {
            for column in 0..reference.columns {
                let (dx, dy) = (column as f64 * sx, row as f64 * sy);
                polygons.extend(children.iter().map(|p| {
                    p.map_coords(move |c| {
                        let q = transform.apply(&c.into());
                        Coord {
                            x: q.x + dx,
                            y: q.y + dy,
                        }
                    })
                }));
            }
        }
    }
    stack.pop();

    Ok(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use geo::{Area, Rect};
    use nanolith_core::Cell;

    use crate::gds::GdsWriter;
    use crate::options::{ExportOptions, Timestamp};

    fn library_of(top: &Cell) -> GdsLibrary {
        let options = ExportOptions {
            timestamp: Some(Timestamp::from_unix(0)),
            ..Default::default()
        };
        let mut writer = GdsWriter::with_options(Vec::new(), options);
        writer.write(top).unwrap();
        let bytes = writer.into_inner();
        GdsReader::new(bytes.as_slice()).read().unwrap()
    }

    fn unit_square() -> Polygon<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }).to_polygon()
    }

    #[test]
    fn test_import_flattens_references() {
        let mut unit = Cell::new("unit");
        unit.add_to_layer(1u16, unit_square());
        unit.add_to_layer(2u16, unit_square());
        let unit = Arc::new(unit);

        let mut top = Cell::new("top");
        top.add_cell(unit.clone(), (10.0, 0.0), Some(90.0));
        top.add_cell_array(unit, (0.0, 20.0), 2, 2, (3.0, 3.0)).unwrap();

        let library = library_of(&top);
        let all = GdsImport::from_library(&library, None, None, None).unwrap();
        assert_eq!(all.cell_name(), "top");
        assert_eq!(all.polygons().0.len(), 10);

        let layer_one = GdsImport::from_library(&library, Some("top"), Some(1), None).unwrap();
        assert_eq!(layer_one.polygons().0.len(), 5);
        assert!((layer_one.polygons().unsigned_area() - 5.0).abs() < 1e-9);

        let bounds = layer_one.bounds().unwrap();
        assert!((bounds.min.x - 0.0).abs() < 1e-9);
        assert!((bounds.max.x - 10.0).abs() < 1e-9);
        assert!((bounds.max.y - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_imported_part_can_be_placed() {
        let mut source = Cell::new("pattern");
        source.add_to_layer(4u16, unit_square());
        let library = library_of(&source);

        let part = Arc::new(GdsImport::from_library(&library, Some("pattern"), None, None).unwrap());
        let mut cell = Cell::new("host");
        cell.add_to_layer(7u16, part);
        assert_eq!(cell.bounds().unwrap().to_tuple(), (0.0, 0.0, 1.0, 1.0));

        assert!(matches!(
            GdsImport::from_library(&library, Some("missing"), None, None),
            Err(GdsError::UndefinedCell(_))
        ));
    }
}
