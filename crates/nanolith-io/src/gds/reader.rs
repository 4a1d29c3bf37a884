//! GDS-II stream parser.
//!
//! Reads a stream into a [`GdsLibrary`]: named structures holding
//! boundaries, paths and (array) references, with coordinates already scaled
//! to user units. TEXT and NODE elements are skipped, BOX elements are read
//! as boundaries.

use std::io::{self, Read};

use geo::Coord;
use indexmap::IndexMap;

use super::record::{decode_real8, record_type, STRANS_REFLECTION};
use super::GdsError;

// ── Parsed model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum GdsElement {
    /// Closed outline; the first point is repeated at the end.
    Boundary {
        layer: u16,
        datatype: u16,
        points: Vec<Coord<f64>>,
    },
    Path {
        layer: u16,
        datatype: u16,
        width: Option<f64>,
        points: Vec<Coord<f64>>,
    },
}

impl GdsElement {
    pub fn layer(&self) -> u16 {
        match self {
            GdsElement::Boundary { layer, .. } | GdsElement::Path { layer, .. } => *layer,
        }
    }

    pub fn datatype(&self) -> u16 {
        match self {
            GdsElement::Boundary { datatype, .. } | GdsElement::Path { datatype, .. } => *datatype,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GdsReference {
    pub name: String,
    pub origin: Coord<f64>,
    /// Rotation in degrees.
    pub angle: Option<f64>,
    pub magnification: Option<f64>,
    pub x_reflection: bool,
    pub columns: u32,
    pub rows: u32,
    /// Step between placements of an array reference.
    pub spacing: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GdsStructure {
    pub name: String,
    pub elements: Vec<GdsElement>,
    pub references: Vec<GdsReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GdsLibrary {
    pub name: String,
    pub user_units_per_db_unit: f64,
    pub meters_per_db_unit: f64,
    /// Structures in stream order.
    pub structures: IndexMap<String, GdsStructure>,
}

impl GdsLibrary {
    pub fn structure(&self, name: &str) -> Option<&GdsStructure> {
        self.structures.get(name)
    }

    /// Structures no other structure references, in stream order.
    pub fn top_structures(&self) -> Vec<&GdsStructure> {
        self.structures
            .values()
            .filter(|s| {
                !self
                    .structures
                    .values()
                    .any(|other| other.references.iter().any(|r| r.name == s.name))
            })
            .collect()
    }
}

// ── GDS-II Record ─────────────────────────────────────────────────────

#[derive(Debug)]
struct GdsRecord {
    record_type: u16,
    data: Vec<u8>,
}

impl GdsRecord {
    fn as_i16_vec(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect()
    }

    fn first_u16(&self) -> Option<u16> {
        self.data.get(..2).map(|c| u16::from_be_bytes([c[0], c[1]]))
    }

    fn as_i32_vec(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn as_string(&self) -> String {
        let s: String = self.data.iter().map(|&b| b as char).collect();
        s.trim_end_matches('\0').to_string()
    }

    fn as_f64_vec(&self) -> Vec<f64> {
        self.data
            .chunks_exact(8)
            .map(|c| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(c);
                decode_real8(bytes)
            })
            .collect()
    }
}

/// Sub-records collected between an element record and its ENDEL.
#[derive(Debug, Default)]
struct ElementRecords {
    layer: u16,
    datatype: u16,
    width: Option<i32>,
    xy: Vec<i32>,
    sname: String,
    strans: u16,
    mag: Option<f64>,
    angle: Option<f64>,
    colrow: Option<(i16, i16)>,
}

// ── GDS-II Reader ─────────────────────────────────────────────────────

pub struct GdsReader<R: Read> {
    reader: R,
    offset: u64,
    user_units_per_db_unit: f64,
}

impl<R: Read> GdsReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            user_units_per_db_unit: 0.001, // 1 nm grid in micrometre user units
        }
    }

    /// Read the entire GDS-II stream.
    pub fn read(&mut self) -> Result<GdsLibrary, GdsError> {
        self.read_header()?;

        let mut library = GdsLibrary {
            name: String::new(),
            user_units_per_db_unit: self.user_units_per_db_unit,
            meters_per_db_unit: 1e-9,
            structures: IndexMap::new(),
        };

        loop {
            let rec = self.expect_record()?;
            match rec.record_type {
                record_type::BGNLIB => {}
                record_type::LIBNAME => {
                    library.name = rec.as_string();
                    log::info!("Library name: {}", library.name);
                }
                record_type::UNITS => {
                    let units = rec.as_f64_vec();
                    if units.len() >= 2 {
                        self.user_units_per_db_unit = units[0];
                        library.user_units_per_db_unit = units[0];
                        library.meters_per_db_unit = units[1];
                        log::info!(
                            "Database unit: {} user units, {} m",
                            units[0],
                            units[1]
                        );
                    }
                }
                record_type::BGNSTR => {
                    let structure = self.read_structure()?;
                    library.structures.insert(structure.name.clone(), structure);
                }
                record_type::ENDLIB => {
                    log::info!("End of library. {} cells read.", library.structures.len());
                    break;
                }
                _ => {}
            }
        }

        for structure in library.structures.values() {
            if let Some(missing) = structure
                .references
                .iter()
                .find(|r| !library.structures.contains_key(&r.name))
            {
                return Err(GdsError::UndefinedCell(missing.name.clone()));
            }
        }

        Ok(library)
    }

    fn read_record(&mut self) -> Result<Option<GdsRecord>, GdsError> {
        let mut len_buf = [0u8; 2];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(GdsError::Io(e)),
        }

        let total_len = u16::from_be_bytes(len_buf) as usize;
        if total_len < 4 {
            return Err(GdsError::InvalidRecord {
                offset: self.offset,
                message: format!("Record length {} is too small", total_len),
            });
        }

        let mut type_buf = [0u8; 2];
        self.reader.read_exact(&mut type_buf)?;
        let record_type = u16::from_be_bytes(type_buf);

        let mut data = vec![0u8; total_len - 4];
        self.reader.read_exact(&mut data)?;
        self.offset += total_len as u64;

        Ok(Some(GdsRecord { record_type, data }))
    }

    fn expect_record(&mut self) -> Result<GdsRecord, GdsError> {
        self.read_record()?.ok_or_else(|| GdsError::InvalidRecord {
            offset: self.offset,
            message: "Stream ended inside a library".into(),
        })
    }

    fn read_header(&mut self) -> Result<(), GdsError> {
        let rec = self.read_record()?.ok_or(GdsError::InvalidRecord {
            offset: 0,
            message: "Empty file".into(),
        })?;

        if rec.record_type != record_type::HEADER {
            return Err(GdsError::UnexpectedRecord {
                record_type: rec.record_type,
                expected: record_type::HEADER,
            });
        }

        if let Some(version) = rec.as_i16_vec().first() {
            log::info!("GDS-II version: {}", version);
        }
        Ok(())
    }

    fn read_structure(&mut self) -> Result<GdsStructure, GdsError> {
        let mut structure = GdsStructure::default();

        loop {
            let rec = self.expect_record()?;
            match rec.record_type {
                record_type::STRNAME => {
                    structure.name = rec.as_string();
                    log::debug!("Reading cell: {}", structure.name);
                }
                record_type::BOUNDARY | record_type::BOX => {
                    let r = self.read_element()?;
                    structure.elements.push(GdsElement::Boundary {
                        layer: r.layer,
                        datatype: r.datatype,
                        points: self.to_coords(&r.xy),
                    });
                }
                record_type::PATH => {
                    let r = self.read_element()?;
                    structure.elements.push(GdsElement::Path {
                        layer: r.layer,
                        datatype: r.datatype,
                        width: r.width.map(|w| w.unsigned_abs() as f64 * self.user_units_per_db_unit),
                        points: self.to_coords(&r.xy),
                    });
                }
                record_type::SREF | record_type::AREF => {
                    let r = self.read_element()?;
                    structure.references.push(self.to_reference(r)?);
                }
                record_type::TEXT | record_type::NODE => {
                    self.read_element()?;
                }
                record_type::ENDSTR => break,
                _ => {}
            }
        }

        Ok(structure)
    }

    fn read_element(&mut self) -> Result<ElementRecords, GdsError> {
        let mut r = ElementRecords::default();
        loop {
            let rec = self.expect_record()?;
            match rec.record_type {
                record_type::LAYER => r.layer = rec.first_u16().unwrap_or(0),
                record_type::DATATYPE | record_type::BOXTYPE | record_type::TEXTTYPE => r.datatype = rec.first_u16().unwrap_or(0),
                record_type::WIDTH => r.width = rec.as_i32_vec().first().copied(),
                record_type::XY => r.xy.extend(rec.as_i32_vec()),
                record_type::SNAME => r.sname = rec.as_string(),
                record_type::STRANS => r.strans = rec.first_u16().unwrap_or(0),
                record_type::MAG => r.mag = rec.as_f64_vec().first().copied(),
                record_type::ANGLE => r.angle = rec.as_f64_vec().first().copied(),
                record_type::COLROW => {
                    let v = rec.as_i16_vec();
                    if v.len() >= 2 {
                        r.colrow = Some((v[0], v[1]));
                    }
                }
                record_type::ENDEL => return Ok(r),
                _ => {}
            }
        }
    }

    fn to_coords(&self, xy: &[i32]) -> Vec<Coord<f64>> {
        xy.chunks_exact(2)
            .map(|pair| Coord {
                x: pair[0] as f64 * self.user_units_per_db_unit,
                y: pair[1] as f64 * self.user_units_per_db_unit,
            })
            .collect()
    }

    fn to_reference(&self, r: ElementRecords) -> Result<GdsReference, GdsError> {
        let points = self.to_coords(&r.xy);
        let origin = *points.first().ok_or_else(|| GdsError::InvalidRecord {
            offset: self.offset,
            message: format!("Reference to '{}' has no XY record", r.sname),
        })?;

        let (columns, rows, spacing) = match r.colrow {
            Some((cols, rows)) if cols > 0 && rows > 0 && points.len() >= 3 => {
                let (cols, rows) = (cols as u32, rows as u32);
                let sx = (points[1].x - origin.x) / cols as f64;
                let sy = (points[2].y - origin.y) / rows as f64;
                (cols, rows, Some((sx, sy)))
            }
            Some(_) => {
                return Err(GdsError::InvalidRecord {
                    offset: self.offset,
                    message: format!("Malformed array reference to '{}'", r.sname),
                })
            }
            None => (1, 1, None),
        };

        Ok(GdsReference {
            name: r.sname,
            origin,
            angle: r.angle,
            magnification: r.mag,
            x_reflection: r.strans & STRANS_REFLECTION != 0,
            columns,
            rows,
            spacing,
        })
    }
}

impl<'a> GdsReader<&'a [u8]> {
    /// Parse one encoded structure block, BGNSTR through ENDSTR.
    pub fn parse_structure(block: &'a [u8], user_units_per_db_unit: f64) -> Result<GdsStructure, GdsError> {
        let mut reader = GdsReader {
            reader: block,
            offset: 0,
            user_units_per_db_unit,
        };
        let first = reader.expect_record()?;
        if first.record_type != record_type::BGNSTR {
            return Err(GdsError::UnexpectedRecord {
                record_type: first.record_type,
                expected: record_type::BGNSTR,
            });
        }
        reader.read_structure()
    }
}
