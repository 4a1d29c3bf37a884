//! GDS-II binary stream format.
//!
//! GDS-II (Graphic Data System II) is the stream format consumed by e-beam
//! and laser lithography tooling. Each record is framed as
//! `[2-byte length][2-byte record type][payload]`, big-endian throughout.
//! Record types define the hierarchy:
//! HEADER → BGNLIB → LIBNAME → UNITS → (BGNSTR … ENDSTR)* → ENDLIB.

use std::io;

use thiserror::Error;

use nanolith_core::LayoutError;

pub mod record;
pub mod writer;
pub mod reader;

pub use reader::{GdsElement, GdsLibrary, GdsReader, GdsReference, GdsStructure};
pub use writer::{encode_cell, CellExportParams, GdsWriter};

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum GdsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("Coordinate {value} does not fit the 32-bit stream grid")]
    CoordinateOverflow { value: f64 },

    #[error("Name '{name}' is {len} bytes long, too long for one record")]
    NameTooLong { name: String, len: usize },

    #[error("Invalid GDS-II record at offset {offset}: {message}")]
    InvalidRecord { offset: u64, message: String },

    #[error("Unexpected record type 0x{record_type:04X}, expected 0x{expected:04X}")]
    UnexpectedRecord { record_type: u16, expected: u16 },

    #[error("Cell '{0}' referenced but not defined")]
    UndefinedCell(String),

    #[error("Could not build export worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
