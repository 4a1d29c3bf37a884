//! # Nanolith I/O
//!
//! GDS-II stream codec for nanolith layouts: the record writer and reader,
//! the coordinator that encodes cells serially or on a worker pool, export
//! options with machine profiles, import of existing patterns as parts, and
//! the JSON sidecar documents written next to a saved layout.

pub mod gds;
pub mod coordinator;
pub mod options;
pub mod import;
pub mod sidecar;

pub use coordinator::{encode_cells, CellBlob, Execution, RealizationCache};
pub use gds::{
    encode_cell, CellExportParams, GdsElement, GdsError, GdsLibrary, GdsReader, GdsReference,
    GdsStructure, GdsWriter,
};
pub use import::GdsImport;
pub use options::{ExportOptions, MachineProfile, Timestamp};
pub use sidecar::{save_layout, SavedLayout};
