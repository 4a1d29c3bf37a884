//! Fan-out of per-cell encoding across a worker pool.
//!
//! Workers share nothing mutable except the optional [`RealizationCache`].
//! Blocks are returned in input order, so serial and parallel runs produce
//! identical bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use nanolith_core::{Cell, CellId};

use crate::gds::writer::{encode_cell_body, frame_structure};
use crate::gds::{CellExportParams, GdsError};

/// Encoded structure body of one cell, STRNAME through ENDSTR.
pub type CellBlob = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    #[default]
    Serial,
    /// Encode on a rayon pool. `None` uses the global pool.
    Parallel { max_workers: Option<usize> },
}

/// Encode every cell into a complete structure block, in input order.
/// The first failing cell aborts the whole run.
pub fn encode_cells(
    cells: &[&Cell],
    params: &CellExportParams,
    execution: Execution,
    cache: Option<&RealizationCache>,
) -> Result<Vec<Vec<u8>>, GdsError> {
    let encode = |cell: &&Cell| -> Result<Vec<u8>, GdsError> {
        let body = match cache {
            Some(cache) => cache.get_or_encode(cell, params)?,
            None => CellBlob::from(encode_cell_body(cell, params)?),
        };
        Ok(frame_structure(&body, &params.timestamp))
    };

    log::debug!("Encoding {} cells ({:?})", cells.len(), execution);
    match execution {
        Execution::Serial => cells.iter().map(encode).collect(),
        Execution::Parallel { max_workers: None } => cells.par_iter().map(encode).collect(),
        Execution::Parallel {
            max_workers: Some(workers),
        } => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            pool.install(|| cells.par_iter().map(encode).collect())
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    revision: u64,
    params: CellExportParams,
    blob: CellBlob,
}

/// Memo table of encoded structure bodies keyed by cell identity.
///
/// An entry is reused only while the cell's revision and the body-relevant
/// export parameters are unchanged, so mutating a cell after an export
/// simply misses on the next one.
#[derive(Debug, Default)]
pub struct RealizationCache {
    entries: Mutex<HashMap<CellId, CacheEntry>>,
}

impl RealizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_encode(&self, cell: &Cell, params: &CellExportParams) -> Result<CellBlob, GdsError> {
        if let Some(blob) = self.lookup(cell, params) {
            log::debug!("Cache hit for cell '{}'", cell.name());
            return Ok(blob);
        }

        let blob = CellBlob::from(encode_cell_body(cell, params)?);
        self.lock().insert(
            cell.id(),
            CacheEntry {
                revision: cell.revision(),
                params: params.clone(),
                blob: blob.clone(),
            },
        );
        Ok(blob)
    }

    fn lookup(&self, cell: &Cell, params: &CellExportParams) -> Option<CellBlob> {
        let entries = self.lock();
        let entry = entries.get(&cell.id())?;
        if entry.revision == cell.revision() && entry.params.same_body(params) {
            Some(entry.blob.clone())
        } else {
            None
        }
    }

    pub fn invalidate(&self, id: &CellId) {
        self.lock().remove(id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CellId, CacheEntry>> {
        // entries are inserted whole, a panicking worker cannot leave one torn
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
