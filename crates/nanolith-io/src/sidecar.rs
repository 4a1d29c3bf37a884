//! Saving a layout together with its JSON companion documents.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use nanolith_core::Cell;

use crate::gds::{GdsError, GdsWriter};
use crate::options::ExportOptions;

/// Files produced by [`save_layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedLayout {
    pub gds: PathBuf,
    pub desc: PathBuf,
    /// Only written when some cell carries auxiliary data.
    pub aux: Option<PathBuf>,
}

/// Write `<base>.gds`, `<base>.desc` and, if there is auxiliary data,
/// `<base>.dlw`.
///
/// The stream goes to a uniquely named temporary file next to the target and
/// is renamed into place only once it is complete, so a failed export never
/// leaves a truncated `.gds`.
pub fn save_layout(
    cell: &Cell,
    base: impl AsRef<Path>,
    options: &ExportOptions,
) -> Result<SavedLayout, GdsError> {
    let base = base.as_ref();
    let gds = with_suffix(base, ".gds");
    let dir = match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // dropped, and so removed, on any error before persist
    let mut tmp = tempfile::Builder::new()
        .prefix(".nanolith-")
        .suffix(".gds.tmp")
        .tempfile_in(dir)?;
    write_gds(cell, tmp.as_file_mut(), options)?;
    persist(tmp, &gds)?;

    let desc = with_suffix(base, ".desc");
    write_json(&desc, &cell.get_desc())?;

    let aux_data = cell.get_aux_data();
    let aux = if aux_data.is_empty() {
        None
    } else {
        let path = with_suffix(base, ".dlw");
        write_json(&path, &aux_data)?;
        Some(path)
    };

    log::info!("Saved layout '{}' to {}", cell.name(), gds.display());
    Ok(SavedLayout { gds, desc, aux })
}

fn write_gds(cell: &Cell, file: &mut File, options: &ExportOptions) -> Result<(), GdsError> {
    let mut writer = GdsWriter::with_options(BufWriter::new(file), options.clone());
    writer.write(cell)?;
    writer.into_inner().into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), GdsError> {
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), GdsError> {
    let mut file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut file, value)?;
    file.flush()?;
    Ok(())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
