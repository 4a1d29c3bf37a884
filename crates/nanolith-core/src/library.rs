use std::collections::{HashMap, HashSet};

use crate::cell::{Cell, CellId};
use crate::error::LayoutError;

/// The set of unique cells reachable from a top cell, in the order they are
/// written to a stream: pre-order, each cell before its children, every cell
/// once no matter how often it is instanced.
#[derive(Debug)]
pub struct Library<'a> {
    /// Library name written to the stream header.
    pub name: String,
    cells: Vec<&'a Cell>,
}

impl<'a> Library<'a> {
    /// Collect the hierarchy under `top`. Two distinct cells sharing a name
    /// fail with [`LayoutError::DuplicateCellName`].
    pub fn from_root(name: &str, top: &'a Cell) -> Result<Self, LayoutError> {
        let mut cells = Vec::new();
        let mut seen: HashSet<CellId> = HashSet::new();
        let mut names: HashMap<&'a str, CellId> = HashMap::new();
        collect(top, &mut cells, &mut seen, &mut names)?;

        log::debug!("Library '{}': {} unique cells", name, cells.len());
        Ok(Self {
            name: name.to_string(),
            cells,
        })
    }

    pub fn cells(&self) -> &[&'a Cell] {
        &self.cells
    }

    pub fn top(&self) -> &'a Cell {
        self.cells[0]
    }

    pub fn find_cell_by_name(&self, name: &str) -> Option<&'a Cell> {
        self.cells.iter().copied().find(|c| c.name() == name)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

fn collect<'a>(
    cell: &'a Cell,
    cells: &mut Vec<&'a Cell>,
    seen: &mut HashSet<CellId>,
    names: &mut HashMap<&'a str, CellId>,
) -> Result<(), LayoutError> {
    if !seen.insert(cell.id()) {
        return Ok(());
    }
    if let Some(other) = names.insert(cell.name(), cell.id()) {
        if other != cell.id() {
            return Err(LayoutError::DuplicateCellName(cell.name().to_string()));
        }
    }
    cells.push(cell);
    for child in cell.children() {
        collect(&child.cell, cells, seen, names)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_preorder_unique_cells() {
        let leaf = Arc::new(Cell::new("leaf"));
        let mut mid = Cell::new("mid");
        mid.add_cell(leaf.clone(), (0.0, 0.0), None);
        mid.add_cell(leaf.clone(), (5.0, 0.0), None);
        let mid = Arc::new(mid);

        let mut top = Cell::new("top");
        top.add_cell(mid.clone(), (0.0, 0.0), None);
        top.add_cell(leaf, (0.0, 10.0), None);
        top.add_cell(mid, (20.0, 0.0), Some(90.0));

        let lib = Library::from_root("lib", &top).unwrap();
        let names: Vec<&str> = lib.cells().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["top", "mid", "leaf"]);
        assert_eq!(lib.top().name(), "top");
        assert_eq!(lib.cell_count(), 3);
        assert!(lib.find_cell_by_name("leaf").is_some());
        assert!(lib.find_cell_by_name("missing").is_none());
    }

    #[test]
    fn test_distinct_cells_with_same_name_are_rejected() {
        let mut top = Cell::new("top");
        top.add_cell(Arc::new(Cell::new("A")), (0.0, 0.0), None);
        top.add_cell(Arc::new(Cell::new("A")), (1.0, 0.0), None);

        match Library::from_root("lib", &top) {
            Err(LayoutError::DuplicateCellName(name)) => assert_eq!(name, "A"),
            other => panic!("expected duplicate name error, got {:?}", other),
        }
    }
}
