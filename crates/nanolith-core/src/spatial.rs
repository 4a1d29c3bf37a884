use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::BBox;

/// An entry in the R-tree spatial index, referencing a shape by its index.
#[derive(Debug, Clone)]
pub struct SpatialEntry {
    /// Index into the caller's shape list.
    pub shape_index: usize,
    /// Bounding box of the shape.
    pub bbox: BBox,
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min.x, self.bbox.min.y],
            [self.bbox.max.x, self.bbox.max.y],
        )
    }
}

/// Bounding-box index used to find neighbour candidates without testing
/// every pair of shapes.
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
}

impl SpatialIndex {
    pub fn build(entries: Vec<SpatialEntry>) -> Self {
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Indices of all entries whose box touches or overlaps `region`, ascending.
    pub fn query_intersecting(&self, region: &BBox) -> Vec<usize> {
        let envelope = AABB::from_corners(
            [region.min.x, region.min.y],
            [region.max.x, region.max.y],
        );
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.shape_index)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
