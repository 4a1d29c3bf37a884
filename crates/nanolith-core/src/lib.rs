//! # Nanolith Core
//!
//! Hierarchical layout graph for nanofabrication layouts: cells holding
//! per-layer geometry and placed child cells, the normalizer that reduces
//! nested geometry to basic shapes, and the fracture/heal engine that keeps
//! every shape inside the vertex and hole budgets of the writing hardware.
//!
//! The stream codec that serializes a cell tree lives in `nanolith-io`.

pub mod geometry;
pub mod normalize;
pub mod fracture;
pub mod spatial;
pub mod layer;
pub mod cell;
pub mod library;
pub mod error;

pub use cell::{AuxRecord, AuxTable, Cell, CellId, CellInstance, Transform};
pub use error::LayoutError;
pub use fracture::{FractureConfig, FractureOptions, Fracturer, MIN_POINT_BUDGET};
pub use geometry::{BBox, BasicShape, Geometry, Line, Point, Realize};
pub use layer::{DatatypePolicy, LayerId};
pub use library::Library;
pub use normalize::{GeometryError, UnsupportedPolicy};
