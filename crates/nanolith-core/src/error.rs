use thiserror::Error;

use crate::layer::LayerId;
use crate::normalize::GeometryError;

/// Fatal validation errors raised while building or exporting a layout.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Each cell name must be unique, \"{0}\" is used more than once")]
    DuplicateCellName(String),

    #[error("Polygon on layer {layer} of cell '{cell}' has {holes} interior holes, at most one is allowed")]
    TooManyHoles {
        cell: String,
        layer: LayerId,
        holes: usize,
    },

    #[error("Invalid array reference to '{cell}': {reason}")]
    InvalidArray { cell: String, reason: String },

    #[error("Auxiliary data id \"{id}\" already used for kind \"{kind}\"")]
    DuplicateAuxId { kind: String, id: String },

    #[error(transparent)]
    NotSupported(#[from] GeometryError),

    #[error("Fracturing did not converge within {iterations} cuts")]
    FractureLimit { iterations: usize },

    #[error("Point limit {budget} is too small, use 0 for no limit or at least {minimum}")]
    InvalidPointBudget { budget: usize, minimum: usize },

    #[error("Dose factor must not be negative, got {0}")]
    NegativeDoseFactor(f64),
}
