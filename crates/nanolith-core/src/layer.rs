use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// A layer identifier: a bare stream layer number, or an explicit
/// layer/datatype pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerId {
    Layer(u16),
    WithDatatype(u16, u16),
}

impl LayerId {
    pub fn layer(&self) -> u16 {
        match *self {
            LayerId::Layer(layer) | LayerId::WithDatatype(layer, _) => layer,
        }
    }

    /// The datatype written for this layer. Bare layers defer to `policy`.
    pub fn datatype(&self, policy: DatatypePolicy) -> u16 {
        match *self {
            LayerId::Layer(layer) => policy.resolve(layer),
            LayerId::WithDatatype(_, datatype) => datatype,
        }
    }
}

impl From<u16> for LayerId {
    fn from(layer: u16) -> Self {
        LayerId::Layer(layer)
    }
}

impl From<(u16, u16)> for LayerId {
    fn from((layer, datatype): (u16, u16)) -> Self {
        LayerId::WithDatatype(layer, datatype)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerId::Layer(layer) => write!(f, "{}", layer),
            LayerId::WithDatatype(layer, datatype) => write!(f, "{}/{}", layer, datatype),
        }
    }
}

/// How the datatype of a bare layer number is chosen at export.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum DatatypePolicy {
    Zero,
    /// Datatype equals the layer number.
    #[default]
    AsLayer,
    /// Encode an e-beam dose factor as `trunc(factor * 1000)`.
    DoseFactor(f64),
}

impl DatatypePolicy {
    pub fn validate(&self) -> Result<(), LayoutError> {
        match *self {
            DatatypePolicy::DoseFactor(factor) if factor < 0.0 || factor.is_nan() => {
                Err(LayoutError::NegativeDoseFactor(factor))
            }
            _ => Ok(()),
        }
    }

    pub fn resolve(&self, layer: u16) -> u16 {
        match *self {
            DatatypePolicy::Zero => 0,
            DatatypePolicy::AsLayer => layer,
            DatatypePolicy::DoseFactor(factor) => (factor * 1000.0) as u16,
        }
    }
}
