//! Batch-shape strategies, one per loss family.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// How raw positive batches are turned into training batches.
///
/// | Strategy | Output | Loss family |
/// |----------|--------|-------------|
/// | `PairwiseBased` | aligned positive / negative arrays | margin ranking |
/// | `PointwiseBased` | interleaved records labeled +1 / -1 | logistic |
/// | `ProjectionBased` | sparse label rows over all entities | listwise / 1-N |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingStrategy {
    PairwiseBased,
    PointwiseBased,
    ProjectionBased,
}

impl TrainingStrategy {
    /// Strategy used by a model family, matched case-insensitively.
    pub fn for_model_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "tucker" | "tucker_v2" | "conve" | "proje_pointwise" => Self::ProjectionBased,
            "convkb" | "complex" => Self::PointwiseBased,
            _ => Self::PairwiseBased,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PairwiseBased => "pairwise_based",
            Self::PointwiseBased => "pointwise_based",
            Self::ProjectionBased => "projection_based",
        }
    }
}

impl FromStr for TrainingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pairwise_based" => Ok(Self::PairwiseBased),
            "pointwise_based" => Ok(Self::PointwiseBased),
            "projection_based" => Ok(Self::ProjectionBased),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for TrainingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
