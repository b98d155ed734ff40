use std::fmt;
use std::path::PathBuf;

/// Which side of a binary table operation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    This,
    Other,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::This => write!(f, "this table"),
            Operand::Other => write!(f, "other table"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("shape mismatch in data arrays: {ours:?} vs {theirs:?}")]
    ShapeMismatch {
        ours: Vec<usize>,
        theirs: Vec<usize>,
    },
    #[error("can't combine tables with {key}={ours} and {theirs}")]
    HeaderMismatch {
        key: String,
        ours: String,
        theirs: String,
    },
    #[error("{operand} has {count} non-finite values")]
    NonFiniteData { operand: Operand, count: usize },
    #[error("can't combine a table with an ERRORS array and one without")]
    VarianceMismatch,
    #[error("file '{}' exists", .0.display())]
    ExistingFile(PathBuf),
    #[error("invalid bin edges for axis {axis}: {reason}")]
    InvalidBinEdges { axis: usize, reason: String },
    #[error("photon path has {positions} positions but {absorption_lengths} absorption lengths")]
    InvalidPath {
        positions: usize,
        absorption_lengths: usize,
    },
    #[error("step length must be positive and finite, got {0}")]
    InvalidStepLength(f64),
    #[error("can't normalize to a photon count of {0}")]
    NoPhotons(f64),
    #[error("malformed table file: {0}")]
    Format(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TableError>;
