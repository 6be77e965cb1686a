use ndarray_linalg::error::LinalgError;
use rand_distr::WeightedError;
use thiserror::Error;

/// Failures that abort a single trajectory.
///
/// Energetically forbidden hops are not represented here, they are an
/// ordinary [`crate::rescale::RescaleOutcome`].
#[derive(Debug, Error)]
pub enum FsshError {
    #[error("unrecognized initial state option: {0}")]
    UnrecognizedInitialState(String),
    #[error("unrecognized outcome recognition type: {0}")]
    UnrecognizedOutcomeType(String),
    #[error("unrecognized hopping method: {0}")]
    UnrecognizedHoppingMethod(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("diagonalization failed: {0}")]
    Diagonalization(#[from] LinalgError),
    #[error("spawn stack exhausted after {consumed} thresholds")]
    SpawnStackExhausted { consumed: usize },
    #[error("spawn requested before any threshold was consumed")]
    SpawnStackUnstarted,
    #[error("invalid hopping probabilities: {0}")]
    HoppingProbabilities(#[from] WeightedError),
    #[error("velocity rescale has no real root (discriminant {discriminant})")]
    NoRealRescaleRoot { discriminant: f64 },
}

pub type Result<T> = std::result::Result<T, FsshError>;

/// Check that `found` matches `expected`, naming the offending array otherwise.
pub(crate) fn check_shape(what: &'static str, expected: &[usize], found: &[usize]) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(FsshError::DimensionMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}
