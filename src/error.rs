use thiserror::Error;

// Unified error type for bsscr.
//
// Numerical non-convergence is not an error: it is reported through
// `ConvergedReason` in the solve statistics.

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StokesError {
    #[error("missing operator: {0}")]
    MissingOperator(&'static str),
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid sparse structure: {0}")]
    InvalidStructure(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl StokesError {
    /// Shorthand used by every dimension check in the crate.
    pub fn dims(context: &'static str, expected: usize, found: usize) -> Self {
        StokesError::DimensionMismatch { context, expected, found }
    }
}

/// Returns a `DimensionMismatch` unless `expected == found`.
pub(crate) fn check_dim(context: &'static str, expected: usize, found: usize) -> Result<(), StokesError> {
    if expected == found {
        Ok(())
    } else {
        Err(StokesError::dims(context, expected, found))
    }
}
