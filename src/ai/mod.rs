use thiserror::Error;

pub mod analysis;
pub mod domains;
pub mod semantics;

#[cfg(test)]
mod test;

/// Analysis-level failures. Infeasible paths are not errors: they are the
/// bottom state and are absorbed by the transfer itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The abstract domain cannot approximate the site named by the tag
    /// without giving up soundness.
    #[error("exploded: {0}")]
    Exploded(&'static str),
    #[error("invalid sdo")]
    InvalidSdo,
    #[error("invalid ir: {0}")]
    InvalidIr(String),
}

pub type AResult<T> = Result<T, AnalysisError>;
