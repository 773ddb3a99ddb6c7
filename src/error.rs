use crate::clustering::Clustering;

/// Failure modes of a clustering run.
///
/// Initialisation and parameter errors surface immediately; per-iteration
/// anomalies (empty clusters, sub-epsilon improvements) are recovered
/// locally and only logged. Cancellation carries the provisional clustering
/// so the caller may inspect it, but must treat it as incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("empty input: no instance carries a complete set of features")]
    EmptyInput,

    #[error("degenerate initialization: {0}")]
    DegenerateInit(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("insufficient memory: {remaining} bytes remaining, {headroom} required")]
    InsufficientMemory { remaining: u64, headroom: u64 },

    #[error("clustering cancelled")]
    Cancelled(Box<Clustering>),
}

impl ClusterError {
    /// the provisional clustering delivered with a cancellation, if any
    pub fn into_partial(self) -> Option<Clustering> {
        match self {
            ClusterError::Cancelled(partial) => Some(*partial),
            _ => None,
        }
    }
}
