use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum HydroError {
    /// Unknown method keyword, missing parameter, or inconsistent topology.
    /// Fatal at startup, before the time loop begins.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid input data (non-monotone rating table, negative precipitation, ...).
    #[error("data error: {0}")]
    Data(String),

    /// A numerical procedure failed to converge or produced an out-of-range
    /// result. Non-fatal during the time loop unless strict mode is set.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// An end-of-step water or constituent balance check exceeded tolerance.
    #[error("mass balance violation: {context} (residual {residual:e}, tolerance {tolerance:e})")]
    MassBalance {
        context: String,
        residual: f64,
        tolerance: f64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type for `Result<T, HydroError>`.
pub type HydroResult<T> = Result<T, HydroError>;
