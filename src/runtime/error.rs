use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that abort the current evaluation round. None of these are
/// recoverable at a single node; they propagate out of `evaluate` and the
/// round as a whole is reported as failed to the driver.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unknown symbol `{name}`")]
    UnknownSymbol { name: String },
    #[error("`{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("No operation `{name}` on `{target}` accepts ({signature})")]
    NoMatchingOperation {
        name: String,
        target: String,
        signature: String,
    },
    #[error("Invoking `{name}` failed even after numeric coercion: {message}")]
    CoercionFailure { name: String, message: String },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("Structural violation: {message}")]
    StructuralViolation { message: String },
    #[error("Index {index} out of bounds for tuple of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },
}
