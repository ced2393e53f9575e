//! Error type shared across the crate.
//!
//! One concrete error type keeps the numerical call chain simple: every stage
//! (topology, simulation, fitting, guessing) returns `Result<_, PlateError>`
//! and attaches enough context (stage, culture index) to reproduce the
//! failure. The `kind` is machine-readable so callers can distinguish a fatal
//! shape mismatch from a recoverable integration failure.

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Parameter/bounds/guess length inconsistent with the model and plate.
    /// Always raised before any simulation runs; never retried internally.
    ShapeMismatch,
    /// The adaptive integrator could not reach the requested final time.
    /// Carries the furthest time reached; callers may retry with looser
    /// tolerances, and the fitter treats it as an infinite objective value.
    IntegrationFailure { reached: f64 },
    /// A caller-supplied value is out of range (non-positive grid dimension,
    /// non-increasing times, invalid sweep, ...).
    InvalidInput,
    /// A computation has no well-defined answer for the given data
    /// (e.g. a regression over fewer than two distinct points).
    Degenerate,
}

#[derive(Clone)]
pub struct PlateError {
    kind: ErrorKind,
    message: String,
}

impl PlateError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShapeMismatch, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Degenerate, message)
    }

    pub fn integration(reached: f64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrationFailure { reached }, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_integration_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::IntegrationFailure { .. })
    }
}

impl std::fmt::Display for PlateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for PlateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlateError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for PlateError {}
