use std::fmt;

use thiserror::Error;

/// Why a raw spectrum was rejected before any processing happened.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("wavenumber and intensity columns differ in length ({wavenumbers} vs {intensities})")]
    LengthMismatch {
        wavenumbers: usize,
        intensities: usize,
    },

    #[error("spectrum has {found} samples but at least {required} are required")]
    TooFewSamples { found: usize, required: usize },

    #[error("wavenumber at sample {index} is not a finite number")]
    NonFiniteWavenumber { index: usize },

    #[error("intensity at sample {index} is not a finite number")]
    NonFiniteIntensity { index: usize },

    #[error("wavenumber {wavenumber} appears more than once, the axis is ambiguous")]
    DuplicateWavenumber { wavenumber: f64 },

    #[error("every intensity equals {value}, a flat trace carries no spectral information")]
    FlatSignal { value: f64 },
}

/// Errors raised by the classification engine.
///
/// The first three kinds are terminal for the request they arise in. `StartupIntegrity` is
/// only produced while loading the prototype store and means the process must not serve.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid spectrum: {0}")]
    Validation(#[from] ValidationIssue),

    #[error(
        "could not process spectrum: dynamic range {range:e} after baseline removal is below {epsilon:e}"
    )]
    DegenerateSignal { range: f64, epsilon: f64 },

    #[error("similarity is undefined for a zero-norm feature vector")]
    UndefinedSimilarity,

    #[error("prototype store failed its integrity check: {0}")]
    StartupIntegrity(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable, machine-readable error kind for callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DegenerateSignal,
    UndefinedSimilarity,
    StartupIntegrity,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::DegenerateSignal => "degenerate_signal",
            ErrorKind::UndefinedSimilarity => "undefined_similarity",
            ErrorKind::StartupIntegrity => "startup_integrity",
        }
    }

    /// Whether the kind belongs to a single request rather than to the process.
    pub fn is_per_request(&self) -> bool {
        !matches!(self, ErrorKind::StartupIntegrity)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::DegenerateSignal { .. } => ErrorKind::DegenerateSignal,
            Error::UndefinedSimilarity => ErrorKind::UndefinedSimilarity,
            Error::StartupIntegrity(_) => ErrorKind::StartupIntegrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_strings() {
        let err = Error::from(ValidationIssue::TooFewSamples {
            found: 3,
            required: 50,
        });
        assert_eq!(err.kind().as_str(), "validation_error");
        assert!(err.kind().is_per_request());
        assert!(!Error::StartupIntegrity("empty".into()).kind().is_per_request());
    }

    #[test]
    fn messages_carry_the_reason() {
        let err = Error::from(ValidationIssue::NonFiniteIntensity { index: 7 });
        assert_eq!(
            err.to_string(),
            "invalid spectrum: intensity at sample 7 is not a finite number"
        );
    }
}
