use thiserror::Error;

/// Fatal input problems. Anything that is merely inconclusive is reported
/// through [`crate::boundary::DetectionStatus`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("at least 2 chapters are required, got {0}")]
    TooFewChapters(usize),

    #[error("chapter at position {position} has index {index}")]
    NonContiguousIndex { position: usize, index: usize },

    #[error("chapter {0} does not start where the previous chapter ends")]
    NonContiguousStart(usize),

    #[error("expected one fingerprint slot per chapter ({expected}), got {found}")]
    FingerprintCountMismatch { expected: usize, found: usize },

    #[error("fingerprint of chapter {chapter} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        chapter: usize,
        expected: usize,
        found: usize,
    },

    #[error("boundary candidate at chapter {index} is outside 0..{count}")]
    CandidateOutOfRange { index: usize, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
