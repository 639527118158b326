use std::fmt;

use thiserror::Error;

use crate::media::extract::ExtractMethod;

/// Errors surfaced by a comparison session.
///
/// Everything here is scoped to the current session: a failed load or diff
/// leaves the session usable with its previous pair.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("failed to load {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    #[error("dimension mismatch: {left_w}x{left_h} vs {right_w}x{right_h}")]
    DimensionMismatch {
        left_w: u32,
        left_h: u32,
        right_w: u32,
        right_h: u32,
    },

    #[error("no frame could be extracted at {time:.3}s ({})", FailureList(.failures))]
    Extraction {
        time: f64,
        failures: Vec<(ExtractMethod, ExtractError)>,
    },

    #[error("diff unavailable: {0}")]
    DiffUnavailable(String),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("export failed: {0}")]
    Export(String),

    #[error("server request failed: {0}")]
    Server(String),
}

impl CompareError {
    pub(crate) fn load(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Load {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        Self::DimensionMismatch {
            left_w: left.0,
            left_h: left.1,
            right_w: right.0,
            right_h: right.1,
        }
    }
}

/// Failure of a single extraction strategy. Never fatal on its own: the
/// extractor chain records it and moves on to the next strategy.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("seek failed: {0}")]
    Seek(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("source too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("process error: {0}")]
    Process(String),
}

struct FailureList<'a>(&'a [(ExtractMethod, ExtractError)]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no extractors available");
        }
        for (i, (method, err)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{method}: {err}")?;
        }
        Ok(())
    }
}
