use thiserror::Error;

/// Caller-facing failures raised synchronously by the query cache.
///
/// Executor failures are not represented here: they are captured into the
/// record and surfaced as [`Outcome::Error`](super::Outcome::Error).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("query parameters must be an ordered sequence, got {found}")]
    InvalidParameterList { found: &'static str },
    #[error("circular reference detected while preparing {description} for query")]
    CircularReference { description: String },
    #[error(
        "query `{operation}` has received more parameters than the last time it was used; \
         always pass the exact number of parameters that the query needs"
    )]
    ArityIncreased { operation: String },
    #[error(
        "query `{operation}` has received fewer parameters than the last time it was used; \
         always pass the exact number of parameters that the query needs"
    )]
    ArityDecreased { operation: String },
    #[error(
        "{kind} view of {len} elements at byte {byte_offset} \
         does not fit a {buffer_len}-byte buffer"
    )]
    InvalidView {
        kind: &'static str,
        byte_offset: usize,
        len: usize,
        buffer_len: usize,
    },
    #[error("cache identity `{identity}` is already bound to a different executor type")]
    IdentityConflict { identity: String },
}

impl CacheError {
    pub fn invalid_parameter_list(found: &'static str) -> Self {
        Self::InvalidParameterList { found }
    }

    pub fn circular(description: impl Into<String>) -> Self {
        Self::CircularReference {
            description: description.into(),
        }
    }

    pub fn arity_increased(operation: impl Into<String>) -> Self {
        Self::ArityIncreased {
            operation: operation.into(),
        }
    }

    pub fn arity_decreased(operation: impl Into<String>) -> Self {
        Self::ArityDecreased {
            operation: operation.into(),
        }
    }
}
