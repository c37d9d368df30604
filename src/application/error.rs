use thiserror::Error;

use crate::{
    cache::{CacheError, ResolveError},
    config::LoadError,
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("query execution failed: {0}")]
    Execution(String),
    #[error("render did not settle after {passes} passes")]
    Unsettled { passes: usize },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<ResolveError<InfraError>> for AppError {
    fn from(error: ResolveError<InfraError>) -> Self {
        match error {
            ResolveError::Cache(error) => Self::Cache(error),
            ResolveError::Execution(error) => Self::Execution(error.to_string()),
            ResolveError::TooManyPasses { passes } => Self::Unsettled { passes },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::ExecutionError;

    #[test]
    fn resolve_errors_map_to_app_errors() {
        let cache: AppError =
            ResolveError::<InfraError>::Cache(CacheError::arity_increased("q")).into();
        assert!(matches!(cache, AppError::Cache(CacheError::ArityIncreased { .. })));

        let execution: AppError = ResolveError::Execution(Arc::new(ExecutionError::Failed(
            InfraError::database("no such table: notes"),
        )))
        .into();
        assert_eq!(
            execution.to_string(),
            "query execution failed: database error: no such table: notes"
        );

        let unsettled: AppError = ResolveError::<InfraError>::TooManyPasses { passes: 8 }.into();
        assert!(matches!(unsettled, AppError::Unsettled { passes: 8 }));
    }
}
