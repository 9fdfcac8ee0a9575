//! Error types for search operations

use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Malformed request, rejected before touching the index
    #[error("Invalid search request: {0}")]
    Validation(String),

    /// Dynamic filter on a field that is unknown or not searchable
    #[error("Unknown or non-searchable field: {0}")]
    UnknownField(String),

    /// Query did not finish in time
    #[error("Search timed out after {0} ms")]
    Timeout(u64),

    /// Index store unreachable or failing
    #[error("Index store failure: {0}")]
    Store(String),
}

impl SearchError {
    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::Timeout(_) | SearchError::Store(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Validation(_) | SearchError::UnknownField(_) => "validation",
            SearchError::Timeout(_) => "timeout",
            SearchError::Store(_) => "store",
        }
    }
}

impl From<AppError> for SearchError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => SearchError::Validation(msg),
            other => SearchError::Store(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for SearchError {
    fn from(err: validator::ValidationErrors) -> Self {
        SearchError::Validation(err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(_) | SearchError::UnknownField(_) => {
                AppError::Validation(err.to_string())
            }
            SearchError::Timeout(_) => AppError::Timeout(err.to_string()),
            SearchError::Store(msg) => AppError::Storage(msg),
        }
    }
}
