use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 创建携带底层错误信息的基础设施错误
    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::fmt::Display,
    ) -> Self {
        ApplicationError::Infrastructure(format!("{}: {}", message.into(), source))
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
