use shared::{
    domain::Identifier,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("entity id {0} is already registered")]
    DuplicateId(Identifier),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown id: {0}")]
    UnknownId(String),
    #[error("asset resolution failed: {0}")]
    AssetResolution(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("method {method} is not implemented on channel {channel}")]
    NotImplemented { channel: String, method: String },
    #[error("{context}: {source}")]
    Capability {
        context: &'static str,
        source: anyhow::Error,
    },
}

impl BridgeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn unknown(id: impl ToString) -> Self {
        Self::UnknownId(id.to_string())
    }

    pub fn capability(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Capability { context, source }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::UnknownId(_) => ErrorCode::UnknownId,
            Self::AssetResolution(_) => ErrorCode::AssetResolution,
            Self::Registry(RegistryError::DuplicateId(_)) => ErrorCode::DuplicateId,
            Self::NotImplemented { .. } => ErrorCode::NotImplemented,
            Self::Capability { .. } => ErrorCode::Internal,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(value: BridgeError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}
