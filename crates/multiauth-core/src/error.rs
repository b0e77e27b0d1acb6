//! Error types for MultiAuth

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Authentication Errors
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid credentials")]
    InvalidCredentials { provider: Option<String> },

    #[error("No such user")]
    NoSuchUser { provider: Option<String> },

    // Identity Errors
    #[error("Identity retrieval failed: {message}")]
    IdentityRetrievalFailed {
        message: String,
        provider: Option<String>,
    },

    #[error("Group retrieval failed: {0}")]
    GroupRetrievalFailed(String),

    // Provider Errors
    #[error("Provider '{provider}' does not support {operation}")]
    NotSupported {
        provider: String,
        operation: &'static str,
    },

    #[error("Unknown provider: {0}")]
    ProviderNotFound(String),

    // Validation Errors
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Backend Errors
    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn identity_retrieval(message: impl Into<String>) -> Self {
        Error::IdentityRetrievalFailed {
            message: message.into(),
            provider: None,
        }
    }

    /// Attach the name of the provider that raised the error.
    pub fn with_provider(self, name: &str) -> Self {
        match self {
            Error::InvalidCredentials { provider: None } => Error::InvalidCredentials {
                provider: Some(name.to_string()),
            },
            Error::NoSuchUser { provider: None } => Error::NoSuchUser {
                provider: Some(name.to_string()),
            },
            Error::IdentityRetrievalFailed {
                message,
                provider: None,
            } => Error::IdentityRetrievalFailed {
                message,
                provider: Some(name.to_string()),
            },
            other => other,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Error::InvalidCredentials { provider }
            | Error::NoSuchUser { provider }
            | Error::IdentityRetrievalFailed { provider, .. } => provider.as_deref(),
            Error::NotSupported { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// True for every error of the "authentication failed" family.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed(_)
                | Error::InvalidCredentials { .. }
                | Error::NoSuchUser { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::AuthenticationFailed(_) => "AuthenticationFailed",
            Error::InvalidCredentials { .. } => "InvalidCredentials",
            Error::NoSuchUser { .. } => "NoSuchUser",
            Error::IdentityRetrievalFailed { .. } => "IdentityRetrievalFailed",
            Error::GroupRetrievalFailed(_) => "GroupRetrievalFailed",
            Error::NotSupported { .. } => "NotSupported",
            Error::ProviderNotFound(_) => "ProviderNotFound",
            Error::InvalidData(_) => "InvalidData",
            Error::MissingKey(_) => "MissingKey",
            Error::Config(_) => "InvalidConfiguration",
            Error::Directory(_) => "DirectoryError",
            Error::Database(_) => "DatabaseError",
            Error::Internal(_) | Error::Io(_) => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidData(_) | Error::MissingKey(_) => 400,

            Error::AuthenticationFailed(_)
            | Error::InvalidCredentials { .. }
            | Error::NoSuchUser { .. } => 401,

            Error::ProviderNotFound(_) => 404,

            Error::IdentityRetrievalFailed { .. } | Error::GroupRetrievalFailed(_) => 422,

            Error::NotSupported { .. } => 501,

            Error::Directory(_) => 502,

            _ => 500,
        }
    }
}
