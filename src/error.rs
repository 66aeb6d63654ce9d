//! Error handler for keyward.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ldap3::LdapError;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::crypto::CryptoError;
use crate::provider::ProviderKind;

pub type Result<T> = std::result::Result<T, ServerError>;

/// JSON-RPC error codes returned to API clients.
pub mod code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Authentication failure. Shares its value with the legacy API path.
    pub const AUTH_FAILURE: i32 = -32601;
    /// Too many failed attempts from the same source.
    pub const LOCKOUT: i32 = -32001;
}

/// Message shown for every credential failure, whatever provider denied.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
/// Message shown when the source is throttled.
pub const TOO_MANY_ATTEMPTS: &str = "Too many failed attempts, retry later";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),
    #[error("LDAP request failed: {0}")]
    Ldap(#[from] LdapError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("entity not found")]
    NotFound,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider `{0}` already initialized")]
    ProviderAlreadyRegistered(ProviderKind),
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{attempts} failed attempts inside tracking window")]
    LockoutExceeded { attempts: i64 },

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Stable JSON-RPC code for this error.
    pub fn rpc_code(&self) -> i32 {
        match self {
            ServerError::Validation(_) | ServerError::InvalidArgument(_) => {
                code::INVALID_PARAMS
            },
            ServerError::InvalidCredentials | ServerError::NotFound => {
                code::AUTH_FAILURE
            },
            ServerError::LockoutExceeded { .. } => code::LOCKOUT,
            _ => code::INTERNAL_ERROR,
        }
    }

    /// Message safe to show to an unauthenticated client.
    ///
    /// Credential failures never tell which provider denied nor whether the
    /// login exists.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::InvalidCredentials | ServerError::NotFound => {
                INVALID_CREDENTIALS.to_owned()
            },
            ServerError::LockoutExceeded { .. } => TOO_MANY_ATTEMPTS.to_owned(),
            ServerError::Validation(_) | ServerError::InvalidArgument(_) => {
                self.to_string()
            },
            _ => "Internal error".to_owned(),
        }
    }

    /// Whether the error comes from a failing backend rather than from the
    /// client.
    pub fn is_internal(&self) -> bool {
        self.rpc_code() == code::INTERNAL_ERROR
    }

    /// HTTP status used outside of the JSON-RPC envelope.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) | ServerError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            },
            ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::LockoutExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "code": self.rpc_code(),
            "message": self.public_message(),
        });

        (self.status_code(), Json(body)).into_response()
    }
}
