use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("LibsqlError")]
    Libsql(#[from] libsql::Error),
    #[error("PoolError")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),
    #[error("PoolSetupError: {0}")]
    PoolSetup(String),
    #[error("MigrationError: {name}")]
    Migration {
        name: String,
        #[source]
        source: libsql::Error,
    },
    #[error("MalformedRow: {0}")]
    MalformedRow(String),
    #[error("MissingId: insert returned no id")]
    MissingId,
    #[error("Unsaved: link has no id yet")]
    Unsaved,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("HashError: {0}")]
    Hash(String),
    #[error("TokenError")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("AuthConfigError: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("ValidationError: {0}")]
    Validation(String),
    #[error("NotFound: link {0}")]
    NotFound(Uuid),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("StoreError: {}", crate::unpack_error(.0))]
    Store(#[from] DbError),
    #[error("AuthError: {}", crate::unpack_error(.0))]
    Auth(#[from] AuthError),
}

impl HandlerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HandlerError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Validation(_) => StatusCode::BAD_REQUEST,
            HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::Unauthorized => StatusCode::UNAUTHORIZED,
            HandlerError::Store(_) | HandlerError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            HandlerError::Validation(msg) => msg.clone(),
            HandlerError::NotFound(id) => format!("link {} not found", id),
            HandlerError::Unauthorized => "Invalid username and password.".to_string(),
            // the client only sees a generic message
            HandlerError::Store(e) => {
                tracing::error!(error = %crate::unpack_error(e), "store operation failed");
                "internal error".to_string()
            }
            HandlerError::Auth(e) => {
                tracing::error!(error = %crate::unpack_error(e), "sign-in failed");
                "internal error".to_string()
            }
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
