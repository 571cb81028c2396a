//! Error taxonomy shared by the REST and real-time paths.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or malformed required field.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credential.
    #[error("{0}")]
    Auth(String),

    /// Referenced order or counterparty does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Caller is not a party to the referenced order.
    #[error("{0}")]
    Forbidden(String),

    /// Underlying data-store failure.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Identity provider could not be reached or answered unexpectedly.
    #[error("Identity provider error: {0}")]
    Identity(#[from] reqwest::Error),

    /// Outbound queue of a connection is full or closed.
    #[error("Channel send error")]
    ChannelSend,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Store(_)
            | ChatError::Identity(_)
            | ChatError::ChannelSend
            | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing summary. Server-side failures hide their cause here and
    /// carry it in the `error` field instead.
    fn public_message(&self) -> String {
        match self {
            ChatError::Store(_) => "Failed to access message store".to_string(),
            ChatError::Identity(_) => "Failed to verify credentials".to_string(),
            ChatError::ChannelSend | ChatError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let error = match &self {
            ChatError::Store(_) | ChatError::Identity(_) | ChatError::Internal(_) => {
                Some(self.to_string())
            }
            _ => None,
        };
        let body = ErrorBody {
            status: "error",
            message: self.public_message(),
            error,
        };
        (status, Json(body)).into_response()
    }
}
