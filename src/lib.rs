//! Cashbook is the sync backend for a point-of-sale mobile client.
//!
//! This library provides a JSON REST API that authenticates users with opaque
//! bearer tokens and stores the client's sales transactions in SQLite. The
//! client can also push a bulk backup of transactions exported from its local
//! store.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod auth;
mod backup;
mod database_id;
mod db;
mod endpoints;
mod logging;
mod routing;
mod timezone;
mod transaction;
mod validation;

pub use app_state::AppState;
pub use auth::{
    PasswordHash, User, UserID, ValidatedPassword, create_user, delete_expired_tokens,
    get_user_by_username,
};
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use timezone::get_local_offset;
pub use validation::ValidationErrors;

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("Could not listen for the ctrl+c signal: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!("Could not listen for the terminate signal: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The message sent to clients for any error that is not their fault.
const SERVER_ERROR_MESSAGE: &str = "Server Error";

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request body was missing fields or had fields with the wrong type.
    ///
    /// Maps to `422 Unprocessable Entity` with the per-field messages.
    #[error("{0}")]
    Validation(ValidationErrors),

    /// The request body could not be read as JSON.
    #[error("{0}")]
    InvalidJson(String),

    /// The username and password did not match a registered user.
    ///
    /// This is returned for both an unknown username and a wrong password
    /// so that clients cannot probe for registered usernames.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The bearer token is missing, malformed, unknown or expired.
    #[error("Unauthenticated.")]
    Unauthenticated,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    /// When communicating with the application client this error should be
    /// replaced with a general error type indicating an internal server error.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// The username is already taken by another user.
    #[error("the username \"{0}\" already exists in the database")]
    DuplicateUsername(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to delete a transaction that does not exist
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// An error occurred while serializing a struct as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidJson(rejection.body_text())
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "message": errors.summary(),
                    "errors": errors,
                })),
            )
                .into_response(),
            Error::InvalidJson(message) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json_message(&message)).into_response()
            }
            Error::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                json_message("Invalid username or password"),
            )
                .into_response(),
            Error::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, json_message("Unauthenticated.")).into_response()
            }
            Error::NotFound => (StatusCode::NOT_FOUND, json_message("Not Found")).into_response(),
            Error::UpdateMissingTransaction | Error::DeleteMissingTransaction => (
                StatusCode::NOT_FOUND,
                json_message("Transaction not found"),
            )
                .into_response(),
            Error::DatabaseLockError => {
                tracing::error!("Could not acquire the database lock");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json_message(SERVER_ERROR_MESSAGE),
                )
                    .into_response()
            }
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json_message(SERVER_ERROR_MESSAGE),
                )
                    .into_response()
            }
        }
    }
}

/// Wrap `message` in the JSON body shape shared by every response that only
/// carries a message.
pub(crate) fn json_message(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": message }))
}
