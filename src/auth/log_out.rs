//! Defines the route handler for revoking the access token of the current request.

use std::sync::{Arc, Mutex};

use axum::{
    Extension, Json,
    extract::{FromRef, State},
};
use rusqlite::Connection;
use serde_json::{Value, json};

use crate::{
    AppState, Error,
    auth::{middleware::Session, token::delete_token},
};

/// The state needed to log out.
#[derive(Debug, Clone)]
pub struct LogOutState {
    /// The database connection for deleting tokens.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for LogOutState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// Invalidate the bearer token used for this request.
///
/// Other tokens held by the same user, e.g. on their other devices, stay valid.
pub async fn post_log_out(
    State(state): State<LogOutState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Value>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    delete_token(session.token_id, &connection)?;
    tracing::info!(
        "User {} logged out, revoked token {}",
        session.user.id,
        session.token_id
    );

    Ok(Json(json!({
        "status": "logged_out",
        "message": "Logged out successfully",
    })))
}
