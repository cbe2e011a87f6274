//! Authentication middleware that resolves bearer tokens to users.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    auth::{
        User, get_user_by_id,
        token::{find_token, mark_token_used},
    },
    database_id::TokenId,
};

/// The state needed for the auth middleware
#[derive(Debug, Clone)]
pub struct AuthState {
    /// The database connection for looking up tokens and users.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The authenticated user and the token they presented.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The user the token belongs to.
    pub user: User,
    /// The ID of the token used for this request.
    pub token_id: TokenId,
}

/// Middleware function that checks for a valid bearer token.
///
/// The [Session] is placed into the request and the request executed normally
/// if the token is valid, otherwise a `401 Unauthorized` JSON response is
/// returned.
///
/// **Note**: Route handlers can use the function argument `Extension(session): Extension<Session>` to receive the session.
pub async fn auth_guard(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(Authorization(bearer)) = request.headers().typed_get::<Authorization<Bearer>>()
    else {
        return Error::Unauthenticated.into_response();
    };

    let session = match authenticate(bearer.token(), &state) {
        Ok(session) => session,
        Err(error) => return error.into_response(),
    };

    request.extensions_mut().insert(session);

    next.run(request).await
}

/// Resolve `plain_text_token` to the session it belongs to.
///
/// # Errors
/// Returns [Error::Unauthenticated] if the token is unknown or expired, or a
/// server error if the database could not be read.
fn authenticate(plain_text_token: &str, state: &AuthState) -> Result<Session, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    let token = match find_token(plain_text_token, &connection) {
        Ok(token) => token,
        Err(Error::NotFound) => return Err(Error::Unauthenticated),
        Err(error) => return Err(error),
    };

    if token.is_expired_at(OffsetDateTime::now_utc()) {
        tracing::debug!("Rejected expired token {}", token.id);
        return Err(Error::Unauthenticated);
    }

    let user = match get_user_by_id(token.user_id, &connection) {
        Ok(user) => user,
        Err(Error::NotFound) => return Err(Error::Unauthenticated),
        Err(error) => return Err(error),
    };

    mark_token_used(token.id, &connection)?;

    Ok(Session {
        user,
        token_id: token.id,
    })
}
