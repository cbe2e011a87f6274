//! This file defines the route for exchanging a username and password for an access token.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State, rejection::JsonRejection},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{
    AppState, Error, ValidationErrors,
    auth::{
        PasswordHash, User, get_user_by_username,
        token::{DEFAULT_TOKEN_NAME, issue_token},
    },
    validation::required_message,
};

/// The state needed to perform a login.
#[derive(Debug, Clone)]
pub struct LoginState {
    /// How long issued tokens are valid for, `None` for no expiry.
    pub token_lifetime: Option<Duration>,
    /// The database connection for looking up users and storing tokens.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for LoginState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            token_lifetime: state.token_lifetime,
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The raw credentials sent by the client.
///
/// Both fields are optional here so that a missing field is reported as a
/// validation error instead of a JSON parsing error.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LogInData {
    /// The username of the account.
    #[serde(default)]
    pub username: Option<String>,
    /// Password entered during log-in.
    #[serde(default)]
    pub password: Option<String>,
    /// A label for the issued token, e.g. the model of the client's phone.
    #[serde(default)]
    pub device_name: Option<String>,
}

/// The response body for a successful log-in.
#[derive(Debug, Serialize)]
pub struct LogInResponse {
    /// The bearer token to send with subsequent requests.
    pub token: String,
    /// The user that logged in.
    pub user: User,
}

/// Handler for log-in requests via the POST method.
///
/// On success, responds with a new bearer token and the user.
///
/// # Errors
///
/// This function will return an error in a few situations.
/// - The username or password is missing or empty.
/// - The username does not belong to a user or the password is not correct.
/// - An internal error occurred when verifying the password or storing the token.
pub async fn post_log_in(
    State(state): State<LoginState>,
    payload: Result<Json<LogInData>, JsonRejection>,
) -> Result<Json<LogInResponse>, Error> {
    let Json(log_in_data) = payload?;
    let (username, password) = validate_log_in_data(&log_in_data)?;

    let user = {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        match get_user_by_username(username, &connection) {
            Ok(user) => Some(user),
            Err(Error::NotFound) => None,
            Err(error) => return Err(error),
        }
    };

    let password_hash = user
        .as_ref()
        .map(|user| user.password_hash.clone())
        .unwrap_or_else(|| PasswordHash::new_unchecked(PasswordHash::DUMMY));

    let is_password_valid = verify_password(password_hash, password.to_owned()).await?;

    let user = match user {
        Some(user) if is_password_valid => user,
        _ => {
            tracing::info!("Rejected log-in attempt for username {username:?}");
            return Err(Error::InvalidCredentials);
        }
    };

    let device_name = log_in_data
        .device_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_TOKEN_NAME);

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let issued = issue_token(user.id, device_name, state.token_lifetime, &connection)?;
    tracing::info!("Issued token {} to user {}", issued.access_token.id, user.id);

    Ok(Json(LogInResponse {
        token: issued.plain_text,
        user,
    }))
}

/// Check `password` against `password_hash` on the blocking thread pool.
///
/// Must not be called while holding the database lock.
async fn verify_password(password_hash: PasswordHash, password: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || password_hash.verify(&password))
        .await
        .map_err(|error| Error::HashingError(error.to_string()))?
        .map_err(|error| {
            tracing::error!("Unhandled error while verifying credentials: {error}");
            Error::HashingError(error.to_string())
        })
}

fn validate_log_in_data(log_in_data: &LogInData) -> Result<(&str, &str), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let username = log_in_data.username.as_deref().unwrap_or_default();
    if username.trim().is_empty() {
        errors.add("username", required_message("username"));
    }

    let password = log_in_data.password.as_deref().unwrap_or_default();
    if password.is_empty() {
        errors.add("password", required_message("password"));
    }

    errors.into_result((username, password))
}

#[cfg(test)]
mod log_in_tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use axum_test::TestServer;
    use rusqlite::Connection;
    use serde_json::{Value, json};
    use time::Duration;

    use crate::{
        Error,
        auth::{
            PasswordHash, ValidatedPassword, create_user,
            token::{DEFAULT_TOKEN_NAME, find_token},
        },
        db::initialize,
        endpoints,
    };

    use super::{LogInData, LoginState, post_log_in};

    fn get_test_state(token_lifetime: Option<Duration>) -> LoginState {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");

        let password_hash = PasswordHash::new(ValidatedPassword::new_unchecked("test"), 4)
            .expect("Could not hash password");
        create_user("alice", password_hash, &connection).expect("Could not create test user");

        LoginState {
            token_lifetime,
            db_connection: Arc::new(Mutex::new(connection)),
        }
    }

    fn get_test_server(state: LoginState) -> TestServer {
        let app = Router::new()
            .route(endpoints::LOG_IN, post(post_log_in))
            .with_state(state);

        TestServer::new(app)
    }

    #[tokio::test]
    async fn log_in_succeeds_with_valid_credentials() {
        let state = get_test_state(None);
        let server = get_test_server(state.clone());

        let response = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": "test" }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["user"]["username"], "alice");
        assert!(body["user"].get("password_hash").is_none());

        let token = body["token"].as_str().expect("token should be a string");
        let stored = find_token(token, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(stored.name, DEFAULT_TOKEN_NAME);
        assert_eq!(stored.expires_at, None);
    }

    #[tokio::test]
    async fn log_in_stamps_expiry_when_configured() {
        let state = get_test_state(Some(Duration::minutes(30)));
        let server = get_test_server(state.clone());

        let response = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": "test", "device_name": "Pixel 7" }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        let token = body["token"].as_str().unwrap();
        let stored = find_token(token, &state.db_connection.lock().unwrap()).unwrap();
        assert_eq!(stored.name, "Pixel 7");
        assert_eq!(
            stored.expires_at,
            Some(stored.created_at + Duration::minutes(30))
        );
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let server = get_test_server(get_test_state(None));

        let wrong_password = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "alice", "password": "wrong" }))
            .await;
        let unknown_user = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "bob", "password": "test" }))
            .await;

        wrong_password.assert_status(StatusCode::UNAUTHORIZED);
        unknown_user.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password.json::<Value>(), unknown_user.json::<Value>());
        assert_eq!(
            wrong_password.json::<Value>(),
            json!({ "message": "Invalid username or password" })
        );
    }

    #[tokio::test]
    async fn log_in_fails_with_missing_credentials() {
        let server = get_test_server(get_test_state(None));

        let response = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "username": "" }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["errors"]["username"][0], "The username field is required.");
        assert_eq!(body["errors"]["password"][0], "The password field is required.");
    }

    #[tokio::test]
    async fn log_in_fails_with_malformed_body() {
        let server = get_test_server(get_test_state(None));

        let response = server
            .post(endpoints::LOG_IN)
            .content_type("application/json")
            .text("{not json")
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.json::<Value>()["message"].is_string());
    }

    #[tokio::test]
    async fn each_log_in_issues_a_new_token() {
        let server = get_test_server(get_test_state(None));
        let credentials = json!({ "username": "alice", "password": "test" });

        let first: Value = server.post(endpoints::LOG_IN).json(&credentials).await.json();
        let second: Value = server.post(endpoints::LOG_IN).json(&credentials).await.json();

        assert_ne!(first["token"], second["token"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn database_is_not_locked_while_verifying_password() {
        let state = get_test_state(None);
        // Unknown users are checked against the full cost dummy hash, which is slow enough to sample.
        let log_in = tokio::spawn(post_log_in(
            State(state.clone()),
            Ok(Json(LogInData {
                username: Some("bob".to_owned()),
                password: Some("test".to_owned()),
                device_name: None,
            })),
        ));

        let mut samples = 0;
        let mut held = 0;
        loop {
            samples += 1;
            if state.db_connection.try_lock().is_err() {
                held += 1;
            }
            if log_in.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let result = log_in.await.unwrap();
        assert_eq!(result.unwrap_err(), Error::InvalidCredentials);
        assert!(
            held * 2 < samples,
            "database was locked in {held} of {samples} samples"
        );
    }
}
