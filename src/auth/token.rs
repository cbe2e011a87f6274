//! Opaque bearer tokens that are stored server-side and revoked by deletion.
//!
//! A token handed to a client looks like `"{id}|{secret}"`. Only the SHA-256
//! digest of the secret is stored.

use rand::RngCore;
use rusqlite::{Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

use crate::{Error, auth::UserID, database_id::TokenId};

/// The number of random bytes in a token secret.
const SECRET_LENGTH_BYTES: usize = 20;

/// The token name used when the client does not name its device at log-in.
pub const DEFAULT_TOKEN_NAME: &str = "api-token";

/// An access token as stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    /// The ID of the token, also the prefix of the plain text token.
    pub id: TokenId,
    /// The user that the token authenticates as.
    pub user_id: UserID,
    /// A label for the token, usually the name of the client device.
    pub name: String,
    /// Hex encoded SHA-256 digest of the token secret.
    pub token_hash: String,
    /// When the token was issued.
    pub created_at: OffsetDateTime,
    /// When the token last authenticated a request.
    pub last_used_at: Option<OffsetDateTime>,
    /// When the token stops being accepted. `None` means never.
    pub expires_at: Option<OffsetDateTime>,
}

impl AccessToken {
    /// Whether the token is past its expiry time at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A freshly issued token together with the plain text form to give to the client.
///
/// The plain text token cannot be recovered after this value is dropped.
#[derive(Debug)]
pub struct IssuedToken {
    /// The stored token.
    pub access_token: AccessToken,
    /// The token to send to the client, e.g. "3|9f86d081884c7d659a2feaa0c55ad015a3bf4f1b".
    pub plain_text: String,
}

/// Create the access token table.
///
/// Deleting a user deletes their tokens.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_token_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS access_token (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                expires_at TEXT,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Issue a new token for `user_id`.
///
/// If `lifetime` is set, the token expires `lifetime` after it is issued,
/// otherwise it lasts until it is deleted.
///
/// # Errors
/// Returns an [Error::SqlError] if the token could not be stored.
pub fn issue_token(
    user_id: UserID,
    name: &str,
    lifetime: Option<Duration>,
    connection: &Connection,
) -> Result<IssuedToken, Error> {
    let secret = generate_secret();
    let created_at = OffsetDateTime::now_utc();
    let expires_at = lifetime.map(|lifetime| created_at + lifetime);

    let access_token = connection
        .prepare(
            "INSERT INTO access_token (user_id, name, token_hash, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, user_id, name, token_hash, created_at, last_used_at, expires_at",
        )?
        .query_row(
            (
                user_id.as_i64(),
                name,
                hash_secret(&secret),
                created_at,
                expires_at,
            ),
            map_token_row,
        )?;

    let plain_text = format!("{}|{secret}", access_token.id);

    Ok(IssuedToken {
        access_token,
        plain_text,
    })
}

/// Find the stored token matching the plain text token sent by a client.
///
/// Expiry is not checked here, see [AccessToken::is_expired_at].
///
/// # Errors
/// Returns an [Error::NotFound] if no stored token matches `plain_text`,
/// or an [Error::SqlError] if there is some other SQL error.
pub fn find_token(plain_text: &str, connection: &Connection) -> Result<AccessToken, Error> {
    let Some((raw_id, secret)) = plain_text.split_once('|') else {
        return connection
            .prepare(
                "SELECT id, user_id, name, token_hash, created_at, last_used_at, expires_at
                 FROM access_token WHERE token_hash = :token_hash",
            )?
            .query_row(&[(":token_hash", &hash_secret(plain_text))], map_token_row)
            .map_err(Error::from);
    };

    let id: TokenId = raw_id.parse().map_err(|_| Error::NotFound)?;

    let token = connection
        .prepare(
            "SELECT id, user_id, name, token_hash, created_at, last_used_at, expires_at
             FROM access_token WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_token_row)
        .optional()?
        .ok_or(Error::NotFound)?;

    let hash = hash_secret(secret);
    if bool::from(hash.as_bytes().ct_eq(token.token_hash.as_bytes())) {
        Ok(token)
    } else {
        Err(Error::NotFound)
    }
}

/// Record that the token `id` was just used to authenticate a request.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn mark_token_used(id: TokenId, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE access_token SET last_used_at = ?1 WHERE id = ?2",
        (OffsetDateTime::now_utc(), id),
    )?;

    Ok(())
}

type RowsAffected = usize;

/// Delete the token `id`. Other tokens of the same user are kept.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn delete_token(id: TokenId, connection: &Connection) -> Result<RowsAffected, Error> {
    connection
        .execute("DELETE FROM access_token WHERE id = :id", &[(":id", &id)])
        .map_err(Error::from)
}

/// Delete every token that expired before `cutoff`.
///
/// Returns the number of deleted tokens.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn delete_expired_tokens(
    cutoff: OffsetDateTime,
    connection: &Connection,
) -> Result<RowsAffected, Error> {
    connection
        .execute(
            "DELETE FROM access_token WHERE expires_at IS NOT NULL AND expires_at < ?1",
            (cutoff.to_offset(time::UtcOffset::UTC),),
        )
        .map_err(Error::from)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LENGTH_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn map_token_row(row: &Row) -> Result<AccessToken, rusqlite::Error> {
    Ok(AccessToken {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        name: row.get(2)?,
        token_hash: row.get(3)?,
        created_at: row.get(4)?,
        last_used_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        auth::{PasswordHash, User, create_user},
        db::initialize,
    };

    use super::{
        DEFAULT_TOKEN_NAME, delete_expired_tokens, delete_token, find_token, hash_secret,
        issue_token, mark_token_used,
    };

    fn get_test_connection() -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = create_user("alice", PasswordHash::new_unchecked("hunter2"), &conn).unwrap();

        (conn, user)
    }

    #[test]
    fn issued_token_can_be_found() {
        let (conn, user) = get_test_connection();

        let issued = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();
        let found = find_token(&issued.plain_text, &conn).unwrap();

        assert_eq!(found, issued.access_token);
        assert_eq!(found.user_id, user.id);
        assert_eq!(found.expires_at, None);
    }

    #[test]
    fn plain_text_has_id_prefix_and_secret() {
        let (conn, user) = get_test_connection();

        let issued = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();
        let (id, secret) = issued.plain_text.split_once('|').unwrap();

        assert_eq!(id, issued.access_token.id.to_string());
        assert_eq!(secret.len(), 40);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn only_the_digest_is_stored() {
        let (conn, user) = get_test_connection();

        let issued = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();
        let (_, secret) = issued.plain_text.split_once('|').unwrap();

        assert_ne!(issued.access_token.token_hash, secret);
        assert_eq!(issued.access_token.token_hash, hash_secret(secret));
    }

    #[test]
    fn tokens_are_unique() {
        let (conn, user) = get_test_connection();

        let first = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();
        let second = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();

        assert_ne!(first.plain_text, second.plain_text);
    }

    #[test]
    fn wrong_secret_is_not_found() {
        let (conn, user) = get_test_connection();
        let issued = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();

        let forged = format!("{}|{}", issued.access_token.id, "0".repeat(40));

        assert_eq!(find_token(&forged, &conn), Err(Error::NotFound));
    }

    #[test]
    fn malformed_token_is_not_found() {
        let (conn, _) = get_test_connection();

        assert_eq!(find_token("abc|def", &conn), Err(Error::NotFound));
        assert_eq!(find_token("no-separator", &conn), Err(Error::NotFound));
        assert_eq!(find_token("", &conn), Err(Error::NotFound));
    }

    #[test]
    fn token_with_lifetime_expires() {
        let (conn, user) = get_test_connection();

        let issued =
            issue_token(user.id, DEFAULT_TOKEN_NAME, Some(Duration::minutes(5)), &conn).unwrap();
        let token = issued.access_token;
        let expires_at = token.expires_at.unwrap();

        assert_eq!(expires_at - token.created_at, Duration::minutes(5));
        assert!(!token.is_expired_at(OffsetDateTime::now_utc()));
        assert!(token.is_expired_at(expires_at));
    }

    #[test]
    fn delete_removes_only_that_token() {
        let (conn, user) = get_test_connection();
        let first = issue_token(user.id, "phone", None, &conn).unwrap();
        let second = issue_token(user.id, "tablet", None, &conn).unwrap();

        let rows_affected = delete_token(first.access_token.id, &conn).unwrap();

        assert_eq!(rows_affected, 1);
        assert_eq!(find_token(&first.plain_text, &conn), Err(Error::NotFound));
        assert!(find_token(&second.plain_text, &conn).is_ok());
    }

    #[test]
    fn mark_used_sets_last_used_at() {
        let (conn, user) = get_test_connection();
        let issued = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();
        assert_eq!(issued.access_token.last_used_at, None);

        mark_token_used(issued.access_token.id, &conn).unwrap();

        let token = find_token(&issued.plain_text, &conn).unwrap();
        assert!(token.last_used_at.is_some());
    }

    #[test]
    fn prune_deletes_only_expired_tokens() {
        let (conn, user) = get_test_connection();
        let expired =
            issue_token(user.id, DEFAULT_TOKEN_NAME, Some(Duration::minutes(-10)), &conn)
                .unwrap();
        let fresh =
            issue_token(user.id, DEFAULT_TOKEN_NAME, Some(Duration::hours(1)), &conn).unwrap();
        let forever = issue_token(user.id, DEFAULT_TOKEN_NAME, None, &conn).unwrap();

        let deleted = delete_expired_tokens(OffsetDateTime::now_utc(), &conn).unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(find_token(&expired.plain_text, &conn), Err(Error::NotFound));
        assert!(find_token(&fresh.plain_text, &conn).is_ok());
        assert!(find_token(&forever.plain_text, &conn).is_ok());
    }
}
