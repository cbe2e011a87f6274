//! Defines the core data models and database queries for transactions.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use rusqlite::{Connection, Row, types::Type};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{AppState, Error, database_id::TransactionId};

/// The number of characters in a `YYYY-MM-DD` date.
pub const DATE_LENGTH: usize = 10;

// ============================================================================
// MODELS
// ============================================================================

/// A sale recorded by the client: a dated total with the items that were sold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// When the sale happened, as `YYYY-MM-DD`.
    pub date: String,
    /// The total of the sale in whole currency units.
    pub total: i64,
    /// The items that were sold.
    ///
    /// The shape of each item is owned by the client, the server stores it as is.
    pub items: Value,
    /// When the transaction was stored.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the transaction was last modified.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The fields needed to store a new [Transaction].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// The date of the sale, truncated to [DATE_LENGTH] characters on insert.
    pub date: String,
    /// The total of the sale.
    pub total: i64,
    /// The items that were sold.
    pub items: Value,
}

impl NewTransaction {
    /// Create a transaction with no items.
    pub fn new(date: &str, total: i64) -> Self {
        Self {
            date: date.to_owned(),
            total,
            items: Value::Array(Vec::new()),
        }
    }

    /// Set the items of the transaction.
    pub fn items(mut self, items: Value) -> Self {
        self.items = items;
        self
    }
}

/// A partial update to a [Transaction]. `None` leaves the stored field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionChanges {
    /// The new date, truncated to [DATE_LENGTH] characters on update.
    pub date: Option<String>,
    /// The new total.
    pub total: Option<i64>,
    /// The new items.
    pub items: Option<Value>,
}

/// The response body for a created or updated transaction.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// A human readable description of what happened.
    pub message: &'static str,
    /// The transaction as stored.
    pub data: Transaction,
}

/// The state needed by the transaction route handlers.
#[derive(Debug, Clone)]
pub struct TransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for TransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// Cut `raw_date` down to its first [DATE_LENGTH] characters, dropping any time component.
pub fn truncate_date(raw_date: &str) -> String {
    raw_date.chars().take(DATE_LENGTH).collect()
}

/// Read `value` the way the integer `total` column stores it.
///
/// Integers are kept, floats without a fractional part and numeric strings
/// are converted. Returns `None` for anything else.
pub fn coerce_total(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                .map(|float| float as i64)
        }),
        Value::String(string) => {
            let trimmed = string.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                    .map(|float| float as i64)
            })
        }
        _ => None,
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create a new transaction in the database.
///
/// # Errors
/// This function will return a:
/// - [Error::JSONSerializationError] if the items could not be serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    new_transaction: NewTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let items = serialize_items(&new_transaction.items)?;
    let now = OffsetDateTime::now_utc();

    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\" (date, total, items, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING id, date, total, items, created_at, updated_at",
        )?
        .query_row(
            (
                truncate_date(&new_transaction.date),
                new_transaction.total,
                items,
                now,
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, date, total, items, created_at, updated_at
             FROM \"transaction\" WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Retrieve every transaction, newest first.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn list_transactions(connection: &Connection) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(
            "SELECT id, date, total, items, created_at, updated_at
             FROM \"transaction\" ORDER BY created_at DESC, id DESC",
        )?
        .query_map([], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Apply `changes` to the transaction `id` and return the updated transaction.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingTransaction] if `id` does not refer to a valid transaction,
/// - [Error::JSONSerializationError] if the items could not be serialized,
/// - or [Error::SqlError] there is some other SQL error.
pub fn update_transaction(
    id: TransactionId,
    changes: TransactionChanges,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let items = changes.items.as_ref().map(serialize_items).transpose()?;
    let date = changes.date.as_deref().map(truncate_date);

    connection
        .prepare(
            "UPDATE \"transaction\"
            SET \
                date = COALESCE(?1, date), \
                total = COALESCE(?2, total), \
                items = COALESCE(?3, items), \
                updated_at = ?4 \
            WHERE id = ?5
            RETURNING id, date, total, items, created_at, updated_at",
        )?
        .query_row(
            (date, changes.total, items, OffsetDateTime::now_utc(), id),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingTransaction,
            error => error.into(),
        })
}

type RowsAffected = usize;

/// Delete the transaction `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::DeleteMissingTransaction] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn delete_transaction(id: TransactionId, connection: &Connection) -> Result<(), Error> {
    let rows_affected: RowsAffected = connection.execute(
        "DELETE FROM \"transaction\" WHERE id = :id",
        &[(":id", &id)],
    )?;

    match rows_affected {
        0 => Err(Error::DeleteMissingTransaction),
        _ => Ok(()),
    }
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                total INTEGER NOT NULL,
                items TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_created_at ON \"transaction\"(created_at);",
        (),
    )?;

    Ok(())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let raw_items: String = row.get(3)?;
    let items = serde_json::from_str(&raw_items)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error)))?;

    Ok(Transaction {
        id: row.get(0)?,
        date: row.get(1)?,
        total: row.get(2)?,
        items,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn serialize_items(items: &Value) -> Result<String, Error> {
    serde_json::to_string(items).map_err(|error| Error::JSONSerializationError(error.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
