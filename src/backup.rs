//! Bulk import of the transactions kept in the client's local store.
//!
//! The client sends whatever it has on disk, so every element is treated as an
//! untyped document and missing fields fall back to alternative keys or
//! defaults rather than failing the backup.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State, rejection::JsonRejection},
};
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::{
    AppState, Error, ValidationErrors, json_message,
    timezone::get_local_date,
    transaction::{NewTransaction, coerce_total, create_transaction, truncate_date},
    validation::required_message,
};

const DATE_KEYS: [&str; 3] = ["date", "transaction_date", "created_at"];
const TOTAL_KEYS: [&str; 2] = ["total", "total_price"];

/// The state needed to restore a backup.
#[derive(Debug, Clone)]
pub struct BackupState {
    /// The database connection for storing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The timezone used to date transactions that carry no date.
    pub local_timezone: String,
}

impl FromRef<AppState> for BackupState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// A route handler that stores every transaction in the uploaded backup.
///
/// Each element is written on its own, in order, so a failure part way
/// through keeps the transactions already written.
///
/// # Errors
///
/// Returns [Error::Validation] if `transactions` is not a list.
pub async fn post_backup(
    State(state): State<BackupState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(body) = payload?;
    let documents = extract_documents(&body)?;

    let today = get_local_date(&state.local_timezone)
        .ok_or_else(|| Error::InvalidTimezoneError(state.local_timezone.clone()))?
        .to_string();

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    for (index, document) in documents.iter().enumerate() {
        let new_transaction = resolve_transaction(document.as_object(), &today, index);
        create_transaction(new_transaction, &connection).inspect_err(|error| {
            tracing::error!("Could not store backup transaction {index}: {error}")
        })?;
    }

    tracing::info!("Restored {} transactions from backup", documents.len());

    Ok(json_message("Backup to database was successful"))
}

fn extract_documents(body: &Value) -> Result<&[Value], ValidationErrors> {
    let mut errors = ValidationErrors::default();

    match body.get("transactions") {
        Some(Value::Array(documents)) => return Ok(documents.as_slice()),
        Some(Value::Null) | None => errors.add("transactions", required_message("transactions")),
        Some(_) => errors.add("transactions", "The transactions field must be an array."),
    }

    Err(errors)
}

/// Build a transaction from a backup document, filling in defaults for
/// anything missing. A non-object document is treated as empty.
fn resolve_transaction(
    document: Option<&Map<String, Value>>,
    today: &str,
    index: usize,
) -> NewTransaction {
    let first_present = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| document?.get(*key).filter(|value| !value.is_null()))
    };

    let date = match first_present(&DATE_KEYS) {
        Some(Value::String(date)) => truncate_date(date),
        Some(other) => truncate_date(&other.to_string()),
        None => today.to_owned(),
    };

    let total = match first_present(&TOTAL_KEYS) {
        Some(value) => coerce_total(value).unwrap_or_else(|| {
            tracing::warn!(
                "Backup transaction {index} has a total that is not a number ({value}), storing 0"
            );
            0
        }),
        None => 0,
    };

    let items = first_present(&["items"])
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    NewTransaction::new(&date, total).items(items)
}
