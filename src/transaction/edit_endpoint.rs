use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::PathRejection},
};
use serde_json::Value;

use crate::{
    Error, ValidationErrors,
    database_id::TransactionId,
    transaction::core::{
        TransactionChanges, TransactionResponse, TransactionState, coerce_total,
        get_transaction, update_transaction,
    },
};

/// A route handler for changing some or all of the fields of a transaction.
///
/// Fields that are absent or `null` keep their stored value. An empty body
/// changes nothing but `updated_at`.
///
/// # Errors
///
/// Returns [Error::UpdateMissingTransaction] if the path does not name a
/// stored transaction, checked before the body is looked at, or
/// [Error::Validation] if a field cannot be stored.
pub async fn edit_transaction_endpoint(
    State(state): State<TransactionState>,
    transaction_id: Result<Path<TransactionId>, PathRejection>,
    body: Bytes,
) -> Result<Json<TransactionResponse>, Error> {
    let Ok(Path(transaction_id)) = transaction_id else {
        return Err(Error::UpdateMissingTransaction);
    };

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    get_transaction(transaction_id, &connection).map_err(|error| match error {
        Error::NotFound => Error::UpdateMissingTransaction,
        error => error,
    })?;

    let changes = parse_body(&body)?;
    let transaction = update_transaction(transaction_id, changes, &connection)?;
    tracing::info!("Updated transaction {transaction_id}");

    Ok(Json(TransactionResponse {
        message: "Transaction updated",
        data: transaction,
    }))
}

fn parse_body(body: &[u8]) -> Result<TransactionChanges, Error> {
    if body.trim_ascii().is_empty() {
        return Ok(TransactionChanges::default());
    }

    let body: Value =
        serde_json::from_slice(body).map_err(|error| Error::InvalidJson(error.to_string()))?;

    parse_changes(&body).map_err(Error::from)
}

fn parse_changes(body: &Value) -> Result<TransactionChanges, ValidationErrors> {
    let Some(fields) = body.as_object() else {
        return Ok(TransactionChanges::default());
    };
    let field = |name: &str| fields.get(name).filter(|value| !value.is_null());
    let mut errors = ValidationErrors::default();
    let mut changes = TransactionChanges::default();

    match field("date") {
        Some(Value::String(date)) => changes.date = Some(date.clone()),
        Some(_) => errors.add("date", "The date field must be a string."),
        None => {}
    }

    match field("total").map(|total| (total, coerce_total(total))) {
        Some((_, Some(total))) => changes.total = Some(total),
        Some((_, None)) => errors.add("total", "The total field must be an integer."),
        None => {}
    }

    changes.items = field("items").cloned();

    errors.into_result(changes)
}
