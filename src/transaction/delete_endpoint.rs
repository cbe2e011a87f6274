use axum::{
    Json,
    extract::{Path, State, rejection::PathRejection},
};
use serde_json::Value;

use crate::{
    Error,
    database_id::TransactionId,
    json_message,
    transaction::core::{TransactionState, delete_transaction},
};

/// A route handler for deleting a transaction.
///
/// # Errors
///
/// Returns [Error::DeleteMissingTransaction] if the path does not name a
/// stored transaction.
pub async fn delete_transaction_endpoint(
    State(state): State<TransactionState>,
    transaction_id: Result<Path<TransactionId>, PathRejection>,
) -> Result<Json<Value>, Error> {
    let Ok(Path(transaction_id)) = transaction_id else {
        return Err(Error::DeleteMissingTransaction);
    };

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    delete_transaction(transaction_id, &connection).inspect_err(|error| {
        if *error != Error::DeleteMissingTransaction {
            tracing::error!("Could not delete transaction {transaction_id}: {error}");
        }
    })?;
    tracing::info!("Deleted transaction {transaction_id}");

    Ok(json_message("Transaction deleted"))
}
