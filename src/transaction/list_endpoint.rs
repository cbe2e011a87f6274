use axum::{Json, extract::State};

use crate::{
    Error,
    transaction::core::{Transaction, TransactionState, list_transactions},
};

/// A route handler that lists every stored transaction, most recently created first.
pub async fn list_transactions_endpoint(
    State(state): State<TransactionState>,
) -> Result<Json<Vec<Transaction>>, Error> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;

    list_transactions(&connection)
        .inspect_err(|error| tracing::error!("Could not list transactions: {error}"))
        .map(Json)
}
