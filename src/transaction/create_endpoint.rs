use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::Value;
use time::{Date, macros::format_description};

use crate::{
    Error, ValidationErrors,
    transaction::core::{
        DATE_LENGTH, NewTransaction, TransactionResponse, TransactionState, create_transaction,
        truncate_date,
    },
    validation::required_message,
};

/// A route handler for creating a new transaction.
///
/// Responds with `201 Created` and the stored transaction.
///
/// # Errors
///
/// Returns a [Error::Validation] if `date`, `total` or `items` is missing or
/// has the wrong type. Nothing is stored in that case.
pub async fn create_transaction_endpoint(
    State(state): State<TransactionState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), Error> {
    let Json(body) = payload?;
    let new_transaction = validate_new_transaction(&body)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| Error::DatabaseLockError)?;
    let transaction = create_transaction(new_transaction, &connection)?;
    tracing::info!("Created transaction {}", transaction.id);

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Transaction saved",
            data: transaction,
        }),
    ))
}

fn validate_new_transaction(body: &Value) -> Result<NewTransaction, ValidationErrors> {
    let fields = body.as_object();
    let field = |name: &str| {
        fields
            .and_then(|fields| fields.get(name))
            .filter(|value| !value.is_null())
    };
    let mut errors = ValidationErrors::default();

    let date = match field("date") {
        Some(Value::String(date)) if date.trim().is_empty() => {
            errors.add("date", required_message("date"));
            None
        }
        Some(Value::String(date)) if is_calendar_date(date) => Some(truncate_date(date)),
        Some(_) => {
            errors.add("date", "The date field must be a valid date.");
            None
        }
        None => {
            errors.add("date", required_message("date"));
            None
        }
    };

    let total = match field("total") {
        Some(Value::String(total)) if total.trim().is_empty() => {
            errors.add("total", required_message("total"));
            None
        }
        Some(Value::Number(total)) if total.is_i64() => total.as_i64(),
        Some(Value::String(total)) if total.parse::<i64>().is_ok() => total.parse().ok(),
        Some(_) => {
            errors.add("total", "The total field must be an integer.");
            None
        }
        None => {
            errors.add("total", required_message("total"));
            None
        }
    };

    let items = match field("items") {
        Some(Value::Array(items)) => Some(Value::Array(items.clone())),
        Some(_) => {
            errors.add("items", "The items field must be an array.");
            None
        }
        None => {
            errors.add("items", required_message("items"));
            None
        }
    };

    match (date, total, items) {
        (Some(date), Some(total), Some(items)) if errors.is_empty() => {
            Ok(NewTransaction { date, total, items })
        }
        _ => Err(errors),
    }
}

/// Whether `raw_date` starts with a real `YYYY-MM-DD` calendar date, optionally
/// followed by a time after a `T` or a space.
fn is_calendar_date(raw_date: &str) -> bool {
    let date_part = truncate_date(raw_date);
    let is_valid_date = Date::parse(&date_part, format_description!("[year]-[month]-[day]")).is_ok();

    is_valid_date
        && matches!(
            raw_date.chars().nth(DATE_LENGTH),
            None | Some('T') | Some('t') | Some(' ')
        )
}
