//! Transactions recorded by the cash register.
//!
//! This module contains everything related to transactions:
//! - The `Transaction` model and its request payloads
//! - Database functions for storing, querying, and managing transactions
//! - The JSON route handlers for the transaction resource

mod core;
mod create_endpoint;
mod delete_endpoint;
mod edit_endpoint;
mod list_endpoint;

pub use core::{
    NewTransaction, coerce_total, create_transaction, create_transaction_table, truncate_date,
};
pub use create_endpoint::create_transaction_endpoint;
pub use delete_endpoint::delete_transaction_endpoint;
pub use edit_endpoint::edit_transaction_endpoint;
pub use list_endpoint::list_transactions_endpoint;

#[cfg(test)]
pub use core::{count_transactions, list_transactions};
