use axum::{Extension, Json};
use serde_json::{Value, json};

use crate::auth::middleware::Session;

/// Describe the user that the bearer token authenticates as.
///
/// Lets the client check whether its stored token is still accepted.
pub async fn get_me(Extension(session): Extension<Session>) -> Json<Value> {
    Json(json!({
        "status": "authenticated",
        "user": {
            "id": session.user.id,
            "username": session.user.username,
        },
    }))
}
