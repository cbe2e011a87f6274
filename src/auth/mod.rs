mod log_in;
mod log_out;
mod me;
mod middleware;
mod password;
mod token;
mod user;

pub use log_in::post_log_in;
pub use log_out::post_log_out;
pub use me::get_me;
pub use middleware::auth_guard;
pub use password::{PasswordHash, ValidatedPassword};
pub use token::{create_token_table, delete_expired_tokens};
pub use user::{
    User, UserID, create_user, create_user_table, get_user_by_id, get_user_by_username,
};
