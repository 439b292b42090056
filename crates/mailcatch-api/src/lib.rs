//! MailCatch API - Read access to captured mail
//!
//! Lists the weekly indexes and serves decoded message artifacts behind a
//! shared secret.

pub mod auth;
pub mod handlers;
pub mod reader;
pub mod routes;

pub use auth::AppState;
pub use reader::{MailReader, MessageLink, SummaryView};
pub use routes::create_router;
