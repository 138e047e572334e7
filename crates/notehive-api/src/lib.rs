pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod mailer;
pub mod middleware;
pub mod notes;
pub mod oauth;
pub mod password_reset;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{AppState, AppStateInner};
