pub mod health;
pub mod sessions;

pub use health::{health_check, metrics_endpoint};
pub use sessions::{complete_session, not_found, start_session};
