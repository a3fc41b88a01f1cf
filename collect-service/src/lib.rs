//! collect-service: brokers write-only, prefix-scoped upload credentials to
//! anonymous clients holding a signed campaign token.
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application, build_router};
