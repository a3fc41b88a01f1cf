pub mod sessions;

pub use sessions::{CompleteResponse, CredentialsResponse, SessionRequest, SessionResponse};
