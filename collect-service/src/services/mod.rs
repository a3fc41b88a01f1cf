pub mod broker;
pub mod metrics;
pub mod notifier;
pub mod psk;
pub mod sessions;
pub mod tokens;

pub use broker::{MockTrustBroker, StsTrustBroker, TrustBroker};
pub use self::metrics::{get_metrics, init_metrics};
pub use notifier::{CompletionNotifier, LogNotifier, SlackWebhookNotifier};
pub use psk::{PskStore, SecretSource, SsmParameterSource, StaticSecretSource};
pub use sessions::{SessionService, SessionSettings};
pub use tokens::TokenEngine;
