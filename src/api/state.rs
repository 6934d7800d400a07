use crate::ai::chat::Relay;
use crate::ai::formatting::FormatRules;
use crate::core::AppConfig;
use crate::openai::SharedGateway;

/// Everything a request handler needs. Nothing in here changes after
/// startup so it is shared without a lock.
pub struct AppState {
    pub relay: Relay,
    pub format_rules: FormatRules,
}

impl AppState {
    pub fn new(config: &AppConfig, gateway: SharedGateway) -> Self {
        Self {
            relay: Relay::from_config(gateway, config),
            format_rules: FormatRules::from_config(config),
        }
    }
}
