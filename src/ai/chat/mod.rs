pub mod core;
pub use self::core::{Relay, RelayBuilder, RelayError, RelayStream};

pub mod models;
pub use models::{FunctionCallEvent, PendingFunctionCall};
