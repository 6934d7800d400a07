//! Function calls issued by the model mid stream.
use serde_json::Value;

use super::RelayError;
use crate::ai::tools::CONTRACT_CODE_ARG;
use crate::openai::{Message, Role};

/// A complete function call requested by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCallEvent {
    pub name: String,
    pub arguments: Value,
}

impl FunctionCallEvent {
    pub fn contract_code(&self) -> Option<&str> {
        self.arguments.get(CONTRACT_CODE_ARG)?.as_str()
    }

    /// The synthetic turn that answers this call in the continuation.
    pub fn continuation_message(&self) -> Result<Message, RelayError> {
        let code = self
            .contract_code()
            .ok_or_else(|| RelayError::MissingContractCode(self.name.clone()))?;
        Ok(Message::new(Role::User, code))
    }
}

/// Collects function call fragments until the model stops sending
/// them.
#[derive(Debug, Default)]
pub struct PendingFunctionCall {
    name: String,
    arguments: String,
}

impl PendingFunctionCall {
    pub fn push(&mut self, name: Option<&str>, arguments: &str) {
        if let Some(name) = name {
            self.name.push_str(name);
        }
        self.arguments.push_str(arguments);
    }

    pub fn finish(self) -> Result<FunctionCallEvent, RelayError> {
        if self.name.is_empty() {
            return Err(RelayError::MalformedFunctionCall(String::from(
                "function call without a name",
            )));
        }

        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                RelayError::MalformedFunctionCall(format!(
                    "arguments for `{}` are not valid JSON: {}",
                    self.name, e
                ))
            })?
        };

        Ok(FunctionCallEvent {
            name: self.name,
            arguments,
        })
    }
}
