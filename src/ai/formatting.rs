//! Decides whether the last user turn gets an instruction asking the
//! model to answer in HTML.
//!
//! Callers pick a [`FormatPolicy`] per request. `Auto` keeps the old
//! content sniffing rules, with the thresholds taken from config.

use serde::{Deserialize, Serialize};

use crate::core::AppConfig;
use crate::core::config::{
    DEFAULT_FORMAT_INSTRUCTION, DEFAULT_FORMAT_MARKER, DEFAULT_FORMAT_MIN_LENGTH,
};
use crate::openai::Message;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatPolicy {
    /// Infer from the content of the last message
    #[default]
    Auto,
    Html,
    Plain,
}

#[derive(Clone, Debug)]
pub struct FormatRules {
    pub marker: String,
    pub min_length: usize,
    pub instruction: String,
}

impl Default for FormatRules {
    fn default() -> Self {
        Self {
            marker: DEFAULT_FORMAT_MARKER.to_string(),
            min_length: DEFAULT_FORMAT_MIN_LENGTH,
            instruction: DEFAULT_FORMAT_INSTRUCTION.to_string(),
        }
    }
}

impl FormatRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            marker: config.format_marker.clone(),
            min_length: config.format_min_length,
            instruction: config.format_instruction.clone(),
        }
    }

    /// The content heuristic used by `FormatPolicy::Auto`.
    pub fn wants_html(&self, content: &str) -> bool {
        content.contains(&self.marker)
            || (content.chars().count() > self.min_length && content.contains('.'))
    }

    /// Append the formatting instruction to the last message when the
    /// policy calls for it. Returns true if the conversation changed.
    pub fn apply(&self, policy: FormatPolicy, conversation: &mut [Message]) -> bool {
        let Some(last) = conversation.last_mut() else {
            return false;
        };

        let html = match policy {
            FormatPolicy::Auto => self.wants_html(&last.content),
            FormatPolicy::Html => true,
            FormatPolicy::Plain => false,
        };

        // Never stack the instruction if the client resends a turn
        // that was already rewritten
        if !html || last.content.ends_with(&self.instruction) {
            return false;
        }

        last.content.push_str(&self.instruction);
        true
    }
}
