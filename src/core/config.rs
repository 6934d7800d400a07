use std::env;
use std::str::FromStr;

pub const DEFAULT_FORMAT_MARKER: &str = ".format.";
pub const DEFAULT_FORMAT_MIN_LENGTH: usize = 100;
pub const DEFAULT_FORMAT_INSTRUCTION: &str = ", all responses should be formatted in html using h1,p,ul,li make sure not to use backticks indicating codeblocks.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_model: String,
    pub openai_api_hostname: String,
    pub openai_api_key: String,
    pub max_continuation_depth: usize,
    pub request_timeout_secs: u64,
    pub format_marker: String,
    pub format_min_length: usize,
    pub format_instruction: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(val) => val.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {}", key, val);
            default
        }),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let openai_api_hostname = env::var("AUDITOR_LLM_HOST")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let openai_api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("OPENAI_API_KEY is not set, requests to the model will fail");
            "thiswontworkforopenai".to_string()
        });
        let openai_model =
            env::var("AUDITOR_LLM_MODEL").unwrap_or_else(|_| "gpt-4-1106-preview".to_string());
        let max_continuation_depth = env_or("AUDITOR_MAX_CONTINUATION_DEPTH", 4);
        let request_timeout_secs = env_or("AUDITOR_REQUEST_TIMEOUT_SECS", 60 * 5);
        let format_marker = env::var("AUDITOR_FORMAT_MARKER")
            .unwrap_or_else(|_| DEFAULT_FORMAT_MARKER.to_string());
        let format_min_length = env_or("AUDITOR_FORMAT_MIN_LENGTH", DEFAULT_FORMAT_MIN_LENGTH);
        let format_instruction = env::var("AUDITOR_FORMAT_INSTRUCTION")
            .unwrap_or_else(|_| DEFAULT_FORMAT_INSTRUCTION.to_string());

        Self {
            openai_model,
            openai_api_hostname,
            openai_api_key,
            max_continuation_depth,
            request_timeout_secs,
            format_marker,
            format_min_length,
            format_instruction,
        }
    }
}
