use std::fmt;
use std::time::Duration;

use common::DEFAULT_MAX_FRAME_BYTES;

use crate::OPENAI_API_CHAT_COMPLETIONS_URL;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Clone)]
pub struct RelayConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_frame_bytes: usize,
    pub connect_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: OPENAI_API_CHAT_COMPLETIONS_URL.to_string(),
            api_key: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Default settings with the API key taken from `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(OPENAI_API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
            ..Self::default()
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
