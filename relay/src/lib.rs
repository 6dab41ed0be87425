//! # Stream relay
//!
//! Bridges one streaming chat-completion response from an OpenAI-compatible
//! endpoint to one outgoing byte stream carrying only the generated text.
//!
//! ```no_run
//! use futures::StreamExt;
//! use relay::{RelayConfig, StreamRelay};
//! use request::{ChatCompletionsRequest, Message, RelayRequest};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let relay = StreamRelay::new(RelayConfig::from_env())?;
//! let payload = ChatCompletionsRequest::builder("gpt-3.5-turbo")
//!     .message(Message::user("Tell me a joke."))
//!     .build();
//!
//! let mut stream = relay.open(RelayRequest::try_from(payload)?).await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", String::from_utf8_lossy(&chunk?));
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use request::RelayRequest;

mod config;
pub mod error;
mod openai;

pub use config::{OPENAI_API_KEY_ENV, RelayConfig};
pub use error::RelayError;
pub use openai::{OPENAI_API_CHAT_COMPLETIONS_URL, StreamRelay, relay_event_stream};

/// Decoded content deltas, in upstream arrival order.
pub type TextStream = BoxStream<'static, Result<Bytes, RelayError>>;

#[async_trait]
pub trait Relay: Send + Sync {
    async fn open(&self, payload: RelayRequest) -> Result<TextStream, RelayError>;
}

#[async_trait]
impl Relay for StreamRelay {
    async fn open(&self, payload: RelayRequest) -> Result<TextStream, RelayError> {
        StreamRelay::open(self, payload).await
    }
}

/// Drains a stream into the full generated text, failing on the first error.
pub async fn collect_text(mut stream: TextStream) -> Result<String, RelayError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&String::from_utf8_lossy(&chunk?));
    }
    Ok(text)
}
