pub mod sse;

pub use sse::{DecodeError, DecoderState, SseDecoder, UpstreamEvent};

/// Upper bound for a single pending line or accumulated frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Data payload that terminates a chat-completion stream.
pub const DONE_MESSAGE: &str = "[DONE]";
