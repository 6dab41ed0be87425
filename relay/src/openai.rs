use async_stream::stream;
use bytes::Bytes;
use common::{DONE_MESSAGE, DecoderState, SseDecoder, UpstreamEvent};
use futures::StreamExt;
use futures::stream::Stream;
use request::RelayRequest;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use response::parse_delta_content;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{RelayConfig, RelayError, TextStream};

pub const OPENAI_API_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct StreamRelay {
    client: reqwest::Client,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        let client = builder.build().map_err(RelayError::Client)?;

        Ok(Self::with_client(client, config))
    }

    /// Uses a caller-configured client, e.g. one with an overall request timeout.
    pub fn with_client(client: reqwest::Client, config: RelayConfig) -> Self {
        if config.api_key.is_none() {
            warn!("No API key configured, upstream requests will be unauthenticated");
        }

        Self { client, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Sends `payload` upstream with streaming enabled and returns the decoded
    /// content deltas. Every call opens its own upstream connection; dropping the
    /// returned stream closes it.
    pub async fn open(&self, payload: RelayRequest) -> Result<TextStream, RelayError> {
        let relay_id = Uuid::new_v4();
        debug!(
            %relay_id,
            "Starting chat completion stream with model: {}",
            payload.model().unwrap_or("<unset>")
        );

        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload.streaming())
            .send()
            .await
            .map_err(|e| {
                error!(%relay_id, "Failed to reach upstream: {}", e);
                RelayError::Transport(e)
            })?;

        let status = response.status();
        debug!(%relay_id, "Upstream response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%relay_id, "Upstream API error: {} - {}", status, body);
            return Err(RelayError::UpstreamRejected { status, body });
        }

        info!(%relay_id, "Connected to upstream, relaying stream");

        Ok(relay_event_stream(
            response.bytes_stream(),
            self.config.max_frame_bytes,
            relay_id,
        ))
    }
}

/// Decodes an upstream SSE body into content deltas.
///
/// The body is polled only when the consumer asks for the next chunk and the
/// decoder has no complete frame buffered. The stream ends after `[DONE]`, at the
/// end of the body, or right after yielding the first error. Every log line is
/// tagged with `relay_id`.
pub fn relay_event_stream<S>(body: S, max_frame_bytes: usize, relay_id: Uuid) -> TextStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let stream = stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new(max_frame_bytes);

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) if decoder.state() == DecoderState::Closed => {
                    info!(%relay_id, "Upstream closed without [DONE], ending stream");
                    break;
                }
                Ok(None) => {
                    match body.next().await {
                        Some(Ok(bytes)) => {
                            trace!(%relay_id, "Received {} bytes from upstream", bytes.len());
                            decoder.feed(&bytes);
                        }
                        Some(Err(e)) => {
                            error!(%relay_id, "Upstream transport error: {}", e);
                            yield Err(RelayError::Transport(e));
                            break;
                        }
                        None => decoder.finish(),
                    }
                    continue;
                }
                Err(e) => {
                    error!(%relay_id, "Failed to decode upstream frame: {}", e);
                    yield Err(RelayError::MalformedEvent {
                        reason: e.to_string(),
                        data: String::new(),
                    });
                    break;
                }
            };

            let data = match frame {
                UpstreamEvent::Event { event, id, data } => {
                    trace!(%relay_id, ?event, ?id, "Decoded upstream frame");
                    data
                }
                UpstreamEvent::ReconnectInterval(millis) => {
                    debug!(%relay_id, "Ignoring upstream retry hint of {}ms", millis);
                    continue;
                }
            };

            if data == DONE_MESSAGE {
                info!(%relay_id, "Stream finished with [DONE]");
                decoder.close();
                break;
            }

            match parse_delta_content(&data) {
                Ok(content) if content.is_empty() => trace!(%relay_id, "Empty delta"),
                Ok(content) => yield Ok(Bytes::from(content)),
                Err(e) => {
                    error!(%relay_id, "Malformed upstream event: {} - {}", e, data);
                    yield Err(RelayError::MalformedEvent {
                        reason: e.to_string(),
                        data,
                    });
                    break;
                }
            }
        }
    };

    stream.boxed()
}
