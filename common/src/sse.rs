//! Incremental decoder for `text/event-stream` bodies.
//!
//! The decoder is pull based: callers [`feed`](SseDecoder::feed) raw bytes as they
//! arrive and repeatedly ask for [`next_frame`](SseDecoder::next_frame) until it
//! reports that more input is needed. Buffered bytes are only interpreted on demand,
//! so once the decoder is closed nothing left in the buffer is ever looked at.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};

const BYTE_ORDER_MARK: &[u8] = b"\xEF\xBB\xBF";

/// A frame dispatched by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A data-bearing frame, terminated by a blank line.
    Event {
        event: Option<String>,
        id: Option<String>,
        data: String,
    },
    /// A `retry:` field, dispatched as soon as it is read.
    ReconnectInterval(u64),
}

impl UpstreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            UpstreamEvent::Event { .. } => "event",
            UpstreamEvent::ReconnectInterval(_) => "reconnect-interval",
        }
    }
}

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No field of the current frame has been read yet.
    ReadingLines,
    /// At least one field was read; waiting for the blank line ending the frame.
    AwaitingBlank,
    /// A frame is ready to be handed out.
    DispatchFrame,
    Closed,
    Errored,
}

/// Failures that stop the decoder for good.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("SSE frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    id: Option<String>,
    data: String,
    has_data: bool,
    fields_seen: bool,
}

impl PendingFrame {
    fn len(&self) -> usize {
        self.data.len()
            + self.event.as_ref().map_or(0, String::len)
            + self.id.as_ref().map_or(0, String::len)
    }
}

/// Line-oriented SSE decoder bounded by `max_frame_bytes` per line and per frame.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    scanned: usize,
    skip_line_feed: bool,
    first_line: bool,
    at_eof: bool,
    state: DecoderState,
    frame: PendingFrame,
    ready: Option<UpstreamEvent>,
    max_frame_bytes: usize,
    error: Option<DecodeError>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            skip_line_feed: false,
            first_line: true,
            at_eof: false,
            state: DecoderState::ReadingLines,
            frame: PendingFrame::default(),
            ready: None,
            max_frame_bytes,
            error: None,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Appends raw upstream bytes. Input after the decoder closed or errored is dropped.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.is_terminal() || self.at_eof {
            trace!("Ignoring {} bytes fed to a finished decoder", bytes.len());
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Marks the end of upstream input. Complete frames already buffered are still
    /// returned by `next_frame`; an unterminated trailing frame is discarded.
    pub fn finish(&mut self) {
        self.at_eof = true;
    }

    /// Closes the decoder without interpreting anything still buffered.
    pub fn close(&mut self) {
        if self.state != DecoderState::Errored {
            self.state = DecoderState::Closed;
        }
        self.buffer.clear();
        self.ready = None;
    }

    /// Returns the next dispatched frame, `Ok(None)` when more input is needed or
    /// the decoder is closed.
    pub fn next_frame(&mut self) -> Result<Option<UpstreamEvent>, DecodeError> {
        loop {
            match self.state {
                DecoderState::Closed => return Ok(None),
                DecoderState::Errored => {
                    return Err(self.error.clone().unwrap_or(DecodeError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    }));
                }
                DecoderState::DispatchFrame => {
                    let event = self.ready.take();
                    self.state = self.resume_state();
                    if let Some(event) = event {
                        trace!("Dispatching {} frame", event.event_type());
                        return Ok(Some(event));
                    }
                }
                DecoderState::ReadingLines | DecoderState::AwaitingBlank => {
                    match self.take_line() {
                        Some(line) if line.len() > self.max_frame_bytes => {
                            return Err(self.fail());
                        }
                        Some(line) => self.process_line(&line)?,
                        None if self.at_eof => {
                            if self.frame.fields_seen || !self.buffer.is_empty() {
                                debug!("Discarding unterminated frame at end of stream");
                            }
                            self.close();
                            return Ok(None);
                        }
                        None if self.buffer.len() > self.max_frame_bytes => {
                            return Err(self.fail());
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, DecoderState::Closed | DecoderState::Errored)
    }

    fn resume_state(&self) -> DecoderState {
        if self.frame.fields_seen {
            DecoderState::AwaitingBlank
        } else {
            DecoderState::ReadingLines
        }
    }

    fn fail(&mut self) -> DecodeError {
        let error = DecodeError::FrameTooLarge {
            limit: self.max_frame_bytes,
        };
        self.state = DecoderState::Errored;
        self.error = Some(error.clone());
        self.buffer.clear();
        self.frame = PendingFrame::default();
        error
    }

    fn take_line(&mut self) -> Option<BytesMut> {
        if self.skip_line_feed {
            if self.buffer.is_empty() {
                return None;
            }
            // The previous line ended in `\r`; a following `\n` belongs to it.
            if self.buffer[0] == b'\n' {
                self.buffer.advance(1);
            }
            self.skip_line_feed = false;
        }

        let Some(end) = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
            .map(|offset| offset + self.scanned)
        else {
            self.scanned = self.buffer.len();
            return None;
        };

        self.skip_line_feed = self.buffer[end] == b'\r';
        let mut line = self.buffer.split_to(end);
        self.buffer.advance(1);
        self.scanned = 0;

        if self.first_line {
            self.first_line = false;
            if line.starts_with(BYTE_ORDER_MARK) {
                line.advance(BYTE_ORDER_MARK.len());
            }
        }

        Some(line)
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), DecodeError> {
        if line.is_empty() {
            self.end_frame();
            return Ok(());
        }

        if line[0] == b':' {
            trace!("Skipping SSE comment line");
            return Ok(());
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.find(':') {
            Some(index) => {
                let value = &text[index + 1..];
                (&text[..index], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&text[..], ""),
        };

        self.frame.fields_seen = true;
        self.state = DecoderState::AwaitingBlank;

        match field {
            "data" => {
                if self.frame.has_data {
                    self.frame.data.push('\n');
                }
                self.frame.data.push_str(value);
                self.frame.has_data = true;
            }
            "event" => self.frame.event = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.frame.id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty()
                    && value.bytes().all(|b| b.is_ascii_digit())
                    && let Ok(millis) = value.parse::<u64>()
                {
                    self.ready = Some(UpstreamEvent::ReconnectInterval(millis));
                    self.state = DecoderState::DispatchFrame;
                }
            }
            other => trace!("Ignoring unknown SSE field: {}", other),
        }

        if self.frame.len() > self.max_frame_bytes {
            return Err(self.fail());
        }

        Ok(())
    }

    fn end_frame(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        if frame.has_data {
            self.ready = Some(UpstreamEvent::Event {
                event: frame.event,
                id: frame.id,
                data: frame.data,
            });
            self.state = DecoderState::DispatchFrame;
        } else {
            self.state = DecoderState::ReadingLines;
        }
    }
}
