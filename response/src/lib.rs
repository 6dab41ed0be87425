use serde::Deserialize;
use thiserror::Error;

/// One `chat.completion.chunk` object carried in an upstream data frame.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<Choice>,
    pub created: Option<i64>,
    pub id: Option<String>,
    pub model: Option<String>,
    pub object: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub delta: Option<Delta>,
    pub finish_reason: Option<String>,
    pub index: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunk JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chunk has no choices")]
    NoChoices,
}

impl ChatCompletionChunk {
    /// Content delta of the first choice. A missing delta or a delta without
    /// `content` is an empty tick, not an error.
    pub fn first_delta_content(&self) -> Result<&str, ChunkError> {
        let choice = self.choices.first().ok_or(ChunkError::NoChoices)?;
        Ok(choice
            .delta
            .as_ref()
            .and_then(|delta| delta.content.as_deref())
            .unwrap_or_default())
    }
}

/// Parses a data frame payload and returns the first choice's content delta.
pub fn parse_delta_content(data: &str) -> Result<String, ChunkError> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    chunk.first_delta_content().map(str::to_string)
}
