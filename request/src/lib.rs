use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload forwarded to the chat-completion endpoint.
///
/// The relay does not interpret the payload; it only switches streaming on before
/// sending it upstream. Model id, messages and sampling parameters are whatever the
/// caller put in.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RelayRequest(Value);

impl RelayRequest {
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// Returns the payload with `"stream": true` set. Non-object payloads are
    /// passed through untouched and left for the upstream to reject.
    pub fn streaming(mut self) -> Self {
        if let Value::Object(map) = &mut self.0 {
            map.insert("stream".to_string(), Value::Bool(true));
        }
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.0.get("model").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RelayRequest {
    fn from(payload: Value) -> Self {
        Self(payload)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    pub messages: Vec<Message>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub content: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::System,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
        }
    }
}

impl ChatCompletionsRequest {
    pub fn builder(model: impl Into<String>) -> ChatCompletionsRequestBuilder {
        ChatCompletionsRequestBuilder::new(model)
    }
}

pub struct ChatCompletionsRequestBuilder {
    max_tokens: Option<i32>,
    messages: Vec<Message>,
    model: String,
    n: Option<i32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

impl ChatCompletionsRequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            max_tokens: None,
            messages: Vec::new(),
            model: model.into(),
            n: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn n(mut self, n: i32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn build(self) -> ChatCompletionsRequest {
        ChatCompletionsRequest {
            max_tokens: self.max_tokens,
            messages: self.messages,
            model: self.model,
            n: self.n,
            stream: Some(true),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

impl TryFrom<ChatCompletionsRequest> for RelayRequest {
    type Error = serde_json::Error;

    fn try_from(request: ChatCompletionsRequest) -> Result<Self, Self::Error> {
        serde_json::to_value(request).map(Self)
    }
}
