use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

use super::retry::{format_error_parts, send_with_retry};
use super::{
    Message, MessagePart, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage,
    system_text,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_data(mut self, data: crate::data::DataAttachment) -> Self {
        self.messages.push(Message::user_data(data));
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move { call_with_responses(self).await })
    }
}

pub(crate) fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn call_with_responses(provider: OpenAI) -> Result<ProviderResponse> {
    let client = reqwest::Client::new();
    let url = format!("{}/responses", base_url());

    let system = system_text(&provider.messages);
    let input = provider
        .messages
        .iter()
        .filter(|message| matches!(message.role, MessageRole::User))
        .map(|message| {
            let parts = message
                .parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text(text) => json!({"type": "input_text", "text": text}),
                    MessagePart::Data(data) => {
                        let encoded = BASE64.encode(&data.bytes);
                        let url = format!("data:{};base64,{}", data.mime, encoded);
                        json!({"type": "input_image", "image_url": url})
                    }
                })
                .collect::<Vec<_>>();
            json!({"role": "user", "content": parts})
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": provider.model,
        "input": input,
    });
    if !system.trim().is_empty() {
        body["instructions"] = json!(system);
    }

    let text = send_with_retry(
        "OpenAI",
        || {
            client
                .post(&url)
                .bearer_auth(provider.key.clone())
                .json(&body)
        },
        extract_openai_error,
    )
    .await?;
    extract_response_text(&text, &provider.model)
}

fn extract_response_text(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: ResponseApiResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;

    let mut output = payload.output_text.unwrap_or_default();
    if output.trim().is_empty() {
        output = payload
            .output
            .iter()
            .filter_map(|item| match item {
                ResponseOutputItem::Message { content } => Some(content),
                ResponseOutputItem::Other => None,
            })
            .flatten()
            .filter_map(|part| match part {
                ResponseContent::OutputText { text } => Some(text.as_str()),
                ResponseContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    if output.trim().is_empty() {
        return Err(anyhow!("no text output returned from OpenAI"));
    }

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: output,
        model,
        usage,
    })
}

pub(crate) fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(&[
        error.message,
        error.kind.map(|kind| format!("type: {}", kind)),
        error.code.map(|code| format!("code: {}", code)),
    ]))
}

#[derive(Debug, Deserialize)]
struct ResponseApiResponse {
    model: Option<String>,
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponseOutputItem>,
    usage: Option<ResponseApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseOutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ResponseContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseApiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
