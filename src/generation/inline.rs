use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

use super::{EngineFuture, GenerationParams, ImageEngine, RawImage};
use crate::data::{PNG_MIME, sniff_image_mime};
use crate::providers::get_env;
use crate::providers::retry::send_with_retry;

/// Bytes-returning backend speaking the OpenAI images API.
#[derive(Debug, Clone)]
pub struct InlineEngine {
    url: String,
    model: String,
    key: Option<String>,
}

impl InlineEngine {
    pub fn new(url: impl Into<String>, model: impl Into<String>, key: Option<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            key,
        }
    }

    pub fn from_env(url: &str, model: &str) -> Self {
        Self::new(url, model, get_env("OPENAI_API_KEY"))
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<RawImage> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;
        let client = reqwest::Client::new();
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": params.image_size(),
            "n": 1,
            "response_format": "b64_json"
        });
        let text = send_with_retry(
            "Inline image engine",
            || client.post(&self.url).bearer_auth(key).json(&body),
            crate::providers::openai_error_message,
        )
        .await?;
        decode_image_response(&text)
    }
}

impl ImageEngine for InlineEngine {
    fn generate<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> EngineFuture<'a> {
        Box::pin(self.request(prompt, params))
    }
}

fn decode_image_response(text: &str) -> Result<RawImage> {
    #[derive(Deserialize)]
    struct ImagesResponse {
        #[serde(default)]
        data: Vec<ImageDatum>,
    }

    #[derive(Deserialize)]
    struct ImageDatum {
        b64_json: Option<String>,
        url: Option<String>,
    }

    let payload: ImagesResponse =
        serde_json::from_str(text).with_context(|| "failed to parse images API response")?;
    let datum = payload
        .data
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("images API returned no data"))?;

    if let Some(encoded) = datum.b64_json.filter(|value| !value.trim().is_empty()) {
        let bytes = BASE64
            .decode(encoded.trim())
            .with_context(|| "images API returned invalid base64")?;
        let mime = sniff_image_mime(&bytes).unwrap_or(PNG_MIME).to_string();
        return Ok(RawImage::Bytes { bytes, mime });
    }
    if let Some(url) = datum.url.filter(|value| !value.trim().is_empty()) {
        return Ok(RawImage::Url(url));
    }
    Err(anyhow!("images API returned neither bytes nor URL"))
}
