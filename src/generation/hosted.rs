use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{EngineFuture, GenerationParams, ImageEngine, RawImage};
use crate::providers::get_env;
use crate::providers::retry::{format_error_parts, send_with_retry};

/// URL-returning text-to-image backend (fal-style queue-less endpoint).
#[derive(Debug, Clone)]
pub struct HostedEngine {
    url: String,
    key: Option<String>,
}

impl HostedEngine {
    pub fn new(url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            url: url.into(),
            key,
        }
    }

    pub fn from_env(url: &str) -> Self {
        let key = get_env("OVERLAY_PRIMARY_API_KEY").or_else(|| get_env("FAL_KEY"));
        Self::new(url, key)
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<RawImage> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| anyhow!("OVERLAY_PRIMARY_API_KEY is not set"))?;
        let client = reqwest::Client::new();
        let body = request_body(prompt, params);
        let text = send_with_retry(
            "Hosted image engine",
            || {
                client
                    .post(&self.url)
                    .header("Authorization", format!("Key {}", key))
                    .json(&body)
            },
            extract_hosted_error,
        )
        .await?;
        extract_image_url(&text).map(RawImage::Url)
    }
}

impl ImageEngine for HostedEngine {
    fn generate<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> EngineFuture<'a> {
        Box::pin(self.request(prompt, params))
    }
}

fn request_body(prompt: &str, params: &GenerationParams) -> Value {
    json!({
        "prompt": prompt,
        "image_size": image_size_value(params.image_size()),
        "num_inference_steps": params.inference_steps(),
        "guidance_scale": params.guidance_scale(),
        "num_images": 1
    })
}

/// `WIDTHxHEIGHT` becomes an explicit size object; named presets pass through.
fn image_size_value(size: &str) -> Value {
    let parsed = size
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
    match parsed {
        Some((width, height)) => json!({"width": width, "height": height}),
        None => json!(size),
    }
}

fn extract_image_url(text: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct HostedResponse {
        #[serde(default)]
        images: Vec<HostedImage>,
        url: Option<String>,
    }

    #[derive(Deserialize)]
    struct HostedImage {
        url: Option<String>,
    }

    let payload: HostedResponse =
        serde_json::from_str(text).with_context(|| "failed to parse hosted engine response")?;
    payload
        .images
        .into_iter()
        .find_map(|image| image.url)
        .or(payload.url)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| anyhow!("hosted engine returned no image URL"))
}

fn extract_hosted_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let detail = match value.get("detail") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let message = value
        .get("error")
        .and_then(Value::as_str)
        .map(|text| text.to_string());
    Some(format_error_parts(&[message, detail]))
}
