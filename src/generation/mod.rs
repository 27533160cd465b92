//! Generation dispatcher: one interface over the two image backends.
//!
//! The hosted engine answers with a fetchable URL, the inline engine with
//! encoded bytes that still need an upload. Both are normalized into
//! [`RawImage`].

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::settings::Settings;

mod hosted;
mod inline;

pub use hosted::HostedEngine;
pub use inline::InlineEngine;

pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_INFERENCE_STEPS: u32 = 28;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 3.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// URL-returning backend.
    #[default]
    Primary,
    /// Bytes-returning backend.
    Secondary,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Primary => "primary",
            EngineKind::Secondary => "secondary",
        }
    }
}

/// Options recognized by the dispatcher. Unset fields fall back to the
/// documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationParams {
    pub engine: EngineKind,
    /// `WIDTHxHEIGHT`, default `1024x1024`.
    pub image_size: Option<String>,
    pub style: Option<String>,
    pub mood: Option<String>,
    pub color_palette: Option<String>,
    /// Free-text directive placed ahead of the prompt.
    pub master_instructions: Option<String>,
    /// Literal text the image should carry; also the default overlay text.
    pub overlay_text_hint: Option<String>,
    /// Ask for an image with no rendered typography at all.
    pub skip_text: bool,
    /// Hosted engine only, default 28.
    pub inference_steps: Option<u32>,
    /// Hosted engine only, default 3.5.
    pub guidance_scale: Option<f32>,
}

impl GenerationParams {
    pub fn image_size(&self) -> &str {
        non_blank(self.image_size.as_deref()).unwrap_or(DEFAULT_IMAGE_SIZE)
    }

    pub fn overlay_text_hint(&self) -> Option<&str> {
        non_blank(self.overlay_text_hint.as_deref())
    }

    pub fn inference_steps(&self) -> u32 {
        self.inference_steps.unwrap_or(DEFAULT_INFERENCE_STEPS)
    }

    pub fn guidance_scale(&self) -> f32 {
        self.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE)
    }
}

/// Output of a backend, tagged by how it must be persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum RawImage {
    Url(String),
    Bytes { bytes: Vec<u8>, mime: String },
}

impl RawImage {
    fn validate(self) -> Result<Self> {
        match &self {
            RawImage::Url(url) if url.trim().is_empty() => Err(anyhow!("backend returned an empty URL")),
            RawImage::Bytes { bytes, .. } if bytes.is_empty() => {
                Err(anyhow!("backend returned an empty image payload"))
            }
            _ => Ok(self),
        }
    }
}

pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = Result<RawImage>> + Send + 'a>>;

/// A text-to-image backend. `prompt` is already enriched with directives.
pub trait ImageEngine: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> EngineFuture<'a>;
}

/// The closed set of production backends.
#[derive(Debug, Clone)]
pub enum ImageEngineImpl {
    Hosted(HostedEngine),
    Inline(InlineEngine),
}

impl ImageEngine for ImageEngineImpl {
    fn generate<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> EngineFuture<'a> {
        match self {
            ImageEngineImpl::Hosted(engine) => engine.generate(prompt, params),
            ImageEngineImpl::Inline(engine) => engine.generate(prompt, params),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    primary: Arc<dyn ImageEngine>,
    secondary: Arc<dyn ImageEngine>,
    default_size: Option<String>,
}

impl Dispatcher {
    pub fn new(primary: Arc<dyn ImageEngine>, secondary: Arc<dyn ImageEngine>) -> Self {
        Self {
            primary,
            secondary,
            default_size: None,
        }
    }

    /// Size used when a request leaves `imageSize` unset.
    pub fn with_default_size(mut self, size: impl Into<String>) -> Self {
        self.default_size = Some(size.into()).filter(|size| !size.trim().is_empty());
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let primary = ImageEngineImpl::Hosted(HostedEngine::from_env(&settings.primary_url));
        let secondary = ImageEngineImpl::Inline(InlineEngine::from_env(
            &settings.secondary_url,
            &settings.secondary_model,
        ));
        Self::new(Arc::new(primary), Arc::new(secondary))
            .with_default_size(settings.default_size.clone())
    }

    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> PipelineResult<RawImage> {
        let mut params = params.clone();
        if params.image_size.is_none() {
            params.image_size = self.default_size.clone();
        }
        let params = &params;
        let final_prompt = compose_prompt(prompt, params);
        let engine = match params.engine {
            EngineKind::Primary => &self.primary,
            EngineKind::Secondary => &self.secondary,
        };
        info!(
            engine = params.engine.as_str(),
            size = params.image_size(),
            "requesting image generation"
        );
        debug!(prompt = %final_prompt, "composed generation prompt");
        engine
            .generate(&final_prompt, params)
            .await
            .and_then(RawImage::validate)
            .map_err(PipelineError::generation)
    }
}

/// Prepends bracketed directives in fixed order: style block, master
/// instructions, text directive.
pub fn compose_prompt(prompt: &str, params: &GenerationParams) -> String {
    let mut directives = Vec::new();

    let mut style_parts = Vec::new();
    if let Some(style) = non_blank(params.style.as_deref()) {
        style_parts.push(format!("Style: {}.", style));
    }
    if let Some(mood) = non_blank(params.mood.as_deref()) {
        style_parts.push(format!("Mood: {}.", mood));
    }
    if let Some(palette) = non_blank(params.color_palette.as_deref()) {
        style_parts.push(format!("Color palette: {}.", palette));
    }
    if !style_parts.is_empty() {
        directives.push(format!("[{}]", style_parts.join(" ")));
    }

    if let Some(instructions) = non_blank(params.master_instructions.as_deref()) {
        directives.push(format!("[Master instructions: {}]", instructions));
    }

    if params.skip_text {
        directives.push(
            "[No text: the image must contain absolutely no text, letters, words, numbers or typography.]"
                .to_string(),
        );
    } else if let Some(hint) = params.overlay_text_hint() {
        directives.push(format!(
            "[Text: the image must contain the exact text \"{}\" rendered legibly.]",
            hint
        ));
    }

    directives.push(prompt.trim().to_string());
    directives.join(" ")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
