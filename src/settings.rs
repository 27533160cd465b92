use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub primary_url: String,
    pub secondary_url: String,
    pub secondary_model: String,
    pub default_size: String,
    pub generation_timeout_secs: u64,
    pub vision_provider: String,
    pub vision_model: Option<String>,
    pub overlay_font_family: String,
    pub overlay_font_path: Option<String>,
    pub jpeg_quality: u8,
    pub storage_root: String,
    pub storage_bucket: String,
    pub public_base_url: String,
    pub raw_folder: String,
    pub baked_folder: String,
    pub records_dir: String,
    pub server_addr: String,
    pub batch_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_url: "https://fal.run/fal-ai/flux/dev".to_string(),
            secondary_url: "https://api.openai.com/v1/images/generations".to_string(),
            secondary_model: "dall-e-3".to_string(),
            default_size: "1024x1024".to_string(),
            generation_timeout_secs: 180,
            vision_provider: "openai".to_string(),
            vision_model: None,
            overlay_font_family: "sans-serif".to_string(),
            overlay_font_path: None,
            jpeg_quality: 90,
            storage_root: ".overlay-baker/storage".to_string(),
            storage_bucket: "content-images".to_string(),
            public_base_url: "http://127.0.0.1:8787/media".to_string(),
            raw_folder: "generated".to_string(),
            baked_folder: "baked".to_string(),
            records_dir: ".overlay-baker/records".to_string(),
            server_addr: "127.0.0.1:8787".to_string(),
            batch_concurrency: 4,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    generation: Option<GenerationSettings>,
    vision: Option<VisionSettings>,
    overlay: Option<OverlaySettings>,
    storage: Option<StorageSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerationSettings {
    primary_url: Option<String>,
    secondary_url: Option<String>,
    secondary_model: Option<String>,
    default_size: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VisionSettings {
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    font_family: Option<String>,
    font_path: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSettings {
    root: Option<String>,
    bucket: Option<String>,
    public_base_url: Option<String>,
    raw_folder: Option<String>,
    baked_folder: Option<String>,
    records_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
    batch_concurrency: Option<usize>,
}

/// Loads settings in increasing priority: embedded defaults, `./settings.toml`,
/// `./settings.local.toml`, the home directory files, then `extra_path`.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let embedded: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(embedded);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings(content: &str) -> Result<Settings> {
    let parsed: SettingsFile =
        toml::from_str(content).with_context(|| "failed to parse settings")?;
    let mut settings = Settings::default();
    settings.merge(parsed);
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Rejects values that would only fail later, mid-run.
    pub fn validate(&self) -> PipelineResult<()> {
        let size_ok = self
            .default_size
            .split_once('x')
            .is_some_and(|(w, h)| {
                w.parse::<u32>().is_ok_and(|w| w > 0) && h.parse::<u32>().is_ok_and(|h| h > 0)
            });
        if !size_ok {
            return Err(PipelineError::Config(format!(
                "generation.default_size must look like 1024x1024, got '{}'",
                self.default_size
            )));
        }
        if !(self.public_base_url.starts_with("http://")
            || self.public_base_url.starts_with("https://"))
        {
            return Err(PipelineError::Config(format!(
                "storage.public_base_url must be an http(s) URL, got '{}'",
                self.public_base_url
            )));
        }
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(generation) = incoming.generation {
            merge_string(&mut self.primary_url, generation.primary_url);
            merge_string(&mut self.secondary_url, generation.secondary_url);
            merge_string(&mut self.secondary_model, generation.secondary_model);
            merge_string(&mut self.default_size, generation.default_size);
            if let Some(secs) = generation.timeout_secs.filter(|secs| *secs > 0) {
                self.generation_timeout_secs = secs;
            }
        }
        if let Some(vision) = incoming.vision {
            merge_string(&mut self.vision_provider, vision.provider);
            if let Some(model) = vision.model.filter(|value| !value.trim().is_empty()) {
                self.vision_model = Some(model);
            }
        }
        if let Some(overlay) = incoming.overlay {
            merge_string(&mut self.overlay_font_family, overlay.font_family);
            if let Some(path) = overlay.font_path.filter(|value| !value.trim().is_empty()) {
                self.overlay_font_path = Some(path);
            }
            if let Some(quality) = overlay.jpeg_quality {
                self.jpeg_quality = quality.clamp(1, 100);
            }
        }
        if let Some(storage) = incoming.storage {
            merge_string(&mut self.storage_root, storage.root);
            merge_string(&mut self.storage_bucket, storage.bucket);
            merge_string(&mut self.public_base_url, storage.public_base_url);
            merge_string(&mut self.raw_folder, storage.raw_folder);
            merge_string(&mut self.baked_folder, storage.baked_folder);
            merge_string(&mut self.records_dir, storage.records_dir);
        }
        if let Some(server) = incoming.server {
            merge_string(&mut self.server_addr, server.addr);
            if let Some(limit) = server.batch_concurrency.filter(|limit| *limit > 0) {
                self.batch_concurrency = limit;
            }
        }
    }
}

fn merge_string(target: &mut String, incoming: Option<String>) {
    if let Some(value) = incoming {
        let value = value.trim();
        if !value.is_empty() {
            *target = value.to_string();
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".overlay-baker"))
        }
    })
}
