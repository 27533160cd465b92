use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::time::Duration;

pub mod data;
pub mod error;
pub mod extract;
pub mod generation;
pub mod logging;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod placement;
pub mod providers;
pub mod server;
pub mod settings;
pub mod storage;
#[cfg(test)]
mod test_util;

pub use error::{PipelineError, PipelineResult};
pub use generation::{EngineKind, GenerationParams, ImageEngine, RawImage};
pub use model::{ContentItem, ItemStatus, OverlayStyle};
pub use pipeline::{Degradation, Pipeline, RunOutcome, RunRequest};
pub use providers::{Provider, ProviderImpl, ProviderKind};

#[derive(Debug, Clone)]
pub struct Config {
    pub settings_path: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Generate {
        item: String,
        prompt: String,
        params: GenerationParams,
        custom_text: Option<String>,
        style: Option<String>,
        skip_bake: bool,
    },
    Rebake {
        item: String,
        text: String,
        style: String,
    },
    Show {
        item: String,
    },
    Layout {
        text: String,
        width: u32,
        height: u32,
        style: Option<String>,
    },
    Serve {
        addr: Option<String>,
    },
}

/// Executes one CLI command and returns what should be printed.
pub async fn run(config: Config) -> Result<String> {
    let load = || settings::load_settings(config.settings_path.as_deref().map(Path::new));

    match config.command {
        Command::Layout {
            text,
            width,
            height,
            style,
        } => format_layout(&text, width, height, style.as_deref()),
        Command::Generate {
            item,
            prompt,
            params,
            custom_text,
            style,
            skip_bake,
        } => {
            if prompt.trim().is_empty() {
                return Err(anyhow!("prompt is empty"));
            }
            let request = RunRequest {
                item_id: item,
                prompt,
                params,
                custom_text,
                style: parse_style(style.as_deref())?,
                skip_bake,
            };
            let settings = load()?;
            let timeout = Duration::from_secs(settings.generation_timeout_secs);
            let outcome = Pipeline::from_settings(&settings)
                .run_with_timeout(request, timeout)
                .await
                .map_err(pipeline_failure)?;
            to_json(&outcome)
        }
        Command::Rebake { item, text, style } => {
            let settings = load()?;
            let style = OverlayStyle::parse_json(&style)?;
            let outcome = Pipeline::from_settings(&settings)
                .rebake(&item, &text, &style)
                .await
                .map_err(pipeline_failure)?;
            to_json(&outcome)
        }
        Command::Show { item } => {
            let settings = load()?;
            let records = storage::FsContentStore::from_settings(&settings);
            let record = storage::ContentStore::get(&records, &item)
                .await?
                .ok_or_else(|| anyhow!("content item '{}' not found", item))?;
            to_json(&record)
        }
        Command::Serve { addr } => {
            let settings = load()?;
            let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
            server::run_server(settings, addr).await?;
            Ok(String::new())
        }
    }
}

fn format_layout(text: &str, width: u32, height: u32, style: Option<&str>) -> Result<String> {
    if width == 0 || height == 0 {
        return Err(anyhow!("width and height must be positive"));
    }
    let style = parse_style(style)?.unwrap_or_default();
    to_json(&overlay::layout(text, &style, width, height))
}

fn parse_style(raw: Option<&str>) -> Result<Option<OverlayStyle>> {
    raw.filter(|value| !value.trim().is_empty())
        .map(OverlayStyle::parse_json)
        .transpose()
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value).with_context(|| "failed to serialize output")
}

/// Keeps the surviving asset URL visible when the final write failed.
fn pipeline_failure(err: PipelineError) -> anyhow::Error {
    match err.surviving_url() {
        Some(url) => anyhow!("{} (generated image kept at {})", err.diagnostic(), url),
        None => anyhow!(err.diagnostic()),
    }
}
