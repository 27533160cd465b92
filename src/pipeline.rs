//! Orchestration of one content item through generation, placement, baking and
//! persistence.
//!
//! A run moves through `Dispatching -> Uploading -> RawPersisted -> Analyzing
//! -> Baking -> FinalPersisted`, skipping the conditional stages. Everything up
//! to `RawPersisted` is all-or-nothing and recorded as `Review_Required` on
//! failure. Placement and compositing degrade instead of aborting, so the
//! generated image is never lost to an overlay problem.

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::data::{PNG_MIME, extension_from_mime};
use crate::error::{PipelineError, PipelineResult};
use crate::generation::{Dispatcher, GenerationParams, RawImage};
use crate::model::{FinalUpdate, ItemStatus, OverlayStyle};
use crate::overlay::{BakedImage, Compositor};
use crate::placement::{PlacementAnalyzer, PlacementSuggestion};
use crate::providers::{Provider, ProviderImpl, provider_from_settings};
use crate::settings::Settings;
use crate::storage::{
    ContentStore, FsContentStore, LocalObjectStore, ObjectStore, object_key,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Dispatching,
    Uploading,
    RawPersisted,
    Analyzing,
    Baking,
    FinalPersisted,
    Failed,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Dispatching => "dispatching",
            Stage::Uploading => "uploading",
            Stage::RawPersisted => "raw_persisted",
            Stage::Analyzing => "analyzing",
            Stage::Baking => "baking",
            Stage::FinalPersisted => "final_persisted",
            Stage::Failed => "failed",
        }
    }
}

fn enter(item_id: &str, stage: Stage) {
    debug!(item = item_id, stage = stage.as_str(), "pipeline state");
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunRequest {
    pub item_id: String,
    pub prompt: String,
    pub params: GenerationParams,
    /// Overrides `params.overlayTextHint` as the text to bake.
    pub custom_text: Option<String>,
    /// Explicit style; when absent the placement analyzer is consulted.
    pub style: Option<OverlayStyle>,
    pub skip_bake: bool,
}

impl RunRequest {
    pub fn new(item_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    fn overlay_text(&self) -> Option<&str> {
        self.custom_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or_else(|| self.params.overlay_text_hint())
    }
}

/// Non-fatal problems a run recovered from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    AnalysisFailed { message: String },
    CompositeFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    /// The item's new `finalImageUrl`.
    pub url: String,
    pub raw_url: String,
    pub baked: bool,
    pub degradations: Vec<Degradation>,
}

/// Raw asset of the current run, with its bytes when they are already local.
struct RawAsset {
    url: String,
    bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct Folders {
    raw: String,
    baked: String,
}

pub struct Pipeline<P: Provider> {
    dispatcher: Dispatcher,
    analyzer: Option<PlacementAnalyzer<P>>,
    compositor: Compositor,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn ContentStore>,
    folders: Folders,
}

impl Pipeline<ProviderImpl> {
    /// Production wiring. A vision provider without credentials disables
    /// placement analysis rather than failing startup.
    pub fn from_settings(settings: &Settings) -> Self {
        let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::from_settings(settings));
        let records: Arc<dyn ContentStore> = Arc::new(FsContentStore::from_settings(settings));
        let analyzer =
            match provider_from_settings(&settings.vision_provider, settings.vision_model.clone()) {
                Ok(provider) => Some(PlacementAnalyzer::new(provider, objects.clone())),
                Err(err) => {
                    warn!("placement analysis disabled: {:#}", err);
                    None
                }
            };
        Pipeline::new(
            Dispatcher::from_settings(settings),
            analyzer,
            Compositor::from_settings(settings),
            objects,
            records,
        )
        .with_folders(&settings.raw_folder, &settings.baked_folder)
    }
}

impl<P: Provider> Pipeline<P> {
    pub fn new(
        dispatcher: Dispatcher,
        analyzer: Option<PlacementAnalyzer<P>>,
        compositor: Compositor,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            dispatcher,
            analyzer,
            compositor,
            objects,
            records,
            folders: Folders {
                raw: "generated".to_string(),
                baked: "baked".to_string(),
            },
        }
    }

    pub fn with_folders(mut self, raw: &str, baked: &str) -> Self {
        self.folders = Folders {
            raw: raw.to_string(),
            baked: baked.to_string(),
        };
        self
    }

    pub fn records(&self) -> &Arc<dyn ContentStore> {
        &self.records
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub async fn run(&self, request: RunRequest) -> PipelineResult<RunOutcome> {
        let id = request.item_id.as_str();
        info!(
            item = id,
            engine = request.params.engine.as_str(),
            "pipeline run started"
        );

        let raw = match self.produce_raw(&request).await {
            Ok(raw) => raw,
            Err(err) => return Err(self.fail(id, err).await),
        };
        enter(id, Stage::RawPersisted);

        let text = request.overlay_text().map(str::to_string);
        let mut degradations = Vec::new();
        let mut style = request.style.clone();
        let mut final_url = raw.url.clone();
        let mut baked = false;

        match text.as_deref() {
            None => debug!(item = id, "no overlay text, publishing raw image"),
            Some(_) if request.params.skip_text => {
                debug!(item = id, "text skipped, publishing raw image")
            }
            Some(text) => {
                if style.is_none() {
                    enter(id, Stage::Analyzing);
                    match self.analyze(&raw.url).await {
                        Ok(suggestion) => {
                            style = Some(suggestion.into_style(self.compositor.font_family()))
                        }
                        Err(err) => {
                            warn!(item = id, "placement analysis failed: {}", err);
                            degradations.push(Degradation::AnalysisFailed {
                                message: err.diagnostic(),
                            });
                        }
                    }
                }
                if let Some(style) = style.as_ref().filter(|_| !request.skip_bake) {
                    enter(id, Stage::Baking);
                    match self.bake(id, &raw.url, raw.bytes, text, style).await {
                        Ok(url) => {
                            final_url = url;
                            baked = true;
                        }
                        Err(err) if !err.is_terminal_for_run() => {
                            warn!(item = id, "baking failed, publishing raw image: {}", err);
                            degradations.push(Degradation::CompositeFailed {
                                message: err.diagnostic(),
                            });
                        }
                        Err(err) => return Err(self.fail(id, err).await),
                    }
                }
            }
        }

        self.finish(id, text, style, &final_url).await?;
        info!(item = id, url = %final_url, baked, "pipeline run finished");
        Ok(RunOutcome {
            url: final_url,
            raw_url: raw.url,
            baked,
            degradations,
        })
    }

    /// Re-applies text and style to the item's raw image without generating.
    /// Compositing or upload failures end the rebake and mark the item
    /// `Review_Required`; the raw image is never published in their place.
    pub async fn rebake(
        &self,
        item_id: &str,
        text: &str,
        style: &OverlayStyle,
    ) -> PipelineResult<RunOutcome> {
        info!(item = item_id, "rebake started");
        let item = self
            .records
            .get(item_id)
            .await
            .map_err(|err| PipelineError::persistence(None, err))?
            .ok_or_else(|| PipelineError::NotFound(item_id.to_string()))?;
        let source = item
            .bake_source_url()
            .ok_or_else(|| PipelineError::NotFound(format!("{} has no image to bake", item_id)))?
            .to_string();

        let (final_url, baked, text) = if text.trim().is_empty() {
            (source.clone(), false, None)
        } else {
            enter(item_id, Stage::Baking);
            match self.bake(item_id, &source, None, text, style).await {
                Ok(url) => (url, true, Some(text.to_string())),
                Err(err) => return Err(self.fail(item_id, err).await),
            }
        };

        self.finish(item_id, text, Some(style.clone()), &final_url)
            .await?;
        info!(item = item_id, url = %final_url, baked, "rebake finished");
        Ok(RunOutcome {
            url: final_url,
            raw_url: source,
            baked,
            degradations: Vec::new(),
        })
    }

    /// Runs independent items with at most `concurrency` in flight. Results
    /// keep the input order.
    pub async fn run_batch(
        &self,
        requests: Vec<RunRequest>,
        concurrency: usize,
    ) -> Vec<(String, PipelineResult<RunOutcome>)> {
        let mut results: Vec<_> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| async move {
                let id = request.item_id.clone();
                (index, id, self.run(request).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, id, result)| (id, result))
            .collect()
    }

    /// Cancels the run once `timeout` elapses and records the item as failed.
    pub async fn run_with_timeout(
        &self,
        request: RunRequest,
        timeout: Duration,
    ) -> PipelineResult<RunOutcome> {
        let id = request.item_id.clone();
        match tokio::time::timeout(timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.fail(&id, PipelineError::Timeout(timeout.as_secs())).await),
        }
    }

    async fn produce_raw(&self, request: &RunRequest) -> PipelineResult<RawAsset> {
        let id = request.item_id.as_str();
        enter(id, Stage::Dispatching);
        let raw = match self
            .dispatcher
            .generate(&request.prompt, &request.params)
            .await?
        {
            RawImage::Url(url) => RawAsset { url, bytes: None },
            RawImage::Bytes { bytes, mime } => {
                enter(id, Stage::Uploading);
                let ext = extension_from_mime(&mime).unwrap_or("png");
                let key = object_key(&self.folders.raw, id, ext);
                let content_type = if mime.is_empty() { PNG_MIME } else { mime.as_str() };
                self.objects
                    .upload(&key, bytes.clone(), content_type)
                    .await
                    .map_err(PipelineError::upload)?;
                RawAsset {
                    url: self.objects.public_url(&key),
                    bytes: Some(bytes),
                }
            }
        };
        self.records
            .update_raw(id, &raw.url)
            .await
            .map_err(|err| PipelineError::persistence(Some(raw.url.clone()), err))?;
        Ok(raw)
    }

    async fn analyze(&self, image_url: &str) -> PipelineResult<PlacementSuggestion> {
        match &self.analyzer {
            Some(analyzer) => analyzer.analyze(image_url).await,
            None => Err(PipelineError::analysis("no vision provider configured")),
        }
    }

    /// Composites onto the source and uploads the result. Source fetch and
    /// decode problems surface as `Composite`, storage rejections as `Upload`.
    async fn bake(
        &self,
        item_id: &str,
        source_url: &str,
        source_bytes: Option<Vec<u8>>,
        text: &str,
        style: &OverlayStyle,
    ) -> PipelineResult<String> {
        let source = match source_bytes {
            Some(bytes) => bytes,
            None => self
                .objects
                .fetch(source_url)
                .await
                .map_err(PipelineError::composite)?,
        };
        let image = self.composite(source, text, style).await?;
        let key = object_key(&self.folders.baked, item_id, "jpg");
        self.objects
            .upload(&key, image.bytes, image.mime)
            .await
            .map_err(PipelineError::upload)?;
        Ok(self.objects.public_url(&key))
    }

    async fn composite(
        &self,
        source: Vec<u8>,
        text: &str,
        style: &OverlayStyle,
    ) -> PipelineResult<BakedImage> {
        let compositor = self.compositor.clone();
        let text = text.to_string();
        let style = style.clone();
        tokio::task::spawn_blocking(move || compositor.composite(&source, &text, &style))
            .await
            .map_err(|err| PipelineError::composite(format!("compositing task failed: {}", err)))?
    }

    async fn finish(
        &self,
        item_id: &str,
        text: Option<String>,
        style: Option<OverlayStyle>,
        final_url: &str,
    ) -> PipelineResult<()> {
        let update = FinalUpdate {
            overlay_text: text,
            overlay_style: style,
            final_image_url: final_url.to_string(),
            status: ItemStatus::Approved,
        };
        match self.records.update_final(item_id, update).await {
            Ok(()) => {
                enter(item_id, Stage::FinalPersisted);
                Ok(())
            }
            Err(err) => {
                let err = PipelineError::persistence(Some(final_url.to_string()), err);
                error!(item = item_id, "final write failed, assets kept: {}", err);
                Err(err)
            }
        }
    }

    /// Records a terminal failure on the item and hands the error back.
    async fn fail(&self, item_id: &str, err: PipelineError) -> PipelineError {
        enter(item_id, Stage::Failed);
        error!(item = item_id, kind = err.kind(), "pipeline run failed: {}", err);
        if let Err(record_err) = self.records.mark_failed(item_id, &err.diagnostic()).await {
            warn!(item = item_id, "could not record failure: {:#}", record_err);
        }
        err
    }
}
