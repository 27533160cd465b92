use thiserror::Error;

/// Failure taxonomy of the generation and baking pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image generation failed: {0}")]
    Generation(String),

    #[error("object storage upload failed: {0}")]
    Upload(String),

    #[error("placement analysis failed: {0}")]
    Analysis(String),

    #[error("compositing failed: {0}")]
    Composite(String),

    /// The final record write failed after assets were produced. `url` is the
    /// artifact the run produced and is still valid.
    #[error("persisting item state failed: {message}")]
    Persistence { url: Option<String>, message: String },

    #[error("content item not found: {0}")]
    NotFound(String),

    #[error("pipeline run timed out after {0}s")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(format!("{:#}", err))
    }

    pub fn upload(err: impl std::fmt::Display) -> Self {
        Self::Upload(format!("{:#}", err))
    }

    pub fn analysis(err: impl std::fmt::Display) -> Self {
        Self::Analysis(format!("{:#}", err))
    }

    pub fn composite(err: impl std::fmt::Display) -> Self {
        Self::Composite(format!("{:#}", err))
    }

    pub fn persistence(url: Option<String>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            url,
            message: format!("{:#}", err),
        }
    }

    /// Stable code used in diagnostics and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "generation_error",
            Self::Upload(_) => "upload_error",
            Self::Analysis(_) => "analysis_error",
            Self::Composite(_) => "composite_error",
            Self::Persistence { .. } => "persistence_error",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config_error",
        }
    }

    /// Human-readable text written into an item's `lastError`.
    pub fn diagnostic(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }

    /// Whether this failure ends a `run` rather than degrading it.
    pub fn is_terminal_for_run(&self) -> bool {
        !matches!(self, Self::Analysis(_) | Self::Composite(_))
    }

    /// Artifact URL that survived the failure, if any.
    pub fn surviving_url(&self) -> Option<&str> {
        match self {
            Self::Persistence { url, .. } => url.as_deref(),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
