use serde::{Deserialize, Serialize};

use crate::generation::GenerationParams;
use crate::model::OverlayStyle;
use crate::pipeline::{RunOutcome, RunRequest};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct GenerateRequest {
    pub(crate) prompt: String,
    pub(crate) params: GenerationParams,
    pub(crate) custom_text: Option<String>,
    pub(crate) style: Option<OverlayStyle>,
    pub(crate) skip_bake: bool,
}

impl GenerateRequest {
    pub(crate) fn into_run_request(self, item_id: String) -> RunRequest {
        RunRequest {
            item_id,
            prompt: self.prompt,
            params: self.params,
            custom_text: self.custom_text,
            style: self.style,
            skip_bake: self.skip_bake,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RebakeRequest {
    pub(crate) text: String,
    pub(crate) style: OverlayStyle,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct BatchRequest {
    pub(crate) items: Vec<RunRequest>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchResponse {
    pub(crate) results: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchItem {
    pub(crate) item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) outcome: Option<RunOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<ErrorResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    pub(crate) kind: String,
    /// Artifact that survived a failed final write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
}
