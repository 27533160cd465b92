use serde::{Deserialize, Serialize};

pub const DEFAULT_POSITION: f32 = 50.0;
pub const DEFAULT_FONT_SIZE: f32 = 54.0;
pub const DEFAULT_TEXT_COLOR: &str = "#FFFFFF";
pub const DEFAULT_SHADOW_INTENSITY: f32 = 0.8;
pub const DEFAULT_OPACITY: f32 = 1.0;

/// Text overlay style as stored on an item and exchanged with editors.
///
/// Positions are percentages (0-100) of the image dimensions so the same record
/// applies to any raster size. Every field is optional on input; the layout
/// engine resolves the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_intensity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    /// Width of the preview canvas the style was authored against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_container_width: Option<f32>,
}

impl OverlayStyle {
    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        serde_json::from_str(raw).with_context(|| "failed to parse overlay style JSON")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemStatus {
    #[default]
    AiGenerated,
    Approved,
    ReviewRequired,
    /// Workflow states owned by surrounding systems, carried verbatim.
    Other(String),
}

impl ItemStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ItemStatus::AiGenerated => "AI_Generated",
            ItemStatus::Approved => "Approved",
            ItemStatus::ReviewRequired => "Review_Required",
            ItemStatus::Other(value) => value.as_str(),
        }
    }
}

impl From<String> for ItemStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AI_Generated" => ItemStatus::AiGenerated,
            "Approved" => ItemStatus::Approved,
            "Review_Required" => ItemStatus::ReviewRequired,
            _ => ItemStatus::Other(value),
        }
    }
}

impl From<ItemStatus> for String {
    fn from(value: ItemStatus) -> Self {
        value.as_str().to_string()
    }
}

/// The unit of work and persistence target of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_style: Option<OverlayStyle>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Background for a bake: the raw image when known, otherwise the last
    /// final image.
    pub fn bake_source_url(&self) -> Option<&str> {
        self.raw_image_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| {
                self.final_image_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
            })
    }
}

/// Field group written by the terminal step of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalUpdate {
    pub overlay_text: Option<String>,
    pub overlay_style: Option<OverlayStyle>,
    pub final_image_url: String,
    pub status: ItemStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_uses_camel_case_wire_names() {
        let style = OverlayStyle::parse_json(
            r##"{"x":20,"y":30,"fontSize":40,"fontFamily":"Inter","color":"#112233","shadowIntensity":0.5,"opacity":0.9,"referenceContainerWidth":500}"##,
        )
        .expect("style");
        assert_eq!(style.x, Some(20.0));
        assert_eq!(style.font_family.as_deref(), Some("Inter"));
        assert_eq!(style.reference_container_width, Some(500.0));

        let value = serde_json::to_value(OverlayStyle {
            x: Some(10.0),
            ..OverlayStyle::default()
        })
        .expect("serialize");
        assert_eq!(value, serde_json::json!({"x": 10.0}));
    }

    #[test]
    fn status_round_trips_unknown_workflow_states() {
        let item: ContentItem =
            serde_json::from_str(r#"{"id":"a","status":"Scheduled"}"#).expect("item");
        assert_eq!(item.status, ItemStatus::Other("Scheduled".to_string()));
        let value = serde_json::to_value(&item).expect("serialize");
        assert_eq!(value["status"], "Scheduled");

        let item: ContentItem =
            serde_json::from_str(r#"{"id":"b","status":"Review_Required"}"#).expect("item");
        assert_eq!(item.status, ItemStatus::ReviewRequired);
    }

    #[test]
    fn bake_source_prefers_raw_image() {
        let mut item = ContentItem::new("a");
        assert_eq!(item.bake_source_url(), None);
        item.final_image_url = Some("final.jpg".to_string());
        assert_eq!(item.bake_source_url(), Some("final.jpg"));
        item.raw_image_url = Some("raw.png".to_string());
        assert_eq!(item.bake_source_url(), Some("raw.png"));
    }
}
