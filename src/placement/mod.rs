use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tera::{Context as TeraContext, Tera};
use tracing::debug;

use crate::data::DataAttachment;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::extract_json_object;
use crate::model::{DEFAULT_FONT_SIZE, DEFAULT_OPACITY, DEFAULT_SHADOW_INTENSITY, OverlayStyle};
use crate::providers::Provider;
use crate::storage::ObjectStore;

const PLACEMENT_TEMPLATE: &str = include_str!("prompts/placement.tera");
const USER_INSTRUCTION: &str = "Analyze this image and answer with the JSON object only.";
/// Preferred vertical band when the upper third has room.
const UPPER_BAND: (u32, u32) = (10, 35);
/// Regions at or above this luminosity get dark text.
const CONTRAST_THRESHOLD: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextColor {
    White,
    Black,
}

impl TextColor {
    pub fn hex(&self) -> &'static str {
        match self {
            TextColor::White => "#FFFFFF",
            TextColor::Black => "#000000",
        }
    }

    fn for_luminosity(luminosity: f32) -> Self {
        if luminosity >= CONTRAST_THRESHOLD {
            TextColor::Black
        } else {
            TextColor::White
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "white" | "#fff" | "#ffffff" => Some(TextColor::White),
            "black" | "#000" | "#000000" => Some(TextColor::Black),
            _ => None,
        }
    }
}

/// Validated answer of the vision model. Values are clamped to 0-100.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSuggestion {
    pub x: f32,
    pub y: f32,
    pub luminosity: f32,
    pub suggested_color: TextColor,
}

impl PlacementSuggestion {
    pub fn into_style(self, font_family: &str) -> OverlayStyle {
        OverlayStyle {
            x: Some(self.x),
            y: Some(self.y),
            font_size: Some(DEFAULT_FONT_SIZE),
            font_family: Some(font_family.to_string()),
            color: Some(self.suggested_color.hex().to_string()),
            shadow_intensity: Some(DEFAULT_SHADOW_INTENSITY),
            opacity: Some(DEFAULT_OPACITY),
            reference_container_width: None,
        }
    }
}

/// Asks a vision-capable provider where text fits on an image.
#[derive(Clone)]
pub struct PlacementAnalyzer<P: Provider> {
    provider: P,
    objects: Arc<dyn ObjectStore>,
}

impl<P: Provider> PlacementAnalyzer<P> {
    pub fn new(provider: P, objects: Arc<dyn ObjectStore>) -> Self {
        Self { provider, objects }
    }

    pub async fn analyze(&self, image_url: &str) -> PipelineResult<PlacementSuggestion> {
        self.request(image_url)
            .await
            .map_err(PipelineError::analysis)
    }

    async fn request(&self, image_url: &str) -> Result<PlacementSuggestion> {
        let bytes = self
            .objects
            .fetch(image_url)
            .await
            .with_context(|| "failed to load image for analysis")?;
        let attachment = DataAttachment::image(bytes, None)?;
        let response = self
            .provider
            .clone()
            .append_system_input(render_prompt()?)
            .append_user_input(USER_INSTRUCTION.to_string())
            .append_user_data(attachment)
            .complete()
            .await?;
        debug!(model = ?response.model, "placement analysis answered");
        parse_suggestion(&response.text)
    }
}

pub fn render_prompt() -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("band_min", &UPPER_BAND.0);
    context.insert("band_max", &UPPER_BAND.1);
    Tera::one_off(PLACEMENT_TEMPLATE, &context, false)
        .with_context(|| "failed to render placement prompt")
}

pub fn parse_suggestion(text: &str) -> Result<PlacementSuggestion> {
    let object = extract_json_object(text)?;
    let x = number_field(&object, "x")?.ok_or_else(|| anyhow!("placement is missing 'x'"))?;
    let y = number_field(&object, "y")?.ok_or_else(|| anyhow!("placement is missing 'y'"))?;
    let luminosity = number_field(&object, "luminosity")?
        .unwrap_or(CONTRAST_THRESHOLD)
        .clamp(0.0, 100.0);
    let suggested_color = ["suggestedColor", "suggested_color", "color"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .and_then(TextColor::parse)
        .unwrap_or_else(|| TextColor::for_luminosity(luminosity));
    Ok(PlacementSuggestion {
        x: x.clamp(0.0, 100.0),
        y: y.clamp(0.0, 100.0),
        luminosity,
        suggested_color,
    })
}

/// Numbers may arrive as JSON numbers or numeric strings (`"25"`, `"25%"`).
fn number_field(object: &Map<String, Value>, key: &str) -> Result<Option<f32>> {
    let value = match object.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match value {
        Some(value) if value.is_finite() => Ok(Some(value as f32)),
        _ => Err(anyhow!("placement field '{}' is not a number", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{MemoryObjectStore, ScriptedProvider, tiny_png};
    use insta::assert_snapshot;

    #[test]
    fn prompt_snapshot() {
        let prompt = render_prompt().expect("prompt");
        assert_snapshot!(prompt.trim(), @r#"
        You are a layout assistant for marketing images.
        Find the best spot for a short headline so it stays legible on top of the picture.

        Return only a JSON object with these fields:
        - "x": horizontal center of the text, 0-100 percent of the image width.
        - "y": vertical center of the text, 0-100 percent of the image height. Prefer 10-35 when the upper third has usable empty space.
        - "luminosity": brightness of that region, 0 (black) to 100 (white).
        - "suggestedColor": "white" or "black", whichever contrasts better with that region.

        Avoid covering faces or products.
        "#);
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let suggestion = parse_suggestion(
            "Sure! Here is my answer:\n```json\n{\"x\": 50, \"y\": 22, \"luminosity\": 80, \"suggestedColor\": \"black\"}\n```",
        )
        .expect("suggestion");
        assert_eq!(
            suggestion,
            PlacementSuggestion {
                x: 50.0,
                y: 22.0,
                luminosity: 80.0,
                suggested_color: TextColor::Black,
            }
        );
    }

    #[test]
    fn out_of_range_values_are_clamped_and_color_follows_contrast() {
        let suggestion =
            parse_suggestion(r#"{"x": 140, "y": "-5", "luminosity": "72%", "suggestedColor": "teal"}"#)
                .expect("suggestion");
        assert_eq!((suggestion.x, suggestion.y), (100.0, 0.0));
        assert_eq!(suggestion.luminosity, 72.0);
        assert_eq!(suggestion.suggested_color, TextColor::Black);

        let dark = parse_suggestion(r#"{"x": 50, "y": 20, "luminosity": 12}"#).expect("dark");
        assert_eq!(dark.suggested_color, TextColor::White);
    }

    #[test]
    fn non_json_or_incomplete_answers_fail() {
        assert!(parse_suggestion("I cannot see any image.").is_err());
        assert!(parse_suggestion(r#"{"y": 20}"#).is_err());
        assert!(parse_suggestion(r#"{"x": "left", "y": 20}"#).is_err());
    }

    #[test]
    fn suggestion_maps_to_fixed_style() {
        let style = PlacementSuggestion {
            x: 40.0,
            y: 20.0,
            luminosity: 10.0,
            suggested_color: TextColor::White,
        }
        .into_style("Inter");
        assert_eq!(style.font_size, Some(54.0));
        assert_eq!(style.color.as_deref(), Some("#FFFFFF"));
        assert_eq!(style.shadow_intensity, Some(0.8));
        assert_eq!(style.opacity, Some(1.0));
        assert_eq!(style.font_family.as_deref(), Some("Inter"));
        assert!(style.reference_container_width.is_none());
    }

    #[tokio::test]
    async fn analyzer_sends_image_and_parses_answer() {
        let objects = Arc::new(MemoryObjectStore::default());
        objects.insert("https://cdn.test/raw.png", tiny_png());
        let provider = ScriptedProvider::new(r#"{"x": 30, "y": 15, "luminosity": 20, "suggestedColor": "white"}"#);
        let analyzer = PlacementAnalyzer::new(provider.clone(), objects);

        let suggestion = analyzer.analyze("https://cdn.test/raw.png").await.expect("analysis");
        assert_eq!((suggestion.x, suggestion.y), (30.0, 15.0));
        assert_eq!(provider.attachments(), vec!["image/png".to_string()]);
    }

    #[tokio::test]
    async fn missing_image_is_an_analysis_error() {
        let objects = Arc::new(MemoryObjectStore::default());
        let analyzer = PlacementAnalyzer::new(ScriptedProvider::new("{}"), objects);
        let err = analyzer.analyze("https://cdn.test/none.png").await.unwrap_err();
        assert_eq!(err.kind(), "analysis_error");
    }
}
