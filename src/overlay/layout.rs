use serde::Serialize;

use crate::model::{
    DEFAULT_FONT_SIZE, DEFAULT_OPACITY, DEFAULT_POSITION, DEFAULT_SHADOW_INTENSITY,
    DEFAULT_TEXT_COLOR, OverlayStyle,
};

pub const DEFAULT_FONT_FAMILY: &str = "sans-serif";
pub const LINE_HEIGHT_FACTOR: f32 = 1.1;
/// Distance from the top of the first line box to its baseline, in ems.
pub const BASELINE_FACTOR: f32 = 0.8;
const MAX_SHADOW_ALPHA: f32 = 0.9;
const SHADOW_BLUR_FACTOR: f32 = 8.0;
const SHADOW_OFFSET_FACTOR: f32 = 4.0;

/// Resolved, renderable description of a text overlay in absolute pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayMask {
    pub width: u32,
    pub height: u32,
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub font_size: f32,
    pub line_height: f32,
    pub font_family: String,
    pub color: String,
    pub opacity: f32,
    pub shadow: Shadow,
    pub lines: Vec<MaskLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskLine {
    /// XML-escaped line content.
    pub text: String,
    pub x: f32,
    pub baseline: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shadow {
    /// CSS form, `rgba(0,0,0,a)`.
    pub color: String,
    pub alpha: f32,
    pub blur: f32,
    pub offset: f32,
}

impl Shadow {
    fn from_intensity(intensity: f32) -> Self {
        let intensity = intensity.clamp(0.0, 1.0);
        let alpha = intensity.min(MAX_SHADOW_ALPHA);
        Self {
            color: format!("rgba(0,0,0,{})", alpha),
            alpha,
            blur: SHADOW_BLUR_FACTOR * intensity,
            offset: SHADOW_OFFSET_FACTOR * intensity,
        }
    }

    fn is_visible(&self) -> bool {
        self.alpha > 0.0
    }
}

/// Maps text and a percentage-based style onto a `width` x `height` raster.
///
/// `posY` is the visual center of the whole block; every line is centered on
/// `posX`. Blank lines keep their row.
pub fn layout(text: &str, style: &OverlayStyle, width: u32, height: u32) -> OverlayMask {
    let rows = split_lines(text);

    let anchor_x = style.x.unwrap_or(DEFAULT_POSITION) / 100.0 * width as f32;
    let anchor_y = style.y.unwrap_or(DEFAULT_POSITION) / 100.0 * height as f32;

    let mut font_size = style
        .font_size
        .filter(|size| *size > 0.0)
        .unwrap_or(DEFAULT_FONT_SIZE);
    if let Some(reference) = style.reference_container_width.filter(|w| *w > 0.0) {
        font_size *= width as f32 / reference;
    }

    let line_height = font_size * LINE_HEIGHT_FACTOR;
    let block_height = rows.len() as f32 * line_height;
    let start_y = anchor_y - block_height / 2.0 + font_size * BASELINE_FACTOR;

    let lines = rows
        .iter()
        .enumerate()
        .map(|(index, row)| MaskLine {
            text: escape_xml(row),
            x: anchor_x,
            baseline: start_y + index as f32 * line_height,
        })
        .collect();

    OverlayMask {
        width,
        height,
        anchor_x,
        anchor_y,
        font_size,
        line_height,
        font_family: style
            .font_family
            .as_deref()
            .map(str::trim)
            .filter(|family| !family.is_empty())
            .unwrap_or(DEFAULT_FONT_FAMILY)
            .to_string(),
        color: normalize_color(style.color.as_deref()),
        opacity: style.opacity.unwrap_or(DEFAULT_OPACITY).clamp(0.0, 1.0),
        shadow: Shadow::from_intensity(style.shadow_intensity.unwrap_or(DEFAULT_SHADOW_INTENSITY)),
        lines,
    }
}

impl OverlayMask {
    /// SVG fragment (defs + text group) for embedding in a document of the
    /// mask's dimensions.
    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        let mut filter = String::new();
        if self.shadow.is_visible() {
            svg.push_str(&format!(
                r##"<defs><filter id="overlay-shadow" x="-20%" y="-20%" width="140%" height="140%"><feDropShadow dx="{o}" dy="{o}" stdDeviation="{d}" flood-color="#000000" flood-opacity="{a}"/></filter></defs>"##,
                o = self.shadow.offset,
                d = self.shadow.blur / 2.0,
                a = self.shadow.alpha
            ));
            filter.push_str(r#" filter="url(#overlay-shadow)""#);
        }
        svg.push_str(&format!(
            r#"<g font-family="{family}" font-size="{size}" fill="{color}" opacity="{opacity}" text-anchor="middle"{filter}>"#,
            family = escape_xml(&self.font_family),
            size = self.font_size,
            color = self.color,
            opacity = self.opacity,
            filter = filter
        ));
        for line in &self.lines {
            svg.push_str(&format!(
                r#"<text x="{x}" y="{y}" xml:space="preserve">{text}</text>"#,
                x = line.x,
                y = line.baseline,
                text = line.text
            ));
        }
        svg.push_str("</g>");
        svg
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Accepts `#rgb`/`#rrggbb` and the two names the placement analyzer emits.
fn normalize_color(color: Option<&str>) -> String {
    let Some(color) = color.map(str::trim).filter(|value| !value.is_empty()) else {
        return DEFAULT_TEXT_COLOR.to_string();
    };
    match color.to_ascii_lowercase().as_str() {
        "white" => return "#FFFFFF".to_string(),
        "black" => return "#000000".to_string(),
        _ => {}
    }
    let hex = color.strip_prefix('#').unwrap_or(color);
    if matches!(hex.len(), 3 | 6) && hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        format!("#{}", hex.to_ascii_uppercase())
    } else {
        DEFAULT_TEXT_COLOR.to_string()
    }
}

pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
