use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, ImageReader};
use resvg::render;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::{debug, warn};
use usvg::{Options, Tree, fontdb};

use super::font::{FALLBACK_FAMILIES, ResolvedFont, resolve_overlay_font};
use super::layout::{DEFAULT_FONT_FAMILY, OverlayMask, layout};
use crate::data::{JPEG_MIME, PNG_MIME, sniff_image_mime};
use crate::error::{PipelineError, PipelineResult};
use crate::model::OverlayStyle;
use crate::settings::Settings;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
/// Raster size assumed when a decodable source reports no usable dimensions.
pub const FALLBACK_DIMENSION: u32 = 1024;

#[derive(Debug, Clone)]
pub struct BakedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Burns overlay text into source rasters. Holds the font database so system
/// fonts are scanned once per process.
#[derive(Clone)]
pub struct Compositor {
    fontdb: Arc<fontdb::Database>,
    font_family: String,
    quality: u8,
}

impl Compositor {
    pub fn new(font: Option<ResolvedFont>, default_family: &str, quality: u8) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let sans_serif = match &font {
            Some(font) => {
                db.load_font_data(font.data().to_vec());
                Some(font.family.clone())
            }
            None => installed_fallback(&db),
        };
        match sans_serif {
            Some(family) => {
                debug!(family = %family, "sans-serif mapped");
                db.set_sans_serif_family(family);
            }
            None => warn!("no fonts installed, overlay text cannot be rendered"),
        }
        let default_family = default_family.trim();
        Self {
            fontdb: Arc::new(db),
            font_family: if default_family.is_empty() {
                DEFAULT_FONT_FAMILY.to_string()
            } else {
                default_family.to_string()
            },
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let font = match resolve_overlay_font(
            settings.overlay_font_path.as_deref().map(Path::new),
            Some(&settings.overlay_font_family),
            FALLBACK_FAMILIES,
        ) {
            Ok(font) => {
                debug!(family = %font.family, "resolved overlay font");
                Some(font)
            }
            Err(err) => {
                warn!("overlay font unavailable, using system defaults: {:#}", err);
                None
            }
        };
        Self::new(font, &settings.overlay_font_family, settings.jpeg_quality)
    }

    pub fn font_family(&self) -> &str {
        &self.font_family
    }

    /// Lays `text` out against the source's own pixel dimensions and flattens
    /// it onto the source, returning a JPEG.
    pub fn composite(
        &self,
        source: &[u8],
        text: &str,
        style: &OverlayStyle,
    ) -> PipelineResult<BakedImage> {
        let decoded = image::load_from_memory(source).map_err(|err| {
            PipelineError::composite(format!("source image could not be decoded: {}", err))
        })?;
        let (width, height) = measure_dimensions(source, &decoded);

        let mut style = style.clone();
        if style.font_family.as_deref().is_none_or(|family| family.trim().is_empty()) {
            style.font_family = Some(self.font_family.clone());
        }
        let mut mask = layout(text, &style, width, height);
        let has_glyphs = mask.lines.iter().any(|line| !line.text.trim().is_empty());
        if has_glyphs && !self.has_face_for(&mask.font_family) {
            return Err(PipelineError::composite(format!(
                "no installed font matches '{}'",
                mask.font_family
            )));
        }
        mask.font_family = family_stack(&mask.font_family);
        debug!(
            width,
            height,
            font_size = mask.font_size,
            lines = mask.lines.len(),
            "compositing overlay"
        );

        let svg = build_document(source, &decoded, &mask).map_err(PipelineError::composite)?;
        let pixmap = rasterize(&svg, self.fontdb.clone()).map_err(PipelineError::composite)?;
        let bytes = encode_jpeg(&pixmap, self.quality).map_err(PipelineError::composite)?;
        Ok(BakedImage {
            bytes,
            mime: JPEG_MIME,
            width: pixmap.width(),
            height: pixmap.height(),
        })
    }
}

impl Compositor {
    /// Whether resvg will find a face for `family` or, for named families,
    /// the `sans-serif` entry appended by [`family_stack`].
    fn has_face_for(&self, family: &str) -> bool {
        let family = family.trim();
        let families = match generic_family(family) {
            Some(generic) => vec![generic],
            None => vec![fontdb::Family::Name(family), fontdb::Family::SansSerif],
        };
        let query = fontdb::Query {
            families: &families,
            ..Default::default()
        };
        self.fontdb.query(&query).is_some()
    }
}

/// First installed fallback family, else any installed face.
fn installed_fallback(db: &fontdb::Database) -> Option<String> {
    FALLBACK_FAMILIES
        .iter()
        .find(|family| {
            let families = [fontdb::Family::Name(family)];
            let query = fontdb::Query {
                families: &families,
                ..Default::default()
            };
            db.query(&query).is_some()
        })
        .map(|family| family.to_string())
        .or_else(|| {
            db.faces()
                .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
        })
}

fn generic_family(name: &str) -> Option<fontdb::Family<'static>> {
    match name.to_ascii_lowercase().as_str() {
        "sans-serif" => Some(fontdb::Family::SansSerif),
        "serif" => Some(fontdb::Family::Serif),
        "monospace" => Some(fontdb::Family::Monospace),
        "cursive" => Some(fontdb::Family::Cursive),
        "fantasy" => Some(fontdb::Family::Fantasy),
        _ => None,
    }
}

fn measure_dimensions(source: &[u8], decoded: &DynamicImage) -> (u32, u32) {
    let nonzero = |(w, h): &(u32, u32)| *w > 0 && *h > 0;
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .filter(nonzero)
        .or_else(|| Some((decoded.width(), decoded.height())).filter(nonzero))
        .unwrap_or_else(|| {
            warn!(
                "source image reports no dimensions, assuming {0}x{0}",
                FALLBACK_DIMENSION
            );
            (FALLBACK_DIMENSION, FALLBACK_DIMENSION)
        })
}

/// Custom families get a generic fallback so text never silently vanishes.
fn family_stack(primary: &str) -> String {
    let primary = primary.trim();
    if generic_family(primary).is_some() {
        primary.to_string()
    } else {
        format!("'{}', sans-serif", primary.replace('\'', ""))
    }
}

fn build_document(source: &[u8], decoded: &DynamicImage, mask: &OverlayMask) -> Result<String> {
    let (mime, embedded) = match sniff_image_mime(source) {
        Some(mime @ (PNG_MIME | JPEG_MIME)) => (mime, BASE64.encode(source)),
        _ => {
            let mut png = Vec::new();
            decoded
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .with_context(|| "failed to re-encode source as PNG")?;
            (PNG_MIME, BASE64.encode(png))
        }
    };
    let data_uri = format!("data:{};base64,{}", mime, embedded);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = mask.width,
        h = mask.height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = mask.width,
        h = mask.height
    ));
    svg.push_str(&mask.to_svg());
    svg.push_str("</svg>");
    Ok(svg)
}

fn rasterize(svg: &str, fontdb: Arc<fontdb::Database>) -> Result<Pixmap> {
    let options = Options {
        fontdb,
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}

/// Flattens premultiplied RGBA over white and encodes it.
fn encode_jpeg(pixmap: &Pixmap, quality: u8) -> Result<Vec<u8>> {
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| {
            let cover = 255 - px[3];
            [
                px[0].saturating_add(cover),
                px[1].saturating_add(cover),
                px[2].saturating_add(cover),
            ]
        })
        .collect();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality);
    encoder
        .encode(&rgb, pixmap.width(), pixmap.height(), ExtendedColorType::Rgb8)
        .with_context(|| "failed to encode baked image")?;
    Ok(bytes)
}
