//! Text overlay: pure layout into an [`OverlayMask`] and rasterization of
//! that mask onto a source image.

mod font;
mod layout;
mod render;

pub use font::{FALLBACK_FAMILIES, ResolvedFont, load_font_file, resolve_overlay_font};
pub use layout::{DEFAULT_FONT_FAMILY, MaskLine, OverlayMask, Shadow, layout};
pub use render::{BakedImage, Compositor, DEFAULT_JPEG_QUALITY, FALLBACK_DIMENSION};
