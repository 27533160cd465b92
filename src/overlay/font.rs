use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

/// Families tried when the configured one is not installed.
pub const FALLBACK_FAMILIES: &[&str] = &[
    "Inter",
    "Helvetica Neue",
    "Arial",
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
];

/// A font file selected for overlays, with the family name it declares.
#[derive(Clone)]
pub struct ResolvedFont {
    pub family: String,
    data: Arc<Vec<u8>>,
}

impl ResolvedFont {
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl std::fmt::Debug for ResolvedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedFont")
            .field("family", &self.family)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub fn load_font_file(path: &Path) -> Result<ResolvedFont> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    let family = family_from_data(&data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))?;
    Ok(ResolvedFont {
        family,
        data: Arc::new(data),
    })
}

/// Picks the overlay font: an explicit file wins, then the named family from
/// the system font database, then the first installed fallback.
pub fn resolve_overlay_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[&str],
) -> Result<ResolvedFont> {
    if let Some(path) = font_path {
        return load_font_file(path);
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(family) = font_family
        && let Ok(resolved) = load_from_family(&db, family)
    {
        return Ok(resolved);
    }

    for candidate in fallback {
        if let Ok(resolved) = load_from_family(&db, candidate) {
            return Ok(resolved);
        }
    }

    Err(anyhow!(
        "no usable font for family '{}'",
        font_family.unwrap_or("sans-serif")
    ))
}

fn load_from_family(db: &fontdb::Database, family: &str) -> Result<ResolvedFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else if family.eq_ignore_ascii_case("serif") {
        vec![fontdb::Family::Serif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let resolved_family = family_from_data(&data, Some(index)).unwrap_or_else(|_| family.to_string());
    Ok(ResolvedFont {
        family: resolved_family,
        data: Arc::new(data),
    })
}

fn family_from_data(data: &[u8], face_index: Option<u32>) -> Result<String> {
    let indices = match face_index {
        Some(index) => vec![index],
        None => (0..ttf_parser::fonts_in_collection(data).unwrap_or(1)).collect(),
    };
    for index in indices {
        if let Ok(face) = Face::parse(data, index)
            && let Some(family) = extract_family_name(&face)
        {
            return Ok(family);
        }
    }
    Err(anyhow!("font declares no family name"))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
