use anyhow::{Result, anyhow};

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";
pub const WEBP_MIME: &str = "image/webp";
pub const GIF_MIME: &str = "image/gif";
pub const JSON_MIME: &str = "application/json";
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn image(bytes: Vec<u8>, mime: Option<&str>) -> Result<Self> {
        let mime = match mime.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.to_lowercase(),
            None => sniff_image_mime(&bytes)
                .ok_or_else(|| anyhow!("attachment is not a recognizable image"))?
                .to_string(),
        };
        if !mime.starts_with("image/") {
            return Err(anyhow!("attachment mime '{}' is not an image", mime));
        }
        Ok(Self {
            bytes,
            mime,
            name: None,
        })
    }
}

pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    if detected.starts_with("image/") {
        Some(detected)
    } else {
        None
    }
}

pub fn extension_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        PNG_MIME => Some("png"),
        JPEG_MIME | "image/jpg" => Some("jpg"),
        WEBP_MIME => Some("webp"),
        GIF_MIME => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        JSON_MIME => Some("json"),
        _ => None,
    }
}

pub fn mime_from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => PNG_MIME,
        "jpg" | "jpeg" => JPEG_MIME,
        "webp" => WEBP_MIME,
        "gif" => GIF_MIME,
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "json" => JSON_MIME,
        _ => OCTET_STREAM_MIME,
    }
}
