//! Picked-file reading, MIME sniffing and data-URI encoding.

use std::sync::Arc;

use base64::Engine;

use crate::error::ReadError;

/// The image types the generation service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
}

impl ImageMime {
    pub const ALL: [ImageMime; 3] = [ImageMime::Jpeg, ImageMime::Png, ImageMime::Webp];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ImageMime::Jpeg => &["jpg", "jpeg"],
            ImageMime::Png => &["png"],
            ImageMime::Webp => &["webp"],
        }
    }
}

/// Result of sniffing: either an accepted type or a label for the rejected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detected {
    Allowed(ImageMime),
    Rejected(String),
}

/// Magic bytes decide; the extension only names what we rejected.
pub fn sniff_mime(bytes: &[u8], file_name: &str) -> Detected {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Detected::Allowed(ImageMime::Jpeg);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Detected::Allowed(ImageMime::Png);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Detected::Allowed(ImageMime::Webp);
    }

    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Detected::Rejected("image/gif".to_owned());
    }
    if bytes.starts_with(b"BM") {
        return Detected::Rejected("image/bmp".to_owned());
    }

    let label = match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => match ext.to_ascii_lowercase().as_str() {
            "svg" => "image/svg+xml".to_owned(),
            "tif" | "tiff" => "image/tiff".to_owned(),
            "heic" => "image/heic".to_owned(),
            other => format!("unrecognised .{other} data"),
        },
        _ => "application/octet-stream".to_owned(),
    };
    Detected::Rejected(label)
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
    pub mime: Detected,
}

impl UploadedImage {
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = sniff_mime(&bytes, &file_name);
        Self { file_name, bytes: bytes.into(), mime }
    }

    pub fn allowed_mime(&self) -> Option<ImageMime> {
        match self.mime {
            Detected::Allowed(mime) => Some(mime),
            Detected::Rejected(_) => None,
        }
    }

    pub fn mime_label(&self) -> &str {
        match &self.mime {
            Detected::Allowed(mime) => mime.as_str(),
            Detected::Rejected(label) => label,
        }
    }
}

/// `data:<mime>;base64,<payload>` for the JSON request body.
pub fn to_data_uri(mime: ImageMime, bytes: &[u8]) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{payload}", mime.as_str())
}

/// Read the bytes behind a picked file handle.
#[cfg(not(target_arch = "wasm32"))]
pub async fn read_picked(handle: rfd::FileHandle) -> Result<UploadedImage, ReadError> {
    let file_name = handle.file_name();
    let bytes = std::fs::read(handle.path()).map_err(|e| ReadError {
        file_name: file_name.clone(),
        reason: e.to_string(),
    })?;
    log::debug!("read {file_name} ({} bytes)", bytes.len());
    Ok(UploadedImage::from_bytes(file_name, bytes))
}

#[cfg(target_arch = "wasm32")]
pub async fn read_picked(handle: rfd::FileHandle) -> Result<UploadedImage, ReadError> {
    let file_name = handle.file_name();
    let file: &web_sys::File = handle.inner();
    let buffer = wasm_bindgen_futures::JsFuture::from(file.array_buffer())
        .await
        .map_err(|e| ReadError {
            file_name: file_name.clone(),
            reason: e.as_string().unwrap_or_else(|| format!("{e:?}")),
        })?;
    let bytes = js_sys::Uint8Array::new(&buffer).to_vec();
    log::debug!("read {file_name} ({} bytes)", bytes.len());
    Ok(UploadedImage::from_bytes(file_name, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn sniffs_allowed_types_by_content() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0], "a.bin"), Detected::Allowed(ImageMime::Jpeg));
        assert_eq!(sniff_mime(&PNG_HEADER, "photo.jpg"), Detected::Allowed(ImageMime::Png));
        assert_eq!(sniff_mime(b"RIFF\x24\0\0\0WEBPVP8 ", "x"), Detected::Allowed(ImageMime::Webp));
    }

    #[test]
    fn renamed_gif_is_rejected() {
        assert_eq!(sniff_mime(b"GIF89a....", "cat.png"), Detected::Rejected("image/gif".into()));
        assert_eq!(sniff_mime(b"<svg/>", "logo.svg"), Detected::Rejected("image/svg+xml".into()));
        assert_eq!(sniff_mime(b"junk", "cat.png"), Detected::Rejected("unrecognised .png data".into()));
        assert_eq!(sniff_mime(b"", "noext"), Detected::Rejected("application/octet-stream".into()));
    }

    #[test]
    fn data_uri_shape() {
        assert_eq!(to_data_uri(ImageMime::Png, b"hi"), "data:image/png;base64,aGk=");
        assert_eq!(to_data_uri(ImageMime::Jpeg, &[]), "data:image/jpeg;base64,");
    }

    #[test]
    fn uploaded_image_reports_mime() {
        let img = UploadedImage::from_bytes("p.png", PNG_HEADER.to_vec());
        assert_eq!(img.allowed_mime(), Some(ImageMime::Png));
        assert_eq!(img.mime_label(), "image/png");
        let bad = UploadedImage::from_bytes("p.gif", b"GIF89a".to_vec());
        assert_eq!(bad.allowed_mime(), None);
        assert_eq!(bad.mime_label(), "image/gif");
    }
}
