//! Image payloads exchanged with the vision service and kept in the meter catalog.
//!
//! An image travels either inline as a base64 `data:` URL (what the vision
//! service returns) or as an `http(s)` URL the view can load on its own.

use std::{fmt, io::Cursor, path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageReader;
use serde::{Deserialize, Serialize};

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";
const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageRef {
    Inline { mime: String, bytes: Arc<Vec<u8>> },
    Remote(String),
}

impl ImageRef {
    /// Wraps raw encoded image bytes, sniffing the MIME type from the payload.
    pub fn inline(bytes: Vec<u8>) -> Self {
        let mime = sniff_mime(&bytes);
        Self::Inline {
            mime,
            bytes: Arc::new(bytes),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix(DATA_URL_PREFIX) {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("data URL is missing its ',' separator"))?;
            let mime = header
                .strip_suffix(BASE64_MARKER)
                .ok_or_else(|| anyhow!("only base64 data URLs are supported"))?;
            let bytes = STANDARD
                .decode(payload.trim())
                .context("data URL payload is not valid base64")?;
            if bytes.is_empty() {
                bail!("data URL carries no image bytes");
            }
            let mime = if mime.is_empty() {
                sniff_mime(&bytes)
            } else {
                mime.to_string()
            };
            return Ok(Self::Inline {
                mime,
                bytes: Arc::new(bytes),
            });
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Remote(raw.to_string()));
        }

        bail!("unsupported image reference (expected a data: or http(s) URL)")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        image::guess_format(&bytes)
            .with_context(|| format!("{} is not a recognised image", path.display()))?;
        Ok(Self::inline(bytes))
    }

    /// The form the vision service and the store expect: a data URL for
    /// inline payloads, the URL itself otherwise.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Inline { mime, bytes } => {
                format!("{DATA_URL_PREFIX}{mime}{BASE64_MARKER},{}", STANDARD.encode(bytes.as_slice()))
            }
            Self::Remote(url) => url.clone(),
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::Inline { bytes, .. } => ImageReader::new(Cursor::new(bytes.as_slice()))
                .with_guessed_format()
                .ok()?
                .into_dimensions()
                .ok(),
            Self::Remote(_) => None,
        }
    }

    /// Short human-readable summary for status lines and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline { mime, bytes } => {
                let size = format_size(bytes.len());
                match self.dimensions() {
                    Some((width, height)) => format!("{mime} {width}x{height}, {size}"),
                    None => format!("{mime}, {size} (undecodable)"),
                }
            }
            Self::Remote(url) => format!("remote {url}"),
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { mime, bytes } => f
                .debug_struct("Inline")
                .field("mime", mime)
                .field("len", &bytes.len())
                .finish(),
            Self::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
        }
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.to_wire()
    }
}

impl TryFrom<String> for ImageRef {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

fn sniff_mime(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_MIME.to_string())
}

fn format_size(len: usize) -> String {
    if len < 1024 {
        format!("{len} B")
    } else {
        format!("{:.1} KiB", len as f64 / 1024.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([12, 200, 40]));
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .expect("encode png");
        buffer
    }

    #[test]
    fn inline_images_sniff_mime_and_dimensions() {
        let image = ImageRef::inline(sample_png(4, 3));
        match &image {
            ImageRef::Inline { mime, .. } => assert_eq!(mime, "image/png"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(image.dimensions(), Some((4, 3)));
        assert!(image.describe().starts_with("image/png 4x3"));
    }

    #[test]
    fn data_urls_survive_the_wire_format() {
        let image = ImageRef::inline(sample_png(2, 2));
        let wire = image.to_wire();
        assert!(wire.starts_with("data:image/png;base64,"));
        assert_eq!(ImageRef::parse(&wire).unwrap(), image);
    }

    #[test]
    fn data_url_without_mime_is_sniffed() {
        let payload = STANDARD.encode(sample_png(1, 1));
        let image = ImageRef::parse(&format!("data:;base64,{payload}")).unwrap();
        match image {
            ImageRef::Inline { mime, .. } => assert_eq!(mime, "image/png"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_urls_are_kept_verbatim() {
        let image = ImageRef::parse("https://cdn.example.com/meters/m1.png").unwrap();
        assert_eq!(image, ImageRef::Remote("https://cdn.example.com/meters/m1.png".into()));
        assert_eq!(image.dimensions(), None);
    }

    #[test]
    fn rejects_unknown_references() {
        assert!(ImageRef::parse("ftp://example.com/a.png").is_err());
        assert!(ImageRef::parse("data:image/png,plain").is_err());
        assert!(ImageRef::parse("data:image/png;base64,@@@").is_err());
        assert!(ImageRef::parse("data:image/png;base64,").is_err());
    }

    #[test]
    fn serde_uses_the_wire_string() {
        let image = ImageRef::Remote("http://localhost:3000/m.png".into());
        let json = serde_json::to_string(&image).unwrap();
        assert_eq!(json, "\"http://localhost:3000/m.png\"");
        let back: ImageRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, image);
    }
}
