//! Meter catalog models.
//!
//! A meter is one model of physical meter with the master image every
//! captured unit of that model is compared against.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::images::ImageRef;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meter {
    pub id: String,
    pub model: String,
    pub image: ImageRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry as written in an import file.
///
/// `image` may be a data URL, an http(s) URL, or a path to an image file
/// (relative paths resolve against the import file's directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterInput {
    pub id: String,
    pub model: String,
    pub image: String,
}

impl MeterInput {
    pub fn resolve_image(&self, base_dir: &Path) -> Result<ImageRef> {
        let raw = self.image.trim();
        if raw.starts_with("data:") || raw.starts_with("http://") || raw.starts_with("https://") {
            return ImageRef::parse(raw)
                .with_context(|| format!("invalid image for meter {}", self.id));
        }

        let path = Path::new(raw);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        ImageRef::from_file(&path).with_context(|| format!("invalid image for meter {}", self.id))
    }
}

/// Short listing row for the view; leaves the image payload out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSummary {
    pub id: String,
    pub model: String,
    pub image: String,
}

impl From<&Meter> for MeterSummary {
    fn from(meter: &Meter) -> Self {
        Self {
            id: meter.id.clone(),
            model: meter.model.clone(),
            image: meter.image.describe(),
        }
    }
}
