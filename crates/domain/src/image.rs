//! Image references attached to devices (album art, camera snapshots).
//!
//! The image bytes are owned by an external collaborator; devices only
//! hold a reference to where the image can be fetched.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where an image can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Url(String),
    Path(PathBuf),
}

/// An externally managed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub source: ImageSource,
}

impl Image {
    #[must_use]
    pub fn from_url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::Url(url.into()),
        }
    }

    #[must_use]
    pub fn from_path(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::Path(path.into()),
        }
    }
}

/// A named camera image slot on a device (e.g. `front` / `Front`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraImage {
    pub id: String,
    pub title: String,
    pub image: Image,
}
