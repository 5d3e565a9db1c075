//! Immutable stage artifacts.

use crate::errors::AdflowError;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Content type of an artifact payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// A PNG-encoded bitmap.
    #[serde(rename = "image/png")]
    Png,
    /// A UTF-8 JSON document.
    #[serde(rename = "application/json")]
    Json,
}

impl ContentType {
    /// Returns the MIME string.
    #[must_use]
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Json => "application/json",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// An immutable payload produced by a stage.
///
/// Cloning is cheap: the payload is shared. The content hash covers the
/// payload bytes and is the artifact's cache identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    payload: Arc<Vec<u8>>,
    content_type: ContentType,
    width: u32,
    height: u32,
    has_alpha: bool,
    content_hash: String,
}

impl Artifact {
    fn new(payload: Vec<u8>, content_type: ContentType, width: u32, height: u32, has_alpha: bool) -> Self {
        let content_hash = hash_bytes(&payload);
        Self {
            payload: Arc::new(payload),
            content_type,
            width,
            height,
            has_alpha,
            content_hash,
        }
    }

    /// Encodes an RGBA bitmap as a PNG artifact.
    ///
    /// The alpha flag is set when any pixel is not fully opaque.
    pub fn from_rgba(image: &RgbaImage) -> Result<Self, AdflowError> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;
        let has_alpha = image.pixels().any(|p| p.0[3] < u8::MAX);
        Ok(Self::new(
            buf.into_inner(),
            ContentType::Png,
            image.width(),
            image.height(),
            has_alpha,
        ))
    }

    /// Wraps PNG bytes, reading dimensions and alpha from the image.
    pub fn from_png_bytes(bytes: Vec<u8>) -> Result<Self, AdflowError> {
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
        let rgba = decoded.to_rgba8();
        let has_alpha = rgba.pixels().any(|p| p.0[3] < u8::MAX);
        Ok(Self::new(bytes, ContentType::Png, rgba.width(), rgba.height(), has_alpha))
    }

    /// Serializes a value as a JSON artifact.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, AdflowError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(bytes, ContentType::Json, 0, 0, false))
    }

    /// Decodes a PNG artifact into an RGBA bitmap.
    pub fn decode_rgba(&self) -> Result<RgbaImage, AdflowError> {
        if self.content_type != ContentType::Png {
            return Err(AdflowError::Serialization(format!(
                "expected image/png artifact, got {}",
                self.content_type
            )));
        }
        let decoded = image::load_from_memory_with_format(&self.payload, ImageFormat::Png)?;
        Ok(decoded.to_rgba8())
    }

    /// Deserializes a JSON artifact.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, AdflowError> {
        if self.content_type != ContentType::Json {
            return Err(AdflowError::Serialization(format!(
                "expected application/json artifact, got {}",
                self.content_type
            )));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// The raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload's content type.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Pixel width (zero for JSON artifacts).
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Pixel height (zero for JSON artifacts).
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the bitmap carries transparency.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// SHA-256 of the payload, hex encoded.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Returns true if both handles share the same payload allocation.
    #[must_use]
    pub fn shares_payload_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Returns a lightweight, serializable summary.
    #[must_use]
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            content_type: self.content_type,
            width: self.width,
            height: self.height,
            has_alpha: self.has_alpha,
            content_hash: self.content_hash.clone(),
            size_bytes: self.payload.len(),
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("content_type", &self.content_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_alpha", &self.has_alpha)
            .field("content_hash", &self.content_hash)
            .field("size_bytes", &self.payload.len())
            .finish()
    }
}

impl Serialize for Artifact {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.summary().serialize(serializer)
    }
}

/// Metadata describing an artifact without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Payload content type.
    pub content_type: ContentType,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Whether the bitmap carries transparency.
    pub has_alpha: bool,
    /// SHA-256 of the payload, hex encoded.
    pub content_hash: String,
    /// Payload size.
    pub size_bytes: usize,
}

impl ArtifactSummary {
    /// Converts the summary to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("content_type".to_string(), serde_json::json!(self.content_type.as_mime()));
        map.insert("width".to_string(), serde_json::json!(self.width));
        map.insert("height".to_string(), serde_json::json!(self.height));
        map.insert("has_alpha".to_string(), serde_json::json!(self.has_alpha));
        map.insert("content_hash".to_string(), serde_json::json!(self.content_hash));
        map.insert("size_bytes".to_string(), serde_json::json!(self.size_bytes));
        map
    }
}

/// Hashes bytes with SHA-256 and returns the hex digest.
#[must_use]
pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
