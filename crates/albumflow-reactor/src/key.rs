//! Object key decoding and image type checks.
//!
//! Storage emits keys form-encoded: `+` stands for a space and everything
//! else non-trivial is percent-encoded (including `/` in some producers).

use thiserror::Error;

use crate::error::{PipelineError, Result};

/// Decodes a storage-encoded object key.
///
/// `+` becomes a space first, then percent sequences are decoded, so a
/// literal plus arrives as `%2B` and survives.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| PipelineError::UndecodableKey {
            key: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Lower-cased text after the last `.` of the key, if there is a dot.
pub fn image_extension(key: &str) -> Option<String> {
    key.rfind('.').map(|idx| key[idx + 1..].to_lowercase())
}

/// Why a key failed the image type check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageTypeError {
    /// The key has no extension.
    #[error("Could not determine the image type.")]
    Undetermined,
    /// The extension is not allow-listed.
    #[error("Unsupported image type: {0}.")]
    Unsupported(String),
}

/// Allow-list of image extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTypePolicy {
    allowed: Vec<String>,
}

impl ImageTypePolicy {
    /// Builds a policy from extensions such as `.png`; case-insensitive.
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        let allowed = extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        Self { allowed }
    }

    /// Checks a decoded key, returning its extension when allowed.
    pub fn check(&self, key: &str) -> std::result::Result<String, ImageTypeError> {
        let ext = image_extension(key).ok_or(ImageTypeError::Undetermined)?;
        if self.allowed.iter().any(|a| *a == ext) {
            Ok(ext)
        } else {
            Err(ImageTypeError::Unsupported(ext))
        }
    }
}

impl Default for ImageTypePolicy {
    fn default() -> Self {
        Self::new(&[".jpeg", ".png"])
    }
}
