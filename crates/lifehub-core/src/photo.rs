//! Photo gallery types.
//!
//! Photos live in a Google Drive folder; the database keeps one row per Drive
//! file plus the labels attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grid preview size served by Google's image CDN.
const PREVIEW_SUFFIX: &str = "=w600-h600";
/// Lightbox size served by Google's image CDN.
const FULL_SUFFIX: &str = "=w2400";
/// Extension used when the uploaded file name has none.
const DEFAULT_EXTENSION: &str = "jpg";

/// A photo stored in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    /// Google Drive file id.
    pub file_id: String,
    /// Name of the file in Drive.
    pub name: String,
    /// Generated storage name (uploads only).
    pub unique_name: Option<String>,
    pub description: Option<String>,
    /// Direct download link for the Drive file.
    pub image_url: String,
    /// SHA-256 of the uploaded bytes (uploads only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One entry in the Drive browsing grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveImageItem {
    pub id: String,
    pub name: String,
    /// Preview-sized image URL.
    pub url: String,
    /// Full-sized image URL.
    pub full: String,
}

impl DriveImageItem {
    /// Builds the grid entry for a Drive file.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let url = format!("https://lh3.googleusercontent.com/d/{id}{PREVIEW_SUFFIX}");
        let full = format!("https://lh3.googleusercontent.com/d/{id}{FULL_SUFFIX}");
        Self {
            id,
            name: name.into(),
            url,
            full,
        }
    }
}

/// Direct download URL stored for a Drive file.
pub fn drive_download_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?export=download&id={file_id}")
}

/// Generates the storage name for an upload: `<unix millis>-<uuid>.<ext>`.
///
/// The extension is taken from the original file name.
pub fn unique_upload_name(original_name: &str, now: DateTime<Utc>) -> String {
    let extension = original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);
    format!(
        "{}-{}.{}",
        now.timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

/// Trims labels and drops empty ones, keeping order.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|label| label.as_ref().trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

/// Returns the payload of a `data:<mime>;base64,<payload>` URL, or the input
/// unchanged when it has no prefix.
pub fn strip_data_url_prefix(data: &str) -> &str {
    match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    }
}

/// Returns the media type declared by a `data:<mime>;base64,` prefix.
pub fn data_url_mime_type(data: &str) -> Option<&str> {
    let (header, _) = data.strip_prefix("data:")?.split_once(',')?;
    let mime = header.split(';').next()?.trim();
    (!mime.is_empty()).then_some(mime)
}
