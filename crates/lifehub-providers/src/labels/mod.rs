//! Image label generation.

mod gemini;

pub use gemini::{GeminiConfig, GeminiLabeler};

use lifehub_core::normalize_labels;

use crate::provider::BoxFuture;

/// Most labels kept for one image.
pub const MAX_LABELS: usize = 10;

/// Produces descriptive tags for an image.
///
/// Labelling is best effort: implementations log failures and return an
/// empty list, so a labeller outage never fails an upload.
pub trait LabelGenerator: Send + Sync {
    fn generate<'a>(&'a self, image: &'a [u8], mime_type: &'a str) -> BoxFuture<'a, Vec<String>>;
}

/// Labeller used when no Gemini key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLabeler;

impl LabelGenerator for DisabledLabeler {
    fn generate<'a>(&'a self, _image: &'a [u8], _mime_type: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async { Vec::new() })
    }
}

/// Splits a model reply into labels.
///
/// Accepts ASCII and full-width commas, the ideographic enumeration comma
/// and newlines as separators; keeps at most `max` non-empty labels.
pub fn parse_labels(text: &str, max: usize) -> Vec<String> {
    let parts = text.split([',', '，', '、', '\n']);
    let mut labels = normalize_labels(parts);
    labels.truncate(max);
    labels
}
