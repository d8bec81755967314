//! Pieces shared by the Sonarr and Radarr handlers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use subwatch_webhooks::HandlerError;

/// The only event type either application sends for a finished import.
pub(crate) const DOWNLOAD_EVENT: &str = "Download";

/// Subtitle settings applied to every file a source reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleDefaults {
    /// Language requested for imported files.
    pub language: String,
    /// Provider queried for imported files.
    pub provider: String,
}

impl Default for SubtitleDefaults {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            provider: "opensubtitles".to_string(),
        }
    }
}

impl SubtitleDefaults {
    pub fn new(language: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            provider: provider.into(),
        }
    }
}

/// Imported file as both applications describe it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportedFile {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub relative_path: Option<String>,
}

/// Full path of the imported file: its own `path` when reported, otherwise
/// the library folder joined with `relativePath`.
pub(crate) fn resolve_file_path(file: Option<&ImportedFile>, folder: Option<&str>) -> Result<String, HandlerError> {
    let file = file.ok_or_else(|| HandlerError::InvalidPayload("imported file is missing".to_string()))?;

    if let Some(path) = file.path.as_deref().filter(|p| !p.is_empty()) {
        return Ok(path.to_string());
    }

    match (folder.filter(|f| !f.is_empty()), file.relative_path.as_deref()) {
        (Some(folder), Some(relative)) if !relative.is_empty() => {
            Ok(Path::new(folder).join(relative).to_string_lossy().into_owned())
        }
        _ => Err(HandlerError::InvalidPayload(
            "imported file has neither a path nor a folder and relative path".to_string(),
        )),
    }
}

pub(crate) fn decode<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(payload).map_err(|e| HandlerError::InvalidPayload(e.to_string()))
}
