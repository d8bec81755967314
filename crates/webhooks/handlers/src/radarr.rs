//! Radarr inbound handler.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use subwatch_webhooks::{HandlerError, SourceHandler};

use crate::arr::{DOWNLOAD_EVENT, ImportedFile, SubtitleDefaults, decode, resolve_file_path};
use crate::collaborator::HandlerContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RadarrPayload {
    event_type: String,
    #[serde(default)]
    movie: Option<Movie>,
    #[serde(default)]
    movie_file: Option<ImportedFile>,
    #[serde(default)]
    is_upgrade: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Movie {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    folder_path: Option<String>,
}

/// Fetches subtitles for movies Radarr has just imported.
pub struct RadarrHandler {
    context: HandlerContext,
    defaults: SubtitleDefaults,
}

impl RadarrHandler {
    pub fn new(context: HandlerContext, defaults: SubtitleDefaults) -> Self {
        Self { context, defaults }
    }
}

#[async_trait]
impl SourceHandler for RadarrHandler {
    async fn handle(&self, payload: &[u8], _headers: &HashMap<String, String>) -> Result<(), HandlerError> {
        let payload: RadarrPayload = decode(payload)?;

        if payload.event_type != DOWNLOAD_EVENT {
            tracing::debug!(event_type = %payload.event_type, "Ignoring Radarr event");
            return Ok(());
        }

        let movie = payload.movie.as_ref();
        let path = resolve_file_path(
            payload.movie_file.as_ref(),
            movie.and_then(|m| m.folder_path.as_deref()),
        )?;

        tracing::info!(
            movie = movie.and_then(|m| m.title.as_deref()).unwrap_or("unknown"),
            path = %path,
            upgrade = payload.is_upgrade,
            "Radarr imported movie"
        );
        self.context
            .process(&path, &self.defaults.language, &self.defaults.provider)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingProcessor, context};

    #[tokio::test]
    async fn test_download_uses_folder_and_relative_path() {
        let processor = RecordingProcessor::new();
        let handler = RadarrHandler::new(context(processor.clone()), SubtitleDefaults::new("fr", "podnapisi"));
        let body = br#"{
            "eventType": "Download",
            "movie": {"id": 3, "title": "Film", "year": 2020, "folderPath": "/media/movies/Film (2020)"},
            "movieFile": {"id": 9, "relativePath": "Film (2020).mkv"},
            "isUpgrade": false
        }"#;

        handler.handle(body, &HashMap::new()).await.unwrap();
        assert_eq!(
            processor.calls(),
            vec![(
                "/media/movies/Film (2020)/Film (2020).mkv".to_string(),
                "fr".to_string(),
                "podnapisi".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_test_event_is_noop() {
        let processor = RecordingProcessor::new();
        let handler = RadarrHandler::new(context(processor.clone()), SubtitleDefaults::default());
        handler
            .handle(br#"{"eventType": "Test", "movie": {"title": "Test Title"}}"#, &HashMap::new())
            .await
            .unwrap();
        assert!(processor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_default_language_rejected() {
        let processor = RecordingProcessor::new();
        let handler = RadarrHandler::new(context(processor.clone()), SubtitleDefaults::new("french", "podnapisi"));
        let err = handler
            .handle(br#"{"eventType": "Download", "movieFile": {"path": "/media/movies/a.mkv"}}"#, &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::InvalidLanguage("french".to_string()));
    }

    #[tokio::test]
    async fn test_processor_failure_surfaces() {
        let processor = RecordingProcessor::failing("disk full");
        let handler = RadarrHandler::new(context(processor.clone()), SubtitleDefaults::default());
        let err = handler
            .handle(br#"{"eventType": "Download", "movieFile": {"path": "/media/movies/a.mkv"}}"#, &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::Processing("disk full".to_string()));
    }
}
