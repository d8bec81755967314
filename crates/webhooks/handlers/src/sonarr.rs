//! Sonarr inbound handler.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use subwatch_webhooks::{HandlerError, SourceHandler};

use crate::arr::{DOWNLOAD_EVENT, ImportedFile, SubtitleDefaults, decode, resolve_file_path};
use crate::collaborator::HandlerContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SonarrPayload {
    event_type: String,
    #[serde(default)]
    series: Option<Series>,
    #[serde(default)]
    episode_file: Option<ImportedFile>,
    #[serde(default)]
    is_upgrade: bool,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// Fetches subtitles for episodes Sonarr has just imported.
pub struct SonarrHandler {
    context: HandlerContext,
    defaults: SubtitleDefaults,
}

impl SonarrHandler {
    pub fn new(context: HandlerContext, defaults: SubtitleDefaults) -> Self {
        Self { context, defaults }
    }
}

#[async_trait]
impl SourceHandler for SonarrHandler {
    async fn handle(&self, payload: &[u8], _headers: &HashMap<String, String>) -> Result<(), HandlerError> {
        let payload: SonarrPayload = decode(payload)?;

        if payload.event_type != DOWNLOAD_EVENT {
            tracing::debug!(event_type = %payload.event_type, "Ignoring Sonarr event");
            return Ok(());
        }

        let series = payload.series.as_ref();
        let path = resolve_file_path(
            payload.episode_file.as_ref(),
            series.and_then(|s| s.path.as_deref()),
        )?;

        tracing::info!(
            series = series.and_then(|s| s.title.as_deref()).unwrap_or("unknown"),
            path = %path,
            upgrade = payload.is_upgrade,
            "Sonarr imported episode"
        );
        self.context
            .process(&path, &self.defaults.language, &self.defaults.provider)
            .await
    }
}
