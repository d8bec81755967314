//! Generic handler for integrations that post `{path, lang, provider}`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subwatch_webhooks::{HandlerError, SourceHandler};

use crate::arr::decode;
use crate::collaborator::HandlerContext;

/// Body accepted by [`CustomHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRequest {
    pub path: String,
    pub lang: String,
    pub provider: String,
}

/// Processes exactly the file, language and provider the caller names.
pub struct CustomHandler {
    context: HandlerContext,
}

impl CustomHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl SourceHandler for CustomHandler {
    async fn handle(&self, payload: &[u8], _headers: &HashMap<String, String>) -> Result<(), HandlerError> {
        let request: CustomRequest = decode(payload)?;
        tracing::info!(path = %request.path, lang = %request.lang, provider = %request.provider, "Custom webhook request");
        self.context
            .process(&request.path, &request.lang, &request.provider)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingProcessor, context};

    #[tokio::test]
    async fn test_valid_request() {
        let processor = RecordingProcessor::new();
        let handler = CustomHandler::new(context(processor.clone()));
        handler
            .handle(br#"{"path": "/media/tv/a.mkv", "lang": "pt-BR", "provider": "opensubtitles"}"#, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(processor.calls().len(), 1);
        assert_eq!(processor.calls()[0].1, "pt-BR");
    }

    #[tokio::test]
    async fn test_each_field_validated() {
        let processor = RecordingProcessor::new();
        let handler = CustomHandler::new(context(processor.clone()));

        let handle = |body: &'static [u8]| {
            let handler = &handler;
            async move { handler.handle(body, &HashMap::new()).await.unwrap_err() }
        };

        let err = handle(br#"{"path": "relative.mkv", "lang": "en", "provider": "opensubtitles"}"#).await;
        assert!(matches!(err, HandlerError::InvalidPath { .. }), "{err}");

        let err = handle(br#"{"path": "/media/a.mkv", "lang": "EN!", "provider": "opensubtitles"}"#).await;
        assert!(matches!(err, HandlerError::InvalidLanguage(_)), "{err}");

        let err = handle(br#"{"path": "/media/a.mkv", "lang": "en", "provider": "Open Subs"}"#).await;
        assert!(matches!(err, HandlerError::InvalidProvider(_)), "{err}");

        let err = handle(br#"{"path": "/media/a.mkv", "lang": "en"}"#).await;
        assert!(matches!(err, HandlerError::InvalidPayload(_)), "{err}");

        assert!(processor.calls().is_empty());
    }
}
