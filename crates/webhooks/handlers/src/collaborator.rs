//! Contracts of the host application's services that handlers call into.

use std::sync::Arc;

use async_trait::async_trait;
use subwatch_webhooks::HandlerError;

/// Error produced by a [`FileProcessor`].
pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;

/// Downloads or refreshes subtitles for one media file.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process_file(&self, path: &str, language: &str, provider: &str) -> Result<(), ProcessError>;
}

/// Checks untrusted input taken from inbound payloads.
pub trait InputValidator: Send + Sync {
    /// Returns the normalized path, or why it was rejected.
    fn sanitize_path(&self, path: &str) -> Result<String, HandlerError>;

    fn validate_language_code(&self, code: &str) -> Result<(), HandlerError>;

    fn validate_provider_name(&self, name: &str) -> Result<(), HandlerError>;
}

/// Everything a handler needs to turn a payload into work.
#[derive(Clone)]
pub struct HandlerContext {
    processor: Arc<dyn FileProcessor>,
    validator: Arc<dyn InputValidator>,
}

impl HandlerContext {
    pub fn new(processor: Arc<dyn FileProcessor>, validator: Arc<dyn InputValidator>) -> Self {
        Self { processor, validator }
    }

    /// Validates every field, then hands the file to the processor.
    pub async fn process(&self, path: &str, language: &str, provider: &str) -> Result<(), HandlerError> {
        let path = self.validator.sanitize_path(path)?;
        self.validator.validate_language_code(language)?;
        self.validator.validate_provider_name(provider)?;

        self.processor
            .process_file(&path, language, provider)
            .await
            .map_err(|e| HandlerError::Processing(e.to_string()))
    }
}
