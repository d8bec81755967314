//! Test doubles shared by the handler tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::collaborator::{FileProcessor, HandlerContext, ProcessError};
use crate::validator::StrictValidator;

/// Records every call; optionally fails each one.
#[derive(Default)]
pub(crate) struct RecordingProcessor {
    calls: Mutex<Vec<(String, String, String)>>,
    failure: Option<String>,
}

impl RecordingProcessor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            ..Default::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileProcessor for RecordingProcessor {
    async fn process_file(&self, path: &str, language: &str, provider: &str) -> Result<(), ProcessError> {
        if let Some(message) = &self.failure {
            return Err(message.clone().into());
        }
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), language.to_string(), provider.to_string()));
        Ok(())
    }
}

pub(crate) fn context(processor: Arc<RecordingProcessor>) -> HandlerContext {
    HandlerContext::new(processor, Arc::new(StrictValidator::new()))
}
