//! Default input validator.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use subwatch_webhooks::HandlerError;

use crate::collaborator::InputValidator;

static LANGUAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2,3}([-_][A-Za-z]{2,4})?$").expect("LANGUAGE_RE is a valid regex pattern")
});

static PROVIDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,63}$").expect("PROVIDER_RE is a valid regex pattern")
});

/// Rejects relative and traversing paths, paths outside the media roots,
/// malformed language codes and unknown providers.
#[derive(Debug, Clone, Default)]
pub struct StrictValidator {
    media_roots: Vec<PathBuf>,
    known_providers: HashSet<String>,
}

impl StrictValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts paths to these directories. Empty allows any absolute path.
    pub fn media_roots(mut self, roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.media_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts providers to these names. Empty allows any well-formed name.
    pub fn known_providers(mut self, providers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.known_providers = providers.into_iter().map(Into::into).collect();
        self
    }
}

fn invalid_path(path: &str, reason: &str) -> HandlerError {
    HandlerError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

impl InputValidator for StrictValidator {
    fn sanitize_path(&self, path: &str) -> Result<String, HandlerError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(invalid_path(path, "path is empty"));
        }
        if trimmed.contains('\0') {
            return Err(invalid_path(path, "path contains a NUL byte"));
        }

        let raw = Path::new(trimmed);
        if !raw.is_absolute() {
            return Err(invalid_path(path, "path must be absolute"));
        }

        let mut normalized = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::ParentDir => return Err(invalid_path(path, "path must not contain '..'")),
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        if !self.media_roots.is_empty() && !self.media_roots.iter().any(|root| normalized.starts_with(root)) {
            return Err(invalid_path(path, "path is outside the media directories"));
        }

        normalized
            .into_os_string()
            .into_string()
            .map_err(|_| invalid_path(path, "path is not valid UTF-8"))
    }

    fn validate_language_code(&self, code: &str) -> Result<(), HandlerError> {
        if LANGUAGE_RE.is_match(code) {
            Ok(())
        } else {
            Err(HandlerError::InvalidLanguage(code.to_string()))
        }
    }

    fn validate_provider_name(&self, name: &str) -> Result<(), HandlerError> {
        if !PROVIDER_RE.is_match(name) {
            return Err(HandlerError::InvalidProvider(name.to_string()));
        }
        if !self.known_providers.is_empty() && !self.known_providers.contains(name) {
            return Err(HandlerError::UnknownProvider(name.to_string()));
        }
        Ok(())
    }
}
