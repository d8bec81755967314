//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Endpoint URL could not be parsed or uses a rejected scheme.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Endpoint host is loopback, private or otherwise internal.
    #[error("Disallowed endpoint host: {0}")]
    DisallowedHost(String),

    /// Endpoint not found.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Event rejected at publish time.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Remote address is not on the allow-list.
    #[error("Remote address not whitelisted: {0}")]
    NotWhitelisted(String),

    /// Remote address exhausted its request budget.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Inbound payload exceeds the size limit.
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Declared or actual payload size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// No handler is registered for the inbound source.
    #[error("No handler registered for source: {0}")]
    NoHandler(String),

    /// Invalid signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature header required but absent.
    #[error("Missing signature")]
    MissingSignature,

    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Source handler rejected the payload.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Delivery failed.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Timeout.
    #[error("Request timeout")]
    Timeout,

    /// Delivery aborted by cancellation.
    #[error("Delivery cancelled")]
    Cancelled,

    /// Dispatcher has been shut down.
    #[error("Dispatcher is shut down")]
    Shutdown,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error returned by inbound source handlers.
///
/// Validation variants name the field that failed so the caller can fix
/// its request; none of them are retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Payload could not be decoded into the provider shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// File path failed sanitization.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Language code failed validation.
    #[error("invalid language code: {0}")]
    InvalidLanguage(String),

    /// Provider name failed validation.
    #[error("invalid provider name: {0}")]
    InvalidProvider(String),

    /// Provider name is well-formed but not known.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The file-processing collaborator failed.
    #[error("processing failed: {0}")]
    Processing(String),
}

impl WebhookError {
    /// Short machine-readable class for ingress rejections and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookError::InvalidUrl(_) => "invalid_url",
            WebhookError::DisallowedHost(_) => "disallowed_host",
            WebhookError::EndpointNotFound(_) => "endpoint_not_found",
            WebhookError::InvalidEvent(_) => "invalid_event",
            WebhookError::NotWhitelisted(_) => "not_whitelisted",
            WebhookError::RateLimited(_) => "rate_limited",
            WebhookError::PayloadTooLarge { .. } => "payload_too_large",
            WebhookError::NoHandler(_) => "no_handler",
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::MissingSignature => "missing_signature",
            WebhookError::InvalidPayload(_) => "invalid_payload",
            WebhookError::Handler(_) => "handler_error",
            WebhookError::DeliveryFailed(_) => "delivery_failed",
            WebhookError::HttpError(_) => "http_error",
            WebhookError::Timeout => "timeout",
            WebhookError::Cancelled => "cancelled",
            WebhookError::Shutdown => "shutdown",
            WebhookError::ConfigError(_) => "config_error",
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebhookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WebhookError::Timeout
        } else {
            WebhookError::HttpError(err.to_string())
        }
    }
}
