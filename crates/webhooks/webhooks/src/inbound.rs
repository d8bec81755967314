//! Inbound webhook router.
//!
//! Every call passes the same gate, in order: allow-list, rate limit,
//! payload size, handler lookup, signature. The first failing check decides
//! the rejection and later checks never run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::allowlist::{IpAllowList, remote_host};
use crate::config::InboundConfig;
use crate::error::{HandlerError, WebhookError, WebhookResult};
use crate::rate_limiter::RateLimiter;
use crate::signature::{self, SIGNATURE_HEADER};

/// An inbound webhook call as handed over by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Peer address, `ip:port` or bare IP.
    pub remote_addr: String,
    pub headers: HashMap<String, String>,
    /// Declared `Content-Length`, if any.
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn new(remote_addr: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            remote_addr: remote_addr.into(),
            headers: HashMap::new(),
            content_length: Some(body.len() as u64),
            body,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Translates one provider's payload into work for the host application.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn handle(&self, payload: &[u8], headers: &HashMap<String, String>) -> Result<(), HandlerError>;
}

struct RegisteredSource {
    handler: Arc<dyn SourceHandler>,
    secret: Option<String>,
}

/// Authenticates, rate-limits and routes inbound calls to source handlers.
pub struct InboundRouter {
    allow_list: IpAllowList,
    limiter: Arc<RateLimiter>,
    sources: RwLock<HashMap<String, RegisteredSource>>,
    config: InboundConfig,
}

impl InboundRouter {
    /// Creates a router. Fails if an allow-list entry cannot be parsed or a
    /// rate limit or sweep interval is zero.
    pub fn new(config: InboundConfig) -> WebhookResult<Self> {
        if config.rate_limit.interval_secs == 0 {
            return Err(WebhookError::ConfigError(
                "rate_limit.interval_secs must be at least 1".to_string(),
            ));
        }
        if config.sweep_interval_secs == 0 {
            return Err(WebhookError::ConfigError(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            allow_list: IpAllowList::from_entries(&config.allowed_ips)?,
            limiter: Arc::new(RateLimiter::with_limit(config.rate_limit.clone())),
            sources: RwLock::new(HashMap::new()),
            config,
        })
    }

    pub fn config(&self) -> &InboundConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Registers (or replaces) the handler for `source`.
    ///
    /// An empty secret is treated as no secret.
    pub async fn register(&self, source: impl Into<String>, handler: Arc<dyn SourceHandler>, secret: Option<String>) {
        let source = source.into();
        let secret = secret.filter(|s| !s.is_empty());
        tracing::info!(source = %source, signed = secret.is_some(), "Registered inbound webhook source");
        self.sources
            .write()
            .await
            .insert(source, RegisteredSource { handler, secret });
    }

    /// Registered source names.
    pub async fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs every check and, if all pass, delegates to the source's handler.
    pub async fn handle(&self, source: &str, request: &InboundRequest) -> WebhookResult<()> {
        match self.route(source, request).await {
            Ok(()) => {
                tracing::debug!(source = %source, remote = %request.remote_addr, "Inbound webhook handled");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    source = %source,
                    remote = %request.remote_addr,
                    reason = e.kind(),
                    error = %e,
                    "Inbound webhook rejected"
                );
                Err(e)
            }
        }
    }

    async fn route(&self, source: &str, request: &InboundRequest) -> WebhookResult<()> {
        if !self.allow_list.permits(&request.remote_addr) {
            return Err(WebhookError::NotWhitelisted(request.remote_addr.clone()));
        }

        let host = remote_host(&request.remote_addr);
        if !self.limiter.allow(&host).await {
            return Err(WebhookError::RateLimited(host));
        }

        let limit = self.config.max_payload_bytes;
        let size = request
            .content_length
            .unwrap_or(0)
            .max(request.body.len() as u64);
        if size > limit {
            return Err(WebhookError::PayloadTooLarge { size, limit });
        }

        let (handler, secret) = {
            let sources = self.sources.read().await;
            let registered = sources
                .get(source)
                .ok_or_else(|| WebhookError::NoHandler(source.to_string()))?;
            (registered.handler.clone(), registered.secret.clone())
        };

        match (request.get_header(SIGNATURE_HEADER), secret.as_deref()) {
            (Some(sig), Some(secret)) => {
                if !signature::verify(&request.body, secret, sig) {
                    return Err(WebhookError::InvalidSignature);
                }
            }
            (None, Some(_)) if self.config.require_signature => {
                return Err(WebhookError::MissingSignature);
            }
            _ => {}
        }

        handler.handle(&request.body, &request.headers).await?;
        Ok(())
    }

    /// Periodically drops idle rate-limit buckets until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.limiter.clone().spawn_sweeper(
            self.config.sweep_interval(),
            self.config.bucket_idle(),
            cancel,
        )
    }
}
