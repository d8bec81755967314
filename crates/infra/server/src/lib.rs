//! # Subwatch Server
//!
//! Assembles the webhook subsystem from a configuration file: the outgoing
//! dispatcher, the inbound router and the configured source handlers. The
//! host's HTTP layer forwards inbound calls to [`WebhookService::handle_inbound`]
//! and the rest of the application publishes through [`WebhookService::dispatcher`].

mod config;

pub use config::{
    ConfigError, ServiceConfig, SourceConfig, SourcesConfig, ValidationConfig, load_config, parse_config,
};

use std::sync::Arc;

use subwatch_webhook_handlers::{
    CustomHandler, FileProcessor, HandlerContext, InputValidator, RadarrHandler, SonarrHandler, StrictValidator,
};
use subwatch_webhooks::{Dispatcher, InboundRequest, InboundRouter, WebhookResult, WebhookTransport};
use tokio::task::JoinHandle;

/// Source names the inbound router answers to.
pub const SONARR_SOURCE: &str = "sonarr";
pub const RADARR_SOURCE: &str = "radarr";
pub const CUSTOM_SOURCE: &str = "custom";

/// The running webhook subsystem.
pub struct WebhookService {
    dispatcher: Dispatcher,
    router: Arc<InboundRouter>,
    sweeper: JoinHandle<()>,
}

impl WebhookService {
    /// Builds the service, delivering outgoing webhooks over HTTP.
    pub async fn from_config(config: ServiceConfig, processor: Arc<dyn FileProcessor>) -> Result<Self, ConfigError> {
        let dispatcher = Dispatcher::new(config.dispatcher.clone());
        Self::assemble(config, processor, dispatcher).await
    }

    /// Builds the service around a custom outgoing transport.
    pub async fn with_transport(
        config: ServiceConfig,
        processor: Arc<dyn FileProcessor>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, ConfigError> {
        let dispatcher = Dispatcher::with_transport(config.dispatcher.clone(), transport);
        Self::assemble(config, processor, dispatcher).await
    }

    async fn assemble(
        config: ServiceConfig,
        processor: Arc<dyn FileProcessor>,
        dispatcher: Dispatcher,
    ) -> Result<Self, ConfigError> {
        let validator = StrictValidator::new()
            .media_roots(config.validation.media_roots.clone())
            .known_providers(config.validation.known_providers.clone());

        for (name, source) in [
            (SONARR_SOURCE, &config.sources.sonarr),
            (RADARR_SOURCE, &config.sources.radarr),
        ] {
            if let Some(source) = source {
                validator
                    .validate_language_code(&source.language)
                    .and_then(|_| validator.validate_provider_name(&source.provider))
                    .map_err(|e| ConfigError::Invalid(format!("sources.{name}: {e}")))?;
            }
        }

        let router = InboundRouter::new(config.inbound.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let context = HandlerContext::new(processor, Arc::new(validator));

        if let Some(source) = &config.sources.sonarr {
            let handler = SonarrHandler::new(context.clone(), source.subtitle_defaults());
            router
                .register(SONARR_SOURCE, Arc::new(handler), source.secret.clone())
                .await;
        }
        if let Some(source) = &config.sources.radarr {
            let handler = RadarrHandler::new(context.clone(), source.subtitle_defaults());
            router
                .register(RADARR_SOURCE, Arc::new(handler), source.secret.clone())
                .await;
        }
        if let Some(source) = &config.sources.custom {
            router
                .register(CUSTOM_SOURCE, Arc::new(CustomHandler::new(context)), source.secret.clone())
                .await;
        }

        let sweeper = router.spawn_sweeper(dispatcher.shutdown_token().child_token());
        tracing::info!(
            mode = ?config.dispatcher.mode,
            sources = ?router.sources().await,
            allow_list = config.inbound.allowed_ips.len(),
            "Webhook service ready"
        );

        Ok(Self {
            dispatcher,
            router: Arc::new(router),
            sweeper,
        })
    }

    /// Dispatcher used to publish events and manage endpoints.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Inbound router.
    pub fn router(&self) -> &Arc<InboundRouter> {
        &self.router
    }

    /// Routes one inbound call.
    pub async fn handle_inbound(&self, source: &str, request: &InboundRequest) -> WebhookResult<()> {
        self.router.handle(source, request).await
    }

    /// Stops the rate-limit sweeper and drains outgoing deliveries.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "Rate limit sweeper exited abnormally");
        }
    }
}
