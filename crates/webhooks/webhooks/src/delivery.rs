//! Webhook delivery engine.
//!
//! One delivery is one event sent to one endpoint: attempt 0 fires
//! immediately, attempts `1..=max_retries` wait for the retry strategy's
//! delay first. Endpoint bookkeeping (`retry_count`, `last_attempt`,
//! `last_success`) is written back to the registry after every attempt,
//! never while a request is in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::endpoint::OutgoingEndpoint;
use crate::error::{WebhookError, WebhookResult};
use crate::event::WebhookEvent;
use crate::registry::EndpointRegistry;
use crate::retry::RetryStrategy;
use crate::signature::{SIGNATURE_HEADER, WebhookSigner};

/// User agent sent with every delivery.
pub const DEFAULT_USER_AGENT: &str = concat!("subwatch-webhooks/", env!("CARGO_PKG_VERSION"));

/// A fully built outgoing HTTP call.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// Target URL.
    pub url: String,
    /// Headers, in send order.
    pub headers: Vec<(String, String)>,
    /// Exact body bytes, as signed.
    pub body: Vec<u8>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl OutgoingRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends outgoing requests. Returns the HTTP status code on any response.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> WebhookResult<u16>;
}

/// `reqwest`-backed transport.
#[cfg(feature = "http-client")]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Creates a transport around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-client")]
impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> WebhookResult<u16> {
        let mut builder = self.client.post(&request.url).timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = builder.body(request.body).send().await?;
        Ok(response.status().as_u16())
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeliveryOutcome {
    /// A 2xx response was received.
    Delivered { status: u16 },
    /// Every attempt failed.
    Exhausted { last_error: String },
    /// Cancellation stopped the loop.
    Cancelled,
}

/// Result of one (event, endpoint) delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub endpoint_id: String,
    pub event_id: String,
    /// Attempts actually sent.
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

/// Cancellation sources a delivery listens to: the dispatcher's own shutdown
/// token and, optionally, one supplied by the publisher.
#[derive(Debug, Clone)]
pub struct CancelScope {
    shutdown: CancellationToken,
    caller: Option<CancellationToken>,
}

impl CancelScope {
    pub fn new(shutdown: CancellationToken, caller: Option<CancellationToken>) -> Self {
        Self { shutdown, caller }
    }

    /// Completes when either token is cancelled.
    pub async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = caller.cancelled() => {}
                }
            }
            None => self.shutdown.cancelled().await,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.caller.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// Header names endpoint configuration may not override.
const RESERVED_HEADERS: [&str; 3] = ["content-type", "user-agent", "x-hub-signature-256"];

/// Delivers events to endpoints with retry and backoff.
pub struct DeliveryEngine {
    transport: Arc<dyn WebhookTransport>,
    retry_strategy: Arc<dyn RetryStrategy>,
    registry: Arc<EndpointRegistry>,
    user_agent: String,
    timeout: Duration,
}

impl DeliveryEngine {
    /// Creates a new delivery engine.
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        retry_strategy: Arc<dyn RetryStrategy>,
        registry: Arc<EndpointRegistry>,
    ) -> Self {
        Self {
            transport,
            retry_strategy,
            registry,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the HTTP call for an endpoint from already-serialized bytes.
    pub fn build_request(&self, endpoint: &OutgoingEndpoint, body: Vec<u8>) -> OutgoingRequest {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ];

        let mut custom: Vec<_> = endpoint
            .headers
            .iter()
            .filter(|(k, _)| {
                !RESERVED_HEADERS
                    .iter()
                    .any(|reserved| k.eq_ignore_ascii_case(reserved))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        custom.sort();
        headers.extend(custom);

        if let Some(secret) = &endpoint.secret {
            let signer = WebhookSigner::new(secret.as_str());
            headers.push((SIGNATURE_HEADER.to_string(), signer.sign_header(&body)));
        }

        OutgoingRequest {
            url: endpoint.url.clone(),
            headers,
            body,
            timeout: self.timeout,
        }
    }

    /// Sends one attempt; a non-2xx status counts as failure.
    pub async fn attempt(&self, request: OutgoingRequest) -> WebhookResult<u16> {
        let status = self.transport.send(request).await?;
        if (200..300).contains(&status) {
            Ok(status)
        } else {
            Err(WebhookError::DeliveryFailed(format!("HTTP {status}")))
        }
    }

    /// Runs the full retry loop for one event against one endpoint.
    ///
    /// Failures never propagate: the report and the log are the only
    /// trace of an abandoned delivery.
    pub async fn deliver(
        &self,
        endpoint: &OutgoingEndpoint,
        event: &WebhookEvent,
        cancel: &CancelScope,
    ) -> DeliveryReport {
        self.run(endpoint, event, endpoint.max_retries, cancel).await
    }

    /// Sends a single attempt with no retries.
    pub async fn deliver_once(
        &self,
        endpoint: &OutgoingEndpoint,
        event: &WebhookEvent,
        cancel: &CancelScope,
    ) -> DeliveryReport {
        self.run(endpoint, event, 0, cancel).await
    }

    async fn run(
        &self,
        endpoint: &OutgoingEndpoint,
        event: &WebhookEvent,
        max_retries: u32,
        cancel: &CancelScope,
    ) -> DeliveryReport {
        let report = |attempts, outcome| DeliveryReport {
            endpoint_id: endpoint.id.clone(),
            event_id: event.id.clone(),
            attempts,
            outcome,
        };

        let body = match event.to_payload() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(endpoint_id = %endpoint.id, event_id = %event.id, error = %e, "Failed to serialize webhook event");
                return report(0, DeliveryOutcome::Exhausted { last_error: e.to_string() });
            }
        };

        let mut attempts = 0;
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.retry_strategy.delay(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(endpoint_id = %endpoint.id, event_id = %event.id, attempt, "Delivery cancelled during backoff");
                        return report(attempts, DeliveryOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.record(&endpoint.id, |ep| ep.retry_count = attempt).await;

            let request = self.build_request(endpoint, body.clone());
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(WebhookError::Cancelled),
                result = self.attempt(request) => result,
            };
            attempts += 1;

            let now = Utc::now();
            match result {
                Ok(status) => {
                    self.record(&endpoint.id, |ep| {
                        ep.last_attempt = Some(now);
                        ep.last_success = Some(now);
                        ep.retry_count = 0;
                    })
                    .await;
                    tracing::debug!(endpoint_id = %endpoint.id, event_id = %event.id, attempt, status, "Webhook delivered");
                    return report(attempts, DeliveryOutcome::Delivered { status });
                }
                Err(WebhookError::Cancelled) => {
                    self.record(&endpoint.id, |ep| ep.last_attempt = Some(now)).await;
                    tracing::debug!(endpoint_id = %endpoint.id, event_id = %event.id, attempt, "Delivery cancelled in flight");
                    return report(attempts, DeliveryOutcome::Cancelled);
                }
                Err(e) => {
                    self.record(&endpoint.id, |ep| ep.last_attempt = Some(now)).await;
                    tracing::debug!(endpoint_id = %endpoint.id, event_id = %event.id, attempt, error = %e, "Webhook attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        tracing::warn!(
            endpoint_id = %endpoint.id,
            event_id = %event.id,
            event_type = %event.event_type,
            attempts,
            error = %last_error,
            "Webhook delivery abandoned after exhausting retries"
        );
        report(attempts, DeliveryOutcome::Exhausted { last_error })
    }

    /// Writes delivery state back; the endpoint may have been removed meanwhile.
    async fn record(&self, endpoint_id: &str, mutator: impl FnOnce(&mut OutgoingEndpoint)) {
        if self.registry.update(endpoint_id, mutator).await.is_err() {
            tracing::debug!(endpoint_id = %endpoint_id, "Endpoint removed during delivery");
        }
    }
}
