//! Outgoing dispatcher - main entry point for publishing events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{DeliveryMode, DispatcherConfig};
use crate::delivery::{CancelScope, DeliveryEngine, DeliveryReport, WebhookTransport};
use crate::endpoint::{CreateEndpoint, EndpointView, OutgoingEndpoint, UpdateEndpoint};
use crate::error::{WebhookError, WebhookResult};
use crate::event::{EventPayload, EventTypeInfo, NewEvent, WebhookEvent, WebhookTest, event_types};
use crate::history::EventHistory;
use crate::registry::EndpointRegistry;
use crate::retry::ExponentialBackoff;

/// Source recorded on test deliveries.
const TEST_EVENT_SOURCE: &str = "webhook-dispatcher";

/// Broadcasts published events to subscribed endpoints.
///
/// Cheap to clone; clones share the registry, history and in-flight deliveries.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: DispatcherConfig,
    registry: Arc<EndpointRegistry>,
    history: EventHistory,
    engine: DeliveryEngine,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Dispatcher {
    /// Creates a dispatcher delivering over HTTP.
    #[cfg(feature = "http-client")]
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_transport(config, Arc::new(crate::delivery::HttpTransport::new()))
    }

    /// Creates a dispatcher delivering through a custom transport.
    pub fn with_transport(config: DispatcherConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        let registry = Arc::new(EndpointRegistry::with_default_retries(
            config.url_policy.clone(),
            config.default_max_retries,
        ));
        let retry = ExponentialBackoff::new()
            .base(config.backoff_base())
            .max_delay(config.max_backoff());
        let engine = DeliveryEngine::new(transport, Arc::new(retry), registry.clone())
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout());

        Self {
            inner: Arc::new(Inner {
                history: EventHistory::new(config.history_capacity),
                config,
                registry,
                engine,
                limits: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Gets the endpoint registry.
    pub fn registry(&self) -> &EndpointRegistry {
        &self.inner.registry
    }

    /// Registers a webhook endpoint.
    pub async fn register_endpoint(&self, request: CreateEndpoint) -> WebhookResult<String> {
        self.inner.registry.add(request).await
    }

    /// Applies a partial update to an endpoint.
    pub async fn update_endpoint(&self, id: &str, update: UpdateEndpoint) -> WebhookResult<EndpointView> {
        self.inner.registry.apply(id, update).await
    }

    /// Unregisters a webhook endpoint by ID.
    pub async fn remove_endpoint(&self, id: &str) -> WebhookResult<OutgoingEndpoint> {
        let removed = self.inner.registry.remove(id).await?;
        self.inner.lock_limits().remove(id);
        Ok(removed)
    }

    /// Lists endpoints with secrets redacted.
    pub async fn endpoints(&self) -> Vec<EndpointView> {
        self.inner.registry.list_redacted().await
    }

    /// Most recent `limit` published events, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<WebhookEvent> {
        self.inner.history.recent(limit).await
    }

    /// Known event types with descriptions.
    pub fn event_types(&self) -> Vec<EventTypeInfo> {
        event_types()
    }

    /// Publishes an event to every enabled, subscribed endpoint.
    ///
    /// Returns the stamped event once it is recorded and its deliveries are
    /// scheduled (async mode) or finished (sync mode). Delivery failures are
    /// logged, never returned.
    pub async fn publish(&self, event: NewEvent) -> WebhookResult<WebhookEvent> {
        self.publish_inner(event, None).await
    }

    /// Like [`publish`](Self::publish), also aborting this event's deliveries
    /// when `cancel` fires.
    pub async fn publish_with_cancel(
        &self,
        event: NewEvent,
        cancel: CancellationToken,
    ) -> WebhookResult<WebhookEvent> {
        self.publish_inner(event, Some(cancel)).await
    }

    async fn publish_inner(
        &self,
        event: NewEvent,
        cancel: Option<CancellationToken>,
    ) -> WebhookResult<WebhookEvent> {
        let event = self.accept(event).await?;
        let scope = self.scope(cancel);

        match self.inner.config.mode {
            DeliveryMode::Sync => self.deliver_inline(&event, &scope).await,
            DeliveryMode::Async => self.schedule(&event, scope).await,
        }
        Ok(event)
    }

    /// Validates, stamps and records an event.
    async fn accept(&self, event: NewEvent) -> WebhookResult<WebhookEvent> {
        if self.inner.shutdown.is_cancelled() {
            return Err(WebhookError::Shutdown);
        }
        event.validate()?;

        let event = WebhookEvent::stamp(event);
        self.inner.history.push(event.clone()).await;
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, source = %event.source, "Published webhook event");
        Ok(event)
    }

    async fn deliver_inline(&self, event: &WebhookEvent, scope: &CancelScope) {
        for endpoint in self.inner.registry.subscribers(&event.event_type).await {
            self.inner.engine.deliver(&endpoint, event, scope).await;
        }
    }

    async fn schedule(&self, event: &WebhookEvent, scope: CancelScope) {
        let endpoints = self.inner.registry.subscribers(&event.event_type).await;
        if endpoints.is_empty() {
            return;
        }

        let event = Arc::new(event.clone());
        for endpoint in endpoints {
            let limit = self.inner.endpoint_limit(&endpoint.id);
            let inner = self.inner.clone();
            let event = event.clone();
            let scope = scope.clone();

            self.inner.tasks.spawn(async move {
                let permit = tokio::select! {
                    _ = scope.cancelled() => return,
                    permit = limit.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return;
                };
                inner.engine.deliver(&endpoint, &event, &scope).await;
                inner.forget_if_removed(&endpoint.id).await;
            });
        }
    }

    /// Sends a `webhook.test` event to one endpoint, once, and reports the result.
    ///
    /// Ignores the endpoint's subscriptions and enabled flag.
    pub async fn send_test(&self, endpoint_id: &str) -> WebhookResult<DeliveryReport> {
        let endpoint = self
            .inner
            .registry
            .get(endpoint_id)
            .await
            .ok_or_else(|| WebhookError::EndpointNotFound(endpoint_id.to_string()))?;

        let event = self
            .accept(NewEvent::new(
                TEST_EVENT_SOURCE,
                EventPayload::WebhookTest(WebhookTest {
                    message: format!("Test delivery to endpoint '{}'", endpoint.name),
                }),
            ))
            .await?;

        let scope = self.scope(None);
        Ok(self.inner.engine.deliver_once(&endpoint, &event, &scope).await)
    }

    /// Waits until every scheduled delivery has finished.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Cancels pending backoff waits and in-flight attempts for every
    /// endpoint, then waits for delivery tasks to exit. Later publishes fail.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.inner.tasks.len(), "Shutting down webhook dispatcher");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Number of delivery tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Token cancelled on shutdown; useful to tie other workers to the dispatcher.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    fn scope(&self, caller: Option<CancellationToken>) -> CancelScope {
        CancelScope::new(self.inner.shutdown.clone(), caller)
    }
}

impl Inner {
    fn endpoint_limit(&self, endpoint_id: &str) -> Arc<Semaphore> {
        let permits = self.config.max_concurrent_per_endpoint.max(1);
        self.lock_limits()
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(permits)))
            .clone()
    }

    /// Drops the concurrency bound of an endpoint removed while a delivery
    /// to it was in flight.
    async fn forget_if_removed(&self, endpoint_id: &str) {
        if self.registry.get(endpoint_id).await.is_none() {
            self.lock_limits().remove(endpoint_id);
        }
    }

    fn lock_limits(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        // A poisoned map is still structurally valid.
        self.limits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryOutcome, OutgoingRequest};
    use crate::endpoint::UrlPolicy;
    use crate::event::SubtitleDownloaded;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebhookTransport for CountingTransport {
        async fn send(&self, _request: OutgoingRequest) -> WebhookResult<u16> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.status)
        }
    }

    fn dispatcher(mode: DeliveryMode, status: u16) -> (Dispatcher, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            status,
            calls: AtomicUsize::new(0),
        });
        let config = DispatcherConfig::new()
            .mode(mode)
            .url_policy(UrlPolicy::strict().without_resolution());
        (Dispatcher::with_transport(config, transport.clone()), transport)
    }

    fn downloaded() -> NewEvent {
        NewEvent::new(
            "downloader",
            EventPayload::SubtitleDownloaded(SubtitleDownloaded {
                media_path: "/media/a.mkv".to_string(),
                subtitle_path: "/media/a.en.srt".to_string(),
                language: "en".to_string(),
                provider: "opensubtitles".to_string(),
                score: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_publish_assigns_id_and_records() {
        let (dispatcher, _) = dispatcher(DeliveryMode::Sync, 200);

        let first = dispatcher.publish(downloaded()).await.unwrap();
        let second = dispatcher.publish(downloaded()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.timestamp >= first.timestamp);

        let history = dispatcher.history(10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
    }

    #[tokio::test]
    async fn test_invalid_event_not_recorded() {
        let (dispatcher, _) = dispatcher(DeliveryMode::Sync, 200);
        let result = dispatcher
            .publish(NewEvent::new("x", EventPayload::custom("nodots", serde_json::Value::Null)))
            .await;
        assert!(matches!(result, Err(WebhookError::InvalidEvent(_))));
        assert!(dispatcher.history(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_subscribers_is_not_an_error() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Async, 200);
        assert!(dispatcher.publish(downloaded()).await.is_ok());
        dispatcher.drain().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_never_reaches_publisher() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Sync, 500);
        dispatcher
            .register_endpoint(CreateEndpoint::new("down", "https://example.test/hook").all_events())
            .await
            .unwrap();

        assert!(dispatcher.publish(downloaded()).await.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_send_test_ignores_subscriptions() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Async, 200);
        let id = dispatcher
            .register_endpoint(CreateEndpoint::new("failures", "https://example.test/hook").events(["subtitle.failed"]))
            .await
            .unwrap();
        dispatcher
            .update_endpoint(&id, UpdateEndpoint { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();

        let report = dispatcher.send_test(&id).await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Delivered { status: 200 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.history(1).await[0].event_type, "webhook.test");

        assert!(matches!(
            dispatcher.send_test("missing").await,
            Err(WebhookError::EndpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_after_shutdown() {
        let (dispatcher, _) = dispatcher(DeliveryMode::Async, 200);
        dispatcher.shutdown().await;
        assert!(matches!(
            dispatcher.publish(downloaded()).await,
            Err(WebhookError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_delivers_once_and_resets_state() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Sync, 200);
        let id = dispatcher
            .register_endpoint(CreateEndpoint::new("hook", "https://example.test/hook").events(["subtitle.downloaded"]))
            .await
            .unwrap();

        dispatcher.publish(downloaded()).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let endpoint = dispatcher.registry().get(&id).await.unwrap();
        assert!(endpoint.last_success.is_some());
        assert_eq!(endpoint.retry_count, 0);
    }

    #[tokio::test]
    async fn test_only_subscribers_receive() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Async, 200);
        for events in [["subtitle.downloaded"], ["subtitle.failed"], ["*"]] {
            dispatcher
                .register_endpoint(CreateEndpoint::new("hook", "https://example.test/hook").events(events))
                .await
                .unwrap();
        }

        dispatcher.publish(downloaded()).await.unwrap();
        dispatcher.drain().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    /// Holds every request until released and tracks peak concurrency.
    struct GatedTransport {
        gate: Semaphore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl WebhookTransport for GatedTransport {
        async fn send(&self, _request: OutgoingRequest) -> WebhookResult<u16> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _ = self.gate.acquire().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(200)
        }
    }

    #[tokio::test]
    async fn test_concurrency_bounded_per_endpoint() {
        let transport = Arc::new(GatedTransport {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = DispatcherConfig::new()
            .max_concurrent_per_endpoint(2)
            .url_policy(UrlPolicy::strict().without_resolution());
        let dispatcher = Dispatcher::with_transport(config, transport.clone());
        dispatcher
            .register_endpoint(CreateEndpoint::new("busy", "https://example.test/hook").all_events())
            .await
            .unwrap();

        for _ in 0..6 {
            dispatcher.publish(downloaded()).await.unwrap();
        }
        while transport.active.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.active.load(Ordering::SeqCst), 2);

        transport.gate.add_permits(6);
        dispatcher.drain().await;
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_backoff() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Async, 500);
        dispatcher
            .register_endpoint(CreateEndpoint::new("down", "https://example.test/hook").all_events())
            .await
            .unwrap();

        dispatcher.publish(downloaded()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        dispatcher.shutdown().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancel_stops_retries() {
        let (dispatcher, transport) = dispatcher(DeliveryMode::Async, 500);
        dispatcher
            .register_endpoint(CreateEndpoint::new("down", "https://example.test/hook").all_events())
            .await
            .unwrap();

        let token = CancellationToken::new();
        dispatcher.publish_with_cancel(downloaded(), token.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        token.cancel();
        dispatcher.drain().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.publish(downloaded()).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_endpoint() {
        let (dispatcher, _) = dispatcher(DeliveryMode::Async, 200);
        let id = dispatcher
            .register_endpoint(CreateEndpoint::new("a", "https://example.test/hook"))
            .await
            .unwrap();
        dispatcher.remove_endpoint(&id).await.unwrap();
        assert!(dispatcher.endpoints().await.is_empty());
    }

    #[tokio::test]
    async fn test_removed_endpoint_bound_not_leaked() {
        let transport = Arc::new(GatedTransport {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = DispatcherConfig::new().url_policy(UrlPolicy::strict().without_resolution());
        let dispatcher = Dispatcher::with_transport(config, transport.clone());
        let id = dispatcher
            .register_endpoint(CreateEndpoint::new("gone", "https://example.test/hook").all_events())
            .await
            .unwrap();

        dispatcher.publish(downloaded()).await.unwrap();
        while transport.active.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        dispatcher.remove_endpoint(&id).await.unwrap();
        // A publish that listed subscribers before the removal re-creates the bound.
        dispatcher.inner.endpoint_limit(&id);
        assert!(dispatcher.inner.lock_limits().contains_key(&id));

        transport.gate.add_permits(1);
        dispatcher.drain().await;
        assert!(!dispatcher.inner.lock_limits().contains_key(&id));
    }
}
