//! In-memory registry of outgoing endpoints.

use tokio::sync::RwLock;

use crate::endpoint::{
    CreateEndpoint, DEFAULT_MAX_RETRIES, EndpointView, OutgoingEndpoint, UpdateEndpoint, UrlPolicy,
};
use crate::error::{WebhookError, WebhookResult};

/// Owns every registered endpoint. Endpoints only leave through [`remove`](Self::remove).
pub struct EndpointRegistry {
    endpoints: RwLock<Vec<OutgoingEndpoint>>,
    policy: UrlPolicy,
    default_max_retries: u32,
}

impl EndpointRegistry {
    /// Creates an empty registry enforcing `policy` on every URL.
    pub fn new(policy: UrlPolicy) -> Self {
        Self::with_default_retries(policy, DEFAULT_MAX_RETRIES)
    }

    /// Creates an empty registry with a custom default retry count.
    pub fn with_default_retries(policy: UrlPolicy, default_max_retries: u32) -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            policy,
            default_max_retries,
        }
    }

    /// Validates and registers an endpoint, returning its assigned id.
    pub async fn add(&self, request: CreateEndpoint) -> WebhookResult<String> {
        // Validation may hit DNS, so it runs before the lock is taken.
        self.policy.validate(&request.url).await?;

        let endpoint = OutgoingEndpoint::from_request(request, self.default_max_retries);
        let id = endpoint.id.clone();
        tracing::info!(endpoint_id = %id, name = %endpoint.name, url = %endpoint.url, "Registered webhook endpoint");

        self.endpoints.write().await.push(endpoint);
        Ok(id)
    }

    /// Gets all registered endpoints, in registration order.
    pub async fn list(&self) -> Vec<OutgoingEndpoint> {
        self.endpoints.read().await.clone()
    }

    /// Gets all endpoints with secrets redacted.
    pub async fn list_redacted(&self) -> Vec<EndpointView> {
        self.endpoints
            .read()
            .await
            .iter()
            .map(OutgoingEndpoint::view)
            .collect()
    }

    /// Gets an endpoint by ID.
    pub async fn get(&self, id: &str) -> Option<OutgoingEndpoint> {
        self.endpoints.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// Enabled endpoints subscribed to `event_type`, in registration order.
    pub async fn subscribers(&self, event_type: &str) -> Vec<OutgoingEndpoint> {
        self.endpoints
            .read()
            .await
            .iter()
            .filter(|e| e.should_receive(event_type))
            .cloned()
            .collect()
    }

    /// Mutates an endpoint in place under the write lock.
    pub async fn update<F, T>(&self, id: &str, mutator: F) -> WebhookResult<T>
    where
        F: FnOnce(&mut OutgoingEndpoint) -> T,
    {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| WebhookError::EndpointNotFound(id.to_string()))?;
        Ok(mutator(endpoint))
    }

    /// Applies an admin update, re-validating the URL if it changes.
    pub async fn apply(&self, id: &str, update: UpdateEndpoint) -> WebhookResult<EndpointView> {
        if let Some(url) = &update.url {
            self.policy.validate(url).await?;
        }

        let view = self
            .update(id, |endpoint| {
                update.apply(endpoint);
                endpoint.view()
            })
            .await?;
        tracing::info!(endpoint_id = %id, "Updated webhook endpoint");
        Ok(view)
    }

    /// Unregisters an endpoint.
    pub async fn remove(&self, id: &str) -> WebhookResult<OutgoingEndpoint> {
        let mut endpoints = self.endpoints.write().await;
        let idx = endpoints
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| WebhookError::EndpointNotFound(id.to_string()))?;
        let removed = endpoints.remove(idx);
        tracing::info!(endpoint_id = %id, "Removed webhook endpoint");
        Ok(removed)
    }

    /// Number of registered endpoints.
    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Checks whether no endpoint is registered.
    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}
