//! Outgoing webhook endpoint configuration and URL validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::error::{WebhookError, WebhookResult};

/// Subscription entry matching every event type.
pub const ALL_EVENTS: &str = "*";

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A registered outgoing webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEndpoint {
    /// Registry-assigned identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Secret for signing payloads.
    pub secret: Option<String>,
    /// Subscribed event types, `"*"` for all.
    pub events: HashSet<String>,
    /// Custom headers to include in requests.
    pub headers: HashMap<String, String>,
    /// Whether this endpoint is enabled.
    pub enabled: bool,
    /// Attempt index of the current or last delivery, 0 after a success.
    pub retry_count: u32,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// When a delivery was last attempted.
    pub last_attempt: Option<DateTime<Utc>>,
    /// When a delivery last succeeded.
    pub last_success: Option<DateTime<Utc>>,
    /// When the endpoint was registered.
    pub created_at: DateTime<Utc>,
    /// When the endpoint was last changed by an admin operation.
    pub updated_at: DateTime<Utc>,
}

impl OutgoingEndpoint {
    /// Builds a new, enabled endpoint from a registration request.
    pub(crate) fn from_request(request: CreateEndpoint, default_max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            url: request.url,
            secret: request.secret.filter(|s| !s.is_empty()),
            events: request.events.into_iter().collect(),
            headers: request.headers,
            enabled: true,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            last_attempt: None,
            last_success: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks if this endpoint subscribes to an event type.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.contains(ALL_EVENTS) || self.events.contains(event_type)
    }

    /// Checks if this endpoint should receive an event.
    pub fn should_receive(&self, event_type: &str) -> bool {
        self.enabled && self.subscribes_to(event_type)
    }

    /// Admin view with the secret redacted.
    pub fn view(&self) -> EndpointView {
        let mut events: Vec<String> = self.events.iter().cloned().collect();
        events.sort();
        EndpointView {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            has_secret: self.secret.is_some(),
            events,
            headers: self.headers.clone(),
            enabled: self.enabled,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_attempt: self.last_attempt,
            last_success: self.last_success,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Registration request for a new endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl CreateEndpoint {
    /// Creates a registration request.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the signing secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Subscribes to specific events.
    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = events.into_iter().map(|e| e.into()).collect();
        self
    }

    /// Subscribes to all events.
    pub fn all_events(mut self) -> Self {
        self.events = vec![ALL_EVENTS.to_string()];
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Overrides the retry count.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEndpoint {
    pub name: Option<String>,
    pub url: Option<String>,
    /// `Some("")` clears the secret.
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub headers: Option<HashMap<String, String>>,
    pub enabled: Option<bool>,
    pub max_retries: Option<u32>,
}

impl UpdateEndpoint {
    /// Applies the update. The caller validates a changed URL beforehand.
    pub(crate) fn apply(self, endpoint: &mut OutgoingEndpoint) {
        if let Some(name) = self.name {
            endpoint.name = name;
        }
        if let Some(url) = self.url {
            endpoint.url = url;
        }
        if let Some(secret) = self.secret {
            endpoint.secret = Some(secret).filter(|s| !s.is_empty());
        }
        if let Some(events) = self.events {
            endpoint.events = events.into_iter().collect();
        }
        if let Some(headers) = self.headers {
            endpoint.headers = headers;
        }
        if let Some(enabled) = self.enabled {
            endpoint.enabled = enabled;
        }
        if let Some(max_retries) = self.max_retries {
            endpoint.max_retries = max_retries;
        }
        endpoint.updated_at = Utc::now();
    }
}

/// Endpoint as exposed to admin callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointView {
    pub id: String,
    pub name: String,
    pub url: String,
    pub has_secret: bool,
    pub events: Vec<String>,
    pub headers: HashMap<String, String>,
    pub enabled: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rules applied to endpoint URLs at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlPolicy {
    /// Accept plain `http` URLs.
    pub allow_http: bool,
    /// Accept loopback, private and link-local hosts.
    pub allow_private_hosts: bool,
    /// Resolve host names and check every resolved address.
    pub resolve_hosts: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl UrlPolicy {
    /// HTTPS only, public hosts only, resolved through DNS.
    pub fn strict() -> Self {
        Self {
            allow_http: false,
            allow_private_hosts: false,
            resolve_hosts: true,
        }
    }

    /// Accepts any http(s) URL. For tests and local development.
    pub fn permissive() -> Self {
        Self {
            allow_http: true,
            allow_private_hosts: true,
            resolve_hosts: false,
        }
    }

    /// Disables DNS resolution, keeping literal-address and name checks.
    pub fn without_resolution(mut self) -> Self {
        self.resolve_hosts = false;
        self
    }

    /// Validates an endpoint URL against this policy.
    pub async fn validate(&self, url: &str) -> WebhookResult<()> {
        let parsed = url::Url::parse(url)
            .map_err(|e| WebhookError::InvalidUrl(format!("{url}: {e}")))?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            scheme => {
                return Err(WebhookError::InvalidUrl(format!(
                    "scheme '{scheme}' not allowed, endpoints must use https"
                )));
            }
        }

        let host = match parsed.host() {
            Some(url::Host::Domain(domain)) => HostKind::Name(domain.to_string()),
            Some(url::Host::Ipv4(ip)) => HostKind::Ip(IpAddr::V4(ip)),
            Some(url::Host::Ipv6(ip)) => HostKind::Ip(IpAddr::V6(ip)),
            None => return Err(WebhookError::InvalidUrl(format!("{url}: missing host"))),
        };

        if self.allow_private_hosts {
            return Ok(());
        }

        match host {
            HostKind::Ip(ip) => check_public_ip(&ip.to_string(), ip),
            HostKind::Name(name) => {
                check_public_name(&name)?;
                if self.resolve_hosts {
                    let port = parsed.port_or_known_default().unwrap_or(443);
                    resolve_and_check(&name, port).await?;
                }
                Ok(())
            }
        }
    }
}

enum HostKind {
    Name(String),
    Ip(IpAddr),
}

fn check_public_ip(host: &str, ip: IpAddr) -> WebhookResult<()> {
    if is_internal_ip(&ip) {
        return Err(WebhookError::DisallowedHost(format!(
            "{host} is a loopback or private address"
        )));
    }
    Ok(())
}

fn check_public_name(name: &str) -> WebhookResult<()> {
    let lower = name.trim_end_matches('.').to_ascii_lowercase();
    if lower == "localhost"
        || lower.ends_with(".localhost")
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::DisallowedHost(format!(
            "{name} is an internal host name"
        )));
    }
    Ok(())
}

async fn resolve_and_check(name: &str, port: u16) -> WebhookResult<()> {
    match tokio::net::lookup_host((name, port)).await {
        Ok(addrs) => {
            for addr in addrs {
                check_public_ip(name, addr.ip())?;
            }
            Ok(())
        }
        Err(e) => {
            // Unresolvable today may resolve later; delivery will surface it.
            tracing::debug!(host = %name, error = %e, "Endpoint host did not resolve");
            Ok(())
        }
    }
}

/// Checks if an IP address belongs to a loopback, private or otherwise
/// non-routable range.
pub fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal_ip(&IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
        }
    }
}
