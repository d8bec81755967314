//! # Subwatch Webhooks
//!
//! Webhook dispatch for Subwatch providing:
//! - Outgoing endpoint registry with SSRF-safe URL validation
//! - Event fan-out with retry and exponential backoff
//! - HMAC-SHA256 payload signing and verification
//! - Bounded event history
//! - Inbound routing with IP allow-list, rate limiting and signature checks
//!
//! ## Example
//!
//! ```rust,ignore
//! use subwatch_webhooks::{CreateEndpoint, Dispatcher, DispatcherConfig, EventPayload, NewEvent};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default());
//!
//! dispatcher
//!     .register_endpoint(
//!         CreateEndpoint::new("notifier", "https://hooks.example.com/subwatch")
//!             .secret("secret123")
//!             .events(["subtitle.downloaded"]),
//!     )
//!     .await?;
//!
//! dispatcher
//!     .publish(NewEvent::new("downloader", EventPayload::SubtitleDownloaded(payload)))
//!     .await?;
//! ```

mod allowlist;
mod config;
mod delivery;
mod dispatcher;
mod endpoint;
mod error;
mod event;
mod history;
mod inbound;
mod registry;
mod retry;
pub mod rate_limiter;
pub mod signature;

pub use allowlist::{IpAllowList, parse_remote_ip, remote_host};
pub use config::{DEFAULT_MAX_PAYLOAD_BYTES, DeliveryMode, DispatcherConfig, InboundConfig};
pub use delivery::{
    CancelScope, DEFAULT_USER_AGENT, DeliveryEngine, DeliveryOutcome, DeliveryReport, OutgoingRequest,
    WebhookTransport,
};
#[cfg(feature = "http-client")]
pub use delivery::HttpTransport;
pub use dispatcher::Dispatcher;
pub use endpoint::{
    ALL_EVENTS, CreateEndpoint, DEFAULT_MAX_RETRIES, EndpointView, OutgoingEndpoint, UpdateEndpoint, UrlPolicy,
    is_internal_ip,
};
pub use error::{HandlerError, WebhookError, WebhookResult};
pub use event::{
    EventKind, EventPayload, EventTypeInfo, NewEvent, SubtitleDownloaded, SubtitleFailed, SubtitleSearched,
    SubtitleUpgraded, WebhookEvent, WebhookTest, event_types,
};
pub use history::{DEFAULT_HISTORY_CAPACITY, EventHistory};
pub use inbound::{InboundRequest, InboundRouter, SourceHandler};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use registry::EndpointRegistry;
pub use retry::{ExponentialBackoff, RetryStrategy};
pub use signature::{SIGNATURE_HEADER, SIGNATURE_PREFIX, WebhookSigner};

/// Re-exported so hosts can build cancellation scopes without a direct dependency.
pub use tokio_util::sync::CancellationToken;
