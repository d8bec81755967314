//! # Subwatch Webhook Handlers
//!
//! Inbound source handlers for the webhook router:
//! - [`SonarrHandler`] and [`RadarrHandler`] for import notifications
//! - [`CustomHandler`] for integrations posting `{path, lang, provider}`
//!
//! Handlers validate every field through an [`InputValidator`] before the
//! host's [`FileProcessor`] sees it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use subwatch_webhook_handlers::{HandlerContext, SonarrHandler, StrictValidator, SubtitleDefaults};
//!
//! let context = HandlerContext::new(processor, Arc::new(StrictValidator::new().media_roots(["/media"])));
//! router
//!     .register("sonarr", Arc::new(SonarrHandler::new(context, SubtitleDefaults::default())), Some(secret))
//!     .await;
//! ```

mod arr;
mod collaborator;
mod custom;
mod radarr;
mod sonarr;
mod validator;

#[cfg(test)]
mod testing;

pub use arr::SubtitleDefaults;
pub use collaborator::{FileProcessor, HandlerContext, InputValidator, ProcessError};
pub use custom::{CustomHandler, CustomRequest};
pub use radarr::RadarrHandler;
pub use sonarr::SonarrHandler;
pub use validator::StrictValidator;
