//! Third-party integrations and request orchestration for versebridge.
//!
//! Everything that talks to the outside world lives here: the expiring
//! credential cache for the Spotify and GitHub APIs, the Spotify catalog
//! verifier, the Genius candidate resolver, the GitHub issue opener, the
//! Discord deploy notifier, inbound webhook validation/dispatch, and the
//! service facade the HTTP layer calls into.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod clock;
pub mod config;
pub mod deploy;
pub mod discord;
pub mod error;
pub mod genius;
pub mod github;
pub mod service;
pub mod spotify;
pub mod token;
pub mod webhook;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use service::{LyricService, MaintOutcome, ReportOutcome};
pub use token::TokenCache;
pub use webhook::{EventOutcome, WebhookDispatcher, WebhookError, WebhookValidator};
