//! # mockit-core
//!
//! Protocol-agnostic domain logic for a programmable, multi-instance HTTP
//! mock server manager: configuration parsing (JsonMC), request matching,
//! response strategies, relay, OAuth2 token caching, TLS material handling,
//! and instance lifecycle management.
//!
//! HTTP-framework bindings (listener bring-up, TLS acceptors, the axum
//! router) live in `mockit-http`; nothing in this crate depends on an HTTP
//! server framework.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mockit_core::config::InstanceSpec;
//! use mockit_core::jsonmc;
//! use mockit_core::Result;
//!
//! fn load(path: &str) -> Result<()> {
//!     let raw = std::fs::read_to_string(path)?;
//!     let _doc: mockit_core::config::ConfigDocument = jsonmc::parse_into(&raw)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod jsonmc;
pub mod loader;
pub mod matcher;
pub mod oauth2_cache;
pub mod registry;
pub mod relay;
pub mod strategy;
pub mod templating;
pub mod tls_material;

pub use config::{ConfigDocument, Expectation, HttpMethod, InstanceSpec, ServerDeclaration, ServerInfo};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use matcher::{MatchRequest, Matched};
pub use oauth2_cache::TokenCache;
pub use registry::{ListenerFactory, ListenerHandle, Registry, ResolvedTls};
pub use relay::RelayResponse;
pub use strategy::{RenderedResponse, StrategyOutcome};
pub use templating::TemplateContext;
pub use tls_material::TlsMaterialStore;
