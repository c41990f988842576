//! # haiilo-bridge
//!
//! Backend glue for a Haiilo (COYO) plugin.
//!
//! The plugin platform talks to a plugin backend in two directions: it pushes
//! signed lifecycle webhooks (install, uninstall, instance add/remove, access
//! token hand-over), and the plugin frontend needs vendor API data that the
//! browser cannot fetch directly because of CORS. This crate covers both.
//!
//! ## Components
//!
//! - **Token cache** ([`TokenCache`]): holds the vendor access token and its
//!   expiry, refreshing through the OAuth token endpoint with at most one
//!   refresh in flight.
//! - **JWKS verifier** ([`JwksVerifier`]): verifies RS256/RS512 tokens against
//!   allow-listed key sets.
//! - **Lifecycle dispatcher** ([`LifecycleDispatcher`]): turns a verified
//!   lifecycle token into its acknowledgement.
//! - **User proxy** ([`UserProxy`]): relays `/api/users` with the upstream
//!   status and body preserved on failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use haiilo_bridge::{BridgeConfig, BridgeServer};
//!
//! # async fn example() -> haiilo_bridge::Result<()> {
//! let config = BridgeConfig::from_env()?;
//! let server = BridgeServer::builder().config(config).build()?;
//!
//! let app = server.router();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod jwks;
pub mod lifecycle;
#[cfg(feature = "axum")]
pub mod server;
pub mod token;
pub mod transport;
pub mod users;

pub use config::{BridgeConfig, ClientCredentials};
pub use error::{Error, Result};
pub use jwks::{JwksCache, JwksVerifier};
pub use lifecycle::{LifecycleDispatcher, LifecycleEvent, LifecycleEventKind};
#[cfg(feature = "axum")]
pub use server::{BridgeServer, BridgeServerBuilder};
pub use token::{CachedToken, Clock, Grant, ManualClock, SystemClock, TokenCache};
pub use users::{Pagination, UserProxy};
