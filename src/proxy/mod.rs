//! Intercepting proxy with interactive allow/block decisions.
//!
//! This module provides the forward proxy the host application is pointed at:
//! - Target extraction from absolute-form and CONNECT requests
//! - A persistent allow/deny policy store
//! - A decision broker that asks once per unknown target, however many
//!   requests are waiting on it
//! - Forwarding of allowed requests (plain HTTP and opaque CONNECT tunnels)
//!
//! # Architecture
//!
//! ```text
//!  host app ──▶ ProxyServer ──▶ PolicyStore::lookup
//!                   │              │
//!                   │     Allowed / Denied / Unknown
//!                   │                          │
//!                   │                          ▼
//!                   │                   DecisionBroker ──▶ Prompter
//!                   │                          │
//!                   │                PolicyStore::record
//!                   ▼                          │
//!              Forwarder ◀─────────────────────┘
//!          (forward / 403 / 400 / 502 / 503)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use codeshield::proxy::{DecisionBroker, PolicyStore, ProxyConfig, ProxyServer};
//! use std::sync::Arc;
//!
//! let store = Arc::new(PolicyStore::load(persistence));
//! let broker = Arc::new(DecisionBroker::new(store.clone(), prompter, None, audit.clone()));
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::bind(config, store, broker, audit, shutdown_rx).await?;
//! server.run().await?;
//! ```

pub mod broker;
pub mod error;
pub mod forward;
pub mod policy;
pub mod server;
pub mod target;

// Re-export main types for convenient access
pub use broker::{BrokerError, DecisionBroker, PendingInfo, Resolution};
pub use error::{ProxyError, ProxyResult};
pub use forward::{Forwarder, ProxyBody};
pub use policy::{
    Classification, PersistError, PolicyPersistence, PolicySnapshot, PolicyStore, Verdict,
};
pub use server::{ProxyConfig, ProxyServer};
pub use target::{TargetId, extract_target};
