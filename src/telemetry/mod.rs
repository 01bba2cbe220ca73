//! Telemetry and audit logging for CodeShield.
//!
//! This module provides structured audit logging to syslog with the
//! `CODESHIELD` tag. Every forwarded request, rejection and prompt outcome is
//! recorded.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): security events as JSON, never on stdout
//! - **Debug logging** (tracing): diagnostics on stderr via `tracing`
//! - These are completely separate concerns
//!
//! # Usage
//!
//! ```ignore
//! use codeshield::telemetry::{AuditEvent, AuditLogger, BlockReason};
//!
//! let audit = AuditLogger::new().unwrap_or_else(|_| AuditLogger::new_null());
//! audit.log(AuditEvent::RequestBlock {
//!     target: "http://b.test/y".to_string(),
//!     reason: BlockReason::Policy,
//! });
//! ```
//!
//! # Event Format
//!
//! Events are logged as JSON with an ISO8601 timestamp and the id of the
//! proxy run that produced them:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","session":"5f0c…","event":"request_block","target":"http://b.test/y","reason":"policy"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AllowReason, AuditEvent, BlockReason, Decision};
pub use syslog::{AuditLogger, SYSLOG_TAG};
