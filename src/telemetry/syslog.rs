//! Syslog integration for audit logging.
//!
//! Every event goes to the local syslog daemon under the `CODESHIELD` tag as
//! one JSON line. Events that stop traffic (blocks, denied prompts, prompt
//! timeouts) are sent at `warning` severity so they can be filtered apart
//! from routine allows.

use std::sync::{Mutex, PoisonError};

use syslog::{Facility, Formatter3164, LoggerBackend};
use tracing::{debug, error};
use uuid::Uuid;

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "CODESHIELD";

type SyslogWriter = syslog::Logger<LoggerBackend, Formatter3164>;

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared behind an `Arc` by the server, broker and orchestrator; the
/// writer sits behind a mutex.
pub struct AuditLogger {
    /// `None` discards events.
    writer: Option<Mutex<SyslogWriter>>,
    /// Stamped onto every event of this proxy run.
    session: Uuid,
}

impl AuditLogger {
    /// Connect to the local syslog daemon over its Unix socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        let session = Uuid::new_v4();
        debug!("Audit session {} logging to syslog", session);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
            session,
        })
    }

    /// Audit logger that discards every event.
    ///
    /// Used by tests and when no syslog daemon is reachable.
    pub fn new_null() -> Self {
        Self {
            writer: None,
            session: Uuid::new_v4(),
        }
    }

    /// Identifier stamped onto every event from this logger.
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Whether events are being discarded.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }

    /// Log an audit event. Failures are reported through `tracing` only.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let line = match self.encode(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        let written = if event.is_denial() {
            writer.warning(&line)
        } else {
            writer.info(&line)
        };

        match written {
            Ok(()) => debug!("Audit: {}", line),
            Err(e) => error!("Failed to write to syslog: {}", e),
        }
    }

    /// JSON line for `event` as it is sent to syslog.
    fn encode(&self, event: &AuditEvent) -> Result<String, serde_json::Error> {
        serde_json::to_string(&event.stamp(self.session))
    }
}
