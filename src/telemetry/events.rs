//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `CODESHIELD` tag so that every
//! allow, block and prompt outcome leaves an audit trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Audit events for security logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Proxy started listening.
    SessionStart {
        /// Username of the person running the proxy.
        user: String,
        /// Process ID of the proxy.
        pid: u32,
        /// Listening address.
        listen: String,
    },

    /// Proxy stopped.
    SessionEnd {
        /// Username of the person who ran the proxy.
        user: String,
        /// Duration of the session in seconds.
        duration_sec: u64,
        /// Allowed targets at shutdown.
        allowed: usize,
        /// Denied targets at shutdown.
        denied: usize,
    },

    /// Request forwarded.
    RequestAllow {
        /// Target identifier.
        target: String,
        /// Why it was forwarded.
        reason: AllowReason,
    },

    /// Request rejected.
    RequestBlock {
        /// Target identifier.
        target: String,
        /// Why it was rejected.
        reason: BlockReason,
    },

    /// A human answered an authorization prompt.
    PromptDecision {
        /// Target identifier.
        target: String,
        /// The answer.
        decision: Decision,
    },

    /// An authorization prompt went unanswered.
    PromptTimeout {
        /// Target identifier.
        target: String,
        /// Seconds waited before giving up.
        waited_sec: u64,
    },
}

/// Reasons for forwarding a request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Target was already in the allowed set.
    Policy,
    /// User allowed the target in a prompt for this request.
    UserAllowed,
}

/// Reasons for rejecting a request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Target was already in the denied set.
    Policy,
    /// User blocked the target in a prompt for this request.
    UserDenied,
    /// Prompt timed out (fail-closed, not recorded).
    PromptTimeout,
}

/// User decision for permission prompts.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Access allowed.
    Allow,
    /// Access blocked.
    Block,
}

/// An event as it appears on the wire: timestamped and tied to one proxy run.
#[derive(Debug, Clone, Serialize)]
pub struct StampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Proxy run that produced the event.
    pub session: Uuid,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Stamp this event with the current time and `session`.
    pub fn stamp(&self, session: Uuid) -> StampedEvent<'_> {
        StampedEvent {
            timestamp: Utc::now(),
            session,
            event: self,
        }
    }

    /// Whether the event records traffic being stopped.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuditEvent::RequestBlock { .. }
                | AuditEvent::PromptTimeout { .. }
                | AuditEvent::PromptDecision {
                    decision: Decision::Block,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(event: &AuditEvent) -> String {
        serde_json::to_string(&event.stamp(Uuid::nil())).unwrap()
    }

    #[test]
    fn test_session_start_serialization() {
        let json = to_json(&AuditEvent::SessionStart {
            user: "developer".to_string(),
            pid: 12345,
            listen: "127.0.0.1:47123".to_string(),
        });

        assert!(json.contains("\"event\":\"session_start\""));
        assert!(json.contains("\"user\":\"developer\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"listen\":\"127.0.0.1:47123\""));
        assert!(json.contains("\"ts\""));
        assert!(json.contains("\"session\":\"00000000-0000-0000-0000-000000000000\""));
    }

    #[test]
    fn test_request_allow_serialization() {
        let json = to_json(&AuditEvent::RequestAllow {
            target: "http://a.test/x".to_string(),
            reason: AllowReason::UserAllowed,
        });

        assert!(json.contains("\"event\":\"request_allow\""));
        assert!(json.contains("\"target\":\"http://a.test/x\""));
        assert!(json.contains("\"reason\":\"user_allowed\""));
    }

    #[test]
    fn test_request_block_serialization() {
        let json = to_json(&AuditEvent::RequestBlock {
            target: "http://b.test/y".to_string(),
            reason: BlockReason::Policy,
        });

        assert!(json.contains("\"event\":\"request_block\""));
        assert!(json.contains("\"reason\":\"policy\""));
    }

    #[test]
    fn test_prompt_events_serialization() {
        let decision = to_json(&AuditEvent::PromptDecision {
            target: "c.test:443".to_string(),
            decision: Decision::Block,
        });
        assert!(decision.contains("\"event\":\"prompt_decision\""));
        assert!(decision.contains("\"decision\":\"block\""));

        let timeout = to_json(&AuditEvent::PromptTimeout {
            target: "c.test:443".to_string(),
            waited_sec: 30,
        });
        assert!(timeout.contains("\"event\":\"prompt_timeout\""));
        assert!(timeout.contains("\"waited_sec\":30"));
    }

    #[test]
    fn test_session_end_serialization() {
        let json = to_json(&AuditEvent::SessionEnd {
            user: "developer".to_string(),
            duration_sec: 60,
            allowed: 3,
            denied: 1,
        });

        assert!(json.contains("\"event\":\"session_end\""));
        assert!(json.contains("\"allowed\":3"));
        assert!(json.contains("\"denied\":1"));
    }

    #[test]
    fn test_is_denial() {
        let target = || "http://a.test/".to_string();

        assert!(
            AuditEvent::RequestBlock {
                target: target(),
                reason: BlockReason::UserDenied,
            }
            .is_denial()
        );
        assert!(
            AuditEvent::PromptTimeout {
                target: target(),
                waited_sec: 5,
            }
            .is_denial()
        );
        assert!(
            AuditEvent::PromptDecision {
                target: target(),
                decision: Decision::Block,
            }
            .is_denial()
        );
        assert!(
            !AuditEvent::RequestAllow {
                target: target(),
                reason: AllowReason::Policy,
            }
            .is_denial()
        );
    }
}
