//! Decision broker for targets without a policy entry.
//!
//! When a request names a target the policy store has never seen, we need to:
//! 1. Suspend that request (and only that request)
//! 2. Ask the user once, however many requests are waiting on the target
//! 3. Record the answer in the policy store
//! 4. Release every waiting request with the same verdict
//!
//! Each unresolved target has at most one pending decision. The first
//! request creates it and spawns a resolution task; later requests subscribe
//! to the same `watch` channel. The resolution runs in its own task, so a
//! client that disconnects while waiting only drops its receiver.
//!
//! # Timeouts
//!
//! By default a decision waits for as long as the user takes. With a prompt
//! timeout configured, an unanswered prompt releases its waiters with
//! `Denied` (fail-closed) without recording anything, so the next request
//! asks again. The prompter is told through [`Prompter::expired`] so it can
//! retract the question.
//!
//! # Example
//!
//! ```ignore
//! use codeshield::proxy::broker::DecisionBroker;
//!
//! let broker = Arc::new(DecisionBroker::new(store, prompter, None, audit));
//! match broker.resolve(&target).await?.verdict() {
//!     Verdict::Allowed => { /* forward */ }
//!     Verdict::Denied => { /* reject */ }
//! }
//! ```

use super::policy::{Classification, PolicyStore, Verdict};
use super::target::TargetId;
use crate::prompt::Prompter;
use crate::telemetry::{AuditEvent, AuditLogger, Decision};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Initial delay before asking again after a prompt failure.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the prompt retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// An in-flight decision shared by every request for one target.
struct PendingDecision {
    /// Unique identifier for log correlation.
    id: Uuid,
    /// When the first request arrived.
    started: Instant,
    /// Publishes the resolution to all waiters.
    outcome: watch::Sender<Option<Resolution>>,
    /// Resolution task, aborted when the decision is abandoned.
    task: AbortHandle,
}

/// Information about a pending decision (for diagnostics).
#[derive(Debug, Clone)]
pub struct PendingInfo {
    /// Unique identifier.
    pub id: Uuid,
    /// Target awaiting a decision.
    pub target: TargetId,
    /// Seconds waiting for decision.
    pub waiting_secs: u64,
    /// Requests currently suspended on this decision.
    pub waiters: usize,
}

/// How a pending decision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A verdict exists in the policy store (recorded now or earlier).
    Decided(Verdict),
    /// Nobody answered within the prompt timeout. Nothing was recorded.
    TimedOut,
}

impl Resolution {
    /// Verdict to enforce for this request. A timeout fails closed.
    pub fn verdict(self) -> Verdict {
        match self {
            Resolution::Decided(verdict) => verdict,
            Resolution::TimedOut => Verdict::Denied,
        }
    }
}

/// Errors from decision resolution.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The pending decision was dropped before it resolved, or the broker
    /// was closed for shutdown before it could ask.
    #[error("Decision for {0} was abandoned")]
    Abandoned(TargetId),
}

/// Resolves unknown targets through the prompter, one prompt per target.
pub struct DecisionBroker {
    store: Arc<PolicyStore>,
    prompter: Arc<dyn Prompter>,
    pending: Mutex<HashMap<TargetId, PendingDecision>>,
    /// Set by `abandon_all`; written and read under the `pending` lock.
    closed: AtomicBool,
    timeout: Option<Duration>,
    retry_delay: Duration,
    audit: Arc<AuditLogger>,
}

impl DecisionBroker {
    /// Create a new decision broker.
    ///
    /// # Arguments
    ///
    /// * `store` - Policy store that receives every answer.
    /// * `prompter` - Collaborator that asks the user.
    /// * `timeout` - Maximum time to wait for an answer; `None` waits forever.
    /// * `audit` - Audit logger for prompt outcomes.
    pub fn new(
        store: Arc<PolicyStore>,
        prompter: Arc<dyn Prompter>,
        timeout: Option<Duration>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            prompter,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timeout,
            retry_delay: DEFAULT_RETRY_DELAY,
            audit,
        }
    }

    /// Set the initial delay between attempts when the prompter fails.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Resolve a target, suspending until a verdict is available.
    ///
    /// Concurrent calls for the same target share one prompt. The verdict is
    /// recorded in the policy store before any caller is released.
    pub async fn resolve(self: &Arc<Self>, target: &TargetId) -> Result<Resolution, BrokerError> {
        let mut outcome = {
            let mut pending = self.lock_pending();

            // A resolution may have finished between the caller's lookup and
            // here; the store is written before the pending entry goes away.
            match self.store.lookup(target.as_str()) {
                Classification::Allowed => return Ok(Resolution::Decided(Verdict::Allowed)),
                Classification::Denied => return Ok(Resolution::Decided(Verdict::Denied)),
                Classification::Unknown => {}
            }

            if self.closed.load(Ordering::SeqCst) {
                debug!("Broker closed, not asking about {}", target);
                return Err(BrokerError::Abandoned(target.clone()));
            }

            match pending.get(target) {
                Some(existing) => {
                    debug!("Joining pending decision {} for {}", existing.id, target);
                    existing.outcome.subscribe()
                }
                None => {
                    let id = Uuid::new_v4();
                    let (tx, rx) = watch::channel(None);
                    let broker = Arc::clone(self);
                    let task_target = target.clone();
                    let task = tokio::spawn(async move {
                        broker.run_resolution(id, task_target).await;
                    });

                    pending.insert(
                        target.clone(),
                        PendingDecision {
                            id,
                            started: Instant::now(),
                            outcome: tx,
                            task: task.abort_handle(),
                        },
                    );

                    info!("Decision {} pending for {}", id, target);
                    rx
                }
            }
        };

        let resolution = *outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BrokerError::Abandoned(target.clone()))?;

        resolution.ok_or_else(|| BrokerError::Abandoned(target.clone()))
    }

    /// Get list of pending decisions.
    pub fn list_pending(&self) -> Vec<PendingInfo> {
        self.lock_pending()
            .iter()
            .map(|(target, p)| PendingInfo {
                id: p.id,
                target: target.clone(),
                waiting_secs: p.started.elapsed().as_secs(),
                waiters: p.outcome.receiver_count(),
            })
            .collect()
    }

    /// Whether `abandon_all` has closed the broker.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the number of pending decisions.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Number of requests suspended on `target`'s pending decision.
    pub fn waiters(&self, target: &str) -> usize {
        self.lock_pending()
            .get(target)
            .map_or(0, |p| p.outcome.receiver_count())
    }

    /// Close the broker and drop every pending decision.
    ///
    /// Waiting requests fail with [`BrokerError::Abandoned`] and nothing is
    /// recorded. Targets without a recorded verdict are refused from now on
    /// instead of prompting. Returns the number of decisions dropped.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.lock_pending();
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        for (target, decision) in &drained {
            decision.task.abort();
            debug!("Abandoned decision {} for {}", decision.id, target);
        }
        drained.len()
    }

    /// Ask, record, then publish.
    async fn run_resolution(self: Arc<Self>, id: Uuid, target: TargetId) {
        let started = Instant::now();
        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.ask_until_answered(&target))
                .await
                .ok(),
            None => Some(self.ask_until_answered(&target).await),
        };

        let resolution = match answer {
            Some(allowed) => {
                let verdict = if allowed {
                    Verdict::Allowed
                } else {
                    Verdict::Denied
                };
                self.store.record(&target, verdict);
                self.audit.log(AuditEvent::PromptDecision {
                    target: target.to_string(),
                    decision: if allowed { Decision::Allow } else { Decision::Block },
                });
                info!("Decision {} for {}: {:?}", id, target, verdict);
                Resolution::Decided(verdict)
            }
            None => {
                warn!("Decision {} for {} timed out (fail-closed)", id, target);
                self.prompter.expired(&target).await;
                self.audit.log(AuditEvent::PromptTimeout {
                    target: target.to_string(),
                    waited_sec: started.elapsed().as_secs(),
                });
                Resolution::TimedOut
            }
        };

        let mut pending = self.lock_pending();
        match pending.remove(&target) {
            Some(decision) if decision.id == id => {
                decision.outcome.send_replace(Some(resolution));
            }
            Some(other) => {
                // Not ours; put it back untouched.
                pending.insert(target, other);
            }
            None => debug!("Decision {} for {} was abandoned", id, target),
        }
    }

    /// Ask until the prompter produces an answer, backing off on failure.
    async fn ask_until_answered(&self, target: &TargetId) -> bool {
        let mut delay = self.retry_delay;
        loop {
            match self.prompter.ask(target).await {
                Ok(allowed) => return allowed,
                Err(e) => {
                    warn!("Prompt for {} failed, asking again in {:?}: {}", target, delay, e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<TargetId, PendingDecision>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
