//! Per-device serialization layer
//!
//! Events for conflicting devices must never overlap and must run in the
//! order the kernel emitted them; events for unrelated devices must not
//! block each other. The gate hands out tickets in arrival order and admits
//! a waiter only when neither a current holder nor an earlier waiter
//! conflicts with it - FIFO within each conflict domain, full concurrency
//! across domains.
//!
//! What "conflicts" means is a [`ConflictPolicy`], not engine code: which
//! dependents wait on which parents varies by bus, so it is configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use uevd_core_types::DeviceIdentity;

/// Identity as the gate sees it: the device plus its effective wait token
///
/// The wait token is bound by a previous event's SERIAL action; devices
/// sharing a token serialize against each other even without a devpath
/// relation.
#[derive(Debug, Clone)]
pub struct GateIdentity {
    pub identity: DeviceIdentity,
    pub wait_token: Option<String>,
}

/// Predicate deciding whether two in-flight events must serialize
pub trait ConflictPolicy: Send + Sync {
    fn conflicts(&self, a: &GateIdentity, b: &GateIdentity) -> bool;
}

/// Default policy: same device, block-device ancestry, or shared token
///
/// - identical devpaths always conflict;
/// - block devices conflict with their ancestors/descendants, so a
///   partition event waits for its whole-disk event;
/// - identical explicit wait tokens conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConflictPolicy;

impl ConflictPolicy for DefaultConflictPolicy {
    fn conflicts(&self, a: &GateIdentity, b: &GateIdentity) -> bool {
        if a.identity.devpath == b.identity.devpath {
            return true;
        }
        if a.identity.is_block()
            && b.identity.is_block()
            && (a.identity.is_ancestor_of(&b.identity) || b.identity.is_ancestor_of(&a.identity))
        {
            return true;
        }
        matches!((&a.wait_token, &b.wait_token), (Some(x), Some(y)) if x == y)
    }
}

struct HeldEntry {
    seq: u64,
    id: GateIdentity,
}

struct WaitEntry {
    seq: u64,
    id: GateIdentity,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct GateState {
    next_seq: u64,
    holders: Vec<HeldEntry>,
    waiters: Vec<WaitEntry>,
    /// devpath → wait token bindings from completed events
    tokens: HashMap<String, String>,
}

struct GateInner {
    state: Mutex<GateState>,
    policy: Box<dyn ConflictPolicy>,
}

/// The per-device serialization gate
#[derive(Clone)]
pub struct SerialGate {
    inner: Arc<GateInner>,
}

impl SerialGate {
    /// Gate with the default conflict policy
    pub fn new() -> Self {
        Self::with_policy(Box::new(DefaultConflictPolicy))
    }

    /// Gate with a custom conflict policy
    pub fn with_policy(policy: Box<dyn ConflictPolicy>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                policy,
            }),
        }
    }

    /// Register an event in arrival order and get its admission ticket
    ///
    /// This is synchronous on purpose: the dispatcher calls it before
    /// spawning the event task, so the gate's sequence numbers mirror
    /// kernel observation order exactly.
    pub fn enqueue(&self, identity: DeviceIdentity) -> GateTicket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;

        let wait_token = state.tokens.get(&identity.devpath).cloned();
        let id = GateIdentity {
            identity,
            wait_token,
        };

        let blocked = state
            .holders
            .iter()
            .any(|h| self.inner.policy.conflicts(&h.id, &id))
            || state
                .waiters
                .iter()
                .any(|w| self.inner.policy.conflicts(&w.id, &id));

        if blocked {
            trace!(seq, devpath = %id.identity.devpath, "event queued behind conflict");
            state.waiters.push(WaitEntry { seq, id, tx });
        } else {
            trace!(seq, devpath = %id.identity.devpath, "event admitted immediately");
            state.holders.push(HeldEntry { seq, id });
            let _ = tx.send(());
        }

        GateTicket {
            gate: Arc::clone(&self.inner),
            seq,
            rx,
        }
    }

    /// Suspend until the identity's turn, then hold the token
    pub async fn acquire(&self, identity: DeviceIdentity) -> SerialToken {
        self.enqueue(identity).wait().await
    }

    /// Bind a wait token to a devpath for subsequent events
    ///
    /// Called when an event that executed a SERIAL action completes; later
    /// events for this devpath inherit the token and serialize against any
    /// in-flight event holding the same one.
    pub fn bind_token(&self, devpath: &str, token: &str) {
        let mut state = self.inner.state.lock().unwrap();
        state.tokens.insert(devpath.to_string(), token.to_string());
    }

    /// Currently held entries (diagnostics)
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().unwrap().holders.len()
    }
}

impl Default for SerialGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateInner {
    fn release(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();
        let before = state.holders.len();
        state.holders.retain(|h| h.seq != seq);
        if state.holders.len() == before {
            // Already released; release is idempotent
            return;
        }
        debug!(seq, "serialization token released");

        // Admit every waiter that no longer conflicts with a holder or an
        // earlier, still-waiting entry. Scanning in arrival order keeps the
        // FIFO guarantee within each conflict domain.
        let mut i = 0;
        while i < state.waiters.len() {
            let admit = {
                let w = &state.waiters[i];
                !state
                    .holders
                    .iter()
                    .any(|h| self.policy.conflicts(&h.id, &w.id))
                    && !state.waiters[..i]
                        .iter()
                        .any(|earlier| self.policy.conflicts(&earlier.id, &w.id))
            };
            if admit {
                let w = state.waiters.remove(i);
                trace!(seq = w.seq, devpath = %w.id.identity.devpath, "event admitted");
                state.holders.push(HeldEntry { seq: w.seq, id: w.id });
                let _ = w.tx.send(());
            } else {
                i += 1;
            }
        }
    }
}

/// Admission ticket for one registered event
pub struct GateTicket {
    gate: Arc<GateInner>,
    seq: u64,
    rx: oneshot::Receiver<()>,
}

impl GateTicket {
    /// Suspend the calling task until admission, then hold the token
    pub async fn wait(self) -> SerialToken {
        // A closed channel can only mean the gate was torn down; proceeding
        // is the only non-deadlocking option left.
        let _ = self.rx.await;
        SerialToken {
            gate: self.gate,
            seq: self.seq,
            released: AtomicBool::new(false),
        }
    }
}

/// Held serialization token; lifetime = one event's execution
///
/// Released explicitly (idempotent) or on drop, so every exit path -
/// including failures - releases unconditionally.
pub struct SerialToken {
    gate: Arc<GateInner>,
    seq: u64,
    released: AtomicBool,
}

impl SerialToken {
    /// Release the token; safe to call more than once
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.gate.release(self.seq);
        }
    }
}

impl Drop for SerialToken {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(devpath: &str) -> DeviceIdentity {
        DeviceIdentity::new(devpath, Some("block".to_string()))
    }

    fn gate_id(devpath: &str) -> GateIdentity {
        GateIdentity {
            identity: block(devpath),
            wait_token: None,
        }
    }

    #[test]
    fn test_default_policy_same_devpath() {
        let policy = DefaultConflictPolicy;
        assert!(policy.conflicts(&gate_id("/devices/x/sda"), &gate_id("/devices/x/sda")));
    }

    #[test]
    fn test_default_policy_partition_vs_disk() {
        let policy = DefaultConflictPolicy;
        assert!(policy.conflicts(&gate_id("/devices/x/sda"), &gate_id("/devices/x/sda/sda1")));
        assert!(policy.conflicts(&gate_id("/devices/x/sda/sda1"), &gate_id("/devices/x/sda")));
        assert!(!policy.conflicts(&gate_id("/devices/x/sda"), &gate_id("/devices/y/sdb")));
    }

    #[test]
    fn test_default_policy_shared_token() {
        let policy = DefaultConflictPolicy;
        let mut a = gate_id("/devices/x/sda");
        let mut b = gate_id("/devices/y/sdb");
        assert!(!policy.conflicts(&a, &b));
        a.wait_token = Some("raid".to_string());
        b.wait_token = Some("raid".to_string());
        assert!(policy.conflicts(&a, &b));
    }

    #[tokio::test]
    async fn test_unrelated_identities_admitted_together() {
        let gate = SerialGate::new();
        let a = gate.acquire(block("/devices/x/sda")).await;
        let b = gate.acquire(block("/devices/y/sdb")).await;
        assert_eq!(gate.in_flight(), 2);
        a.release();
        b.release();
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let gate = SerialGate::new();
        let token = gate.acquire(block("/devices/x/sda")).await;
        token.release();
        token.release();
        drop(token);
        assert_eq!(gate.in_flight(), 0);
    }
}
