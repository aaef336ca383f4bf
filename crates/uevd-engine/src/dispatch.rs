//! Event intake and task spawning
//!
//! The dispatcher is the bridge between the (external) uevent receiver and
//! the engine: one logical task per event, registered with the gate
//! synchronously in arrival order so kernel observation order is admission
//! order, then spawned to run concurrently with unrelated devices.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use uevd_core::model::DeviceSnapshot;

use crate::engine::{EventEngine, EventResult};
use crate::serial::SerialGate;

/// Arrival-ordered event intake
#[derive(Clone)]
pub struct EventDispatcher {
    engine: Arc<EventEngine>,
    gate: SerialGate,
}

impl EventDispatcher {
    pub fn new(engine: Arc<EventEngine>, gate: SerialGate) -> Self {
        Self { engine, gate }
    }

    pub fn gate(&self) -> &SerialGate {
        &self.gate
    }

    /// Submit one event for processing
    ///
    /// The gate ticket is taken before the task is spawned - two calls to
    /// `submit` therefore serialize (or not) according to the order the
    /// caller made them, which is the kernel emission order at the intake.
    /// The returned handle yields the event's result; detaching it is fine.
    pub fn submit(&self, snapshot: DeviceSnapshot) -> JoinHandle<EventResult> {
        let ticket = self.gate.enqueue(snapshot.identity());
        let engine = Arc::clone(&self.engine);
        let gate = self.gate.clone();

        tokio::spawn(async move {
            let token = ticket.wait().await;
            debug!(devpath = snapshot.devpath(), "event admitted, processing");
            let result = engine.process(snapshot).await;
            if let Some(wait_token) = &result.wait_token {
                gate.bind_token(&result.identity.devpath, wait_token);
            }
            token.release();
            result
        })
    }
}
