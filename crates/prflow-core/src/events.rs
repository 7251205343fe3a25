//! In-process notifications.
//!
//! Engine and workflow lifecycle notifications are published on a
//! `tokio::sync::broadcast` channel. Publishing never blocks and never
//! fails the caller: with no subscribers the value is dropped, and a slow
//! subscriber lags instead of applying back-pressure.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{Improvement, WorkflowId, WorkflowState};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ModuleStarted {
        module: String,
    },
    ModuleCompleted {
        module: String,
        findings: usize,
        elapsed_ms: u64,
    },
    ModuleFailed {
        module: String,
        error: String,
        elapsed_ms: u64,
    },
    WorkflowStateChanged {
        workflow_id: WorkflowId,
        from: WorkflowState,
        to: WorkflowState,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        improvement: Option<Improvement>,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        error: String,
    },
}

/// Cloneable publisher handle; every clone feeds the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        // Err only means nobody is listening.
        let _ = self.tx.send(notification);
    }
}

/// Drain everything currently buffered on `rx` without waiting.
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(n) => out.push(n),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(Notification::ModuleStarted {
            module: "m".to_string(),
        });
    }

    #[test]
    fn subscribers_see_notifications_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.clone().publish(Notification::ModuleStarted {
            module: "a".to_string(),
        });
        bus.publish(Notification::ModuleFailed {
            module: "a".to_string(),
            error: "boom".to_string(),
            elapsed_ms: 3,
        });

        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], Notification::ModuleFailed { .. }));
    }

    #[test]
    fn full_buffer_lags_instead_of_blocking() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(Notification::ModuleStarted {
                module: format!("m{i}"),
            });
        }
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 2);
    }
}
