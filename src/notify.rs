#![allow(dead_code)]

//! Progress notifications
//!
//! Executions emit progress events for interested listeners (dashboards,
//! websocket bridges). Delivery is fire-and-forget: a full or closed channel
//! never affects the execution that emitted the event.

use crate::workflow::ErrorInfo;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        execution_id: String,
    },
    StepProgress {
        execution_id: String,
        step: u32,
        total: u32,
    },
    Completed {
        execution_id: String,
    },
    Failed {
        execution_id: String,
        error: ErrorInfo,
    },
    Cancelled {
        execution_id: String,
    },
}

/// Fire-and-forget event emitter
#[derive(Clone)]
pub struct ProgressNotifier {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressNotifier {
    /// Notifier plus the receiving end for a listener to drain
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event; never blocks, never fails the caller
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if let Err(err) = tx.send(event) {
                tracing::debug!(error = %err, "progress listener gone, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (notifier, mut rx) = ProgressNotifier::channel();

        notifier.emit(ProgressEvent::Started {
            execution_id: "e1".into(),
        });
        notifier.emit(ProgressEvent::Completed {
            execution_id: "e1".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::Started { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::Completed { .. }
        ));
    }

    #[test]
    fn test_emit_survives_dropped_receiver() {
        let (notifier, rx) = ProgressNotifier::channel();
        drop(rx);
        notifier.emit(ProgressEvent::Cancelled {
            execution_id: "e1".into(),
        });
    }

    #[test]
    fn test_disabled_notifier_is_noop() {
        let notifier = ProgressNotifier::disabled();
        notifier.emit(ProgressEvent::Started {
            execution_id: "e1".into(),
        });
    }
}
