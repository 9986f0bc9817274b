//! Progress events streamed to the caller of one generation request.
//!
//! The pipeline writes into a [`ProgressSink`]; the HTTP layer (or the CLI)
//! reads the paired receiver. Exactly one terminal event (`complete` or
//! `error`) passes through a sink. Anything emitted after it is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ProgressEvent {
    Start {
        message: String,
    },
    Iteration {
        current: u32,
        max: u32,
    },
    Log {
        message: String,
    },
    Code {
        code: String,
    },
    Sandbox {
        url: String,
        sandbox_id: String,
    },
    Quality {
        score: u8,
    },
    Complete {
        code: String,
        sandbox_url: String,
        sandbox_id: String,
        iterations: u32,
        success: bool,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// Event name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Iteration { .. } => "iteration",
            ProgressEvent::Log { .. } => "log",
            ProgressEvent::Code { .. } => "code",
            ProgressEvent::Sandbox { .. } => "sandbox",
            ProgressEvent::Quality { .. } => "quality",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// JSON payload without the event name.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(mut value) => value
                .get_mut("data")
                .map(Value::take)
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}

/// Write side of a progress stream.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    terminated: Arc<AtomicBool>,
}

/// Create a connected sink/receiver pair.
pub fn channel() -> (ProgressSink, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSink {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}

impl ProgressSink {
    /// Send an event. Returns false when it was dropped, either because a
    /// terminal event already went out or because the receiver is gone.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                debug!(event = event.name(), "dropping second terminal event");
                return false;
            }
        } else if self.terminated.load(Ordering::SeqCst) {
            debug!(event = event.name(), "dropping event after terminal event");
            return false;
        }
        self.tx.send(event).is_ok()
    }

    /// True once the receiver has been dropped (client disconnected).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Log {
            message: message.into(),
        });
    }

    pub fn code(&self, code: impl Into<String>) {
        self.emit(ProgressEvent::Code { code: code.into() });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Error {
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ProgressEvent::Sandbox {
            url: "http://localhost:49153".into(),
            sandbox_id: "abc".into(),
        };
        assert_eq!(event.name(), "sandbox");
        assert_eq!(
            event.payload(),
            serde_json::json!({"url": "http://localhost:49153", "sandboxId": "abc"})
        );

        let json = serde_json::to_value(ProgressEvent::Complete {
            code: "x".into(),
            sandbox_url: "u".into(),
            sandbox_id: "id".into(),
            iterations: 2,
            success: true,
        })
        .unwrap();
        assert_eq!(json["event"], "complete");
        assert_eq!(json["data"]["sandboxUrl"], "u");
        assert_eq!(json["data"]["iterations"], 2);
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = ProgressEvent::Iteration { current: 3, max: 20 };
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"event":"iteration","data":{"current":3,"max":20}}"#);
        let back: ProgressEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_sink_allows_single_terminal_event() {
        let (sink, mut rx) = channel();
        assert!(sink.emit(ProgressEvent::Start {
            message: "go".into()
        }));
        sink.error("boom");
        sink.emit(ProgressEvent::Complete {
            code: String::new(),
            sandbox_url: String::new(),
            sandbox_id: String::new(),
            iterations: 1,
            success: true,
        });
        sink.log("late");
        drop(sink);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["start", "error"]);
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sink, rx) = channel();
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ProgressEvent::Log {
            message: "nobody listening".into()
        }));
    }

    #[test]
    fn test_clones_share_terminal_state() {
        let (sink, _rx) = channel();
        let other = sink.clone();
        sink.error("first");
        assert!(!other.emit(ProgressEvent::Error {
            message: "second".into()
        }));
    }
}
