//! Bounded ring buffer of recent log lines, fed by a `tracing_subscriber` layer, backing
//! the Public API Surface's `get_recent_logs` / `start_log_stream` / `stop_log_stream`
//! (§4.I, §4.K).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const LIVE_CHANNEL_CAPACITY: usize = 256;

trait BoundedPush<T> {
    fn push_bounded(&mut self, value: T, max_size: usize);
}

impl<T> BoundedPush<T> for VecDeque<T> {
    /// Push while maintaining a maximum size (O(1) amortized).
    fn push_bounded(&mut self, value: T, max_size: usize) {
        if self.len() >= max_size {
            self.pop_front();
        }
        self.push_back(value);
    }
}

/// Holds the last `capacity` formatted log lines and fans out new ones to live
/// subscribers. Cloning is cheap: construct once behind an `Arc` and share it between
/// the tracing subscriber and the Manager.
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    live: broadcast::Sender<String>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Arc::new(Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            live,
        })
    }

    fn push(&self, line: String) {
        self.lines.lock().push_bounded(line.clone(), self.capacity);
        // Best-effort: no live subscribers is the common case, not an error.
        let _ = self.live.send(line);
    }

    /// The most recent `n` lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let start = lines.len().saturating_sub(n);
        lines.iter().skip(start).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.live.subscribe()
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogBuffer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let line = format!(
            "{} {}: {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.message
        );
        self.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_at_most_capacity_lines() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        let recent = buffer.recent(10);
        assert_eq!(recent, vec!["line 2", "line 3", "line 4"]);
    }
}
