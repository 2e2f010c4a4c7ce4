use std::sync::{Arc, Mutex};

use super::{TraceEmitter, TraceEvent, TraceEventKind};

/// Keeps every event in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryTraceEmitter {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl MemoryTraceEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceEmitter for MemoryTraceEmitter {
    fn emit(&self, event: &TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Forwards events to `tracing`, errors at `warn` and the rest at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraceEmitter;

impl TraceEmitter for TracingTraceEmitter {
    fn emit(&self, event: &TraceEvent) {
        match event.kind {
            TraceEventKind::Error => tracing::warn!(
                session_id = %event.session_id,
                seq = event.seq,
                kind = %event.kind,
                payload = %event.payload,
                "{}",
                event.summary
            ),
            _ => tracing::debug!(
                session_id = %event.session_id,
                seq = event.seq,
                kind = %event.kind,
                payload = %event.payload,
                "{}",
                event.summary
            ),
        }
    }
}

/// Sends each event to several emitters in order.
#[derive(Clone, Default)]
pub struct FanoutTraceEmitter {
    emitters: Vec<Arc<dyn TraceEmitter>>,
}

impl FanoutTraceEmitter {
    pub fn new(emitters: Vec<Arc<dyn TraceEmitter>>) -> Self {
        Self { emitters }
    }

    pub fn push(&mut self, emitter: Arc<dyn TraceEmitter>) {
        self.emitters.push(emitter);
    }
}

impl TraceEmitter for FanoutTraceEmitter {
    fn emit(&self, event: &TraceEvent) {
        for emitter in &self.emitters {
            emitter.emit(event);
        }
    }

    fn flush(&self) {
        for emitter in &self.emitters {
            emitter.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFlush(AtomicUsize);

    impl TraceEmitter for CountingFlush {
        fn emit(&self, _event: &TraceEvent) {}

        fn flush(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event() -> TraceEvent {
        TraceEvent {
            session_id: uuid::Uuid::nil(),
            seq: 1,
            timestamp: chrono::Utc::now(),
            kind: TraceEventKind::ToolCallStarted,
            summary: "add".into(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn fanout_reaches_every_emitter() {
        let first = MemoryTraceEmitter::new();
        let second = MemoryTraceEmitter::new();
        let counter = Arc::new(CountingFlush(AtomicUsize::new(0)));
        let fanout = FanoutTraceEmitter::new(vec![
            Arc::new(first.clone()),
            Arc::new(second.clone()),
            counter.clone() as Arc<dyn TraceEmitter>,
        ]);

        fanout.emit(&event());
        TracingTraceEmitter.emit(&event());
        fanout.flush();

        assert_eq!(first.len(), 1);
        assert_eq!(second.events()[0].summary, "add");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
