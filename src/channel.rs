//! Event channels between the engine and its observers

use tokio::sync::mpsc;

use crate::events::EngineEvent;

/// Engine-side sender. Emitting never fails; events are dropped when no
/// observer is attached.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// Sink that discards every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Whether an observer is still listening
    pub fn is_attached(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Observer-side receiver for engine events
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventStream {
    /// Create a connected stream and sink
    pub fn new() -> (Self, EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, EventSink { tx: Some(tx) })
    }

    /// Receive the next event, waiting if necessary
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently buffered
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SubmissionId;

    fn finished() -> EngineEvent {
        EngineEvent::TaskFinished {
            submission_id: SubmissionId::new(),
            outcome: "success".into(),
        }
    }

    #[test]
    fn test_disabled_sink() {
        let sink = EventSink::disabled();
        assert!(!sink.is_attached());
        sink.emit(finished());
    }

    #[test]
    fn test_drain() {
        let (mut stream, sink) = EventStream::new();
        assert!(sink.is_attached());
        sink.emit(finished());
        sink.emit(finished());
        assert_eq!(stream.drain().len(), 2);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_receive_event() {
        let (mut stream, sink) = EventStream::new();
        let event = finished();
        sink.emit(event.clone());
        assert_eq!(stream.recv().await, Some(event));

        drop(stream);
        assert!(!sink.is_attached());
    }
}
