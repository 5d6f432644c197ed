use chrono::{DateTime, Utc};
use hlcore::Language;
use tokio::sync::mpsc;

/// Notifications the core sends to whoever drives the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentModifiedChanged { index: usize, modified: bool },
    DocumentListChanged,
    ActiveDocumentChanged { index: usize },
    LanguageChanged { index: usize, language: Language },
    RecoveryOffered { timestamp: DateTime<Utc>, tab_count: usize },
    LowMemoryDetected { available_bytes: u64 },
    AutoSaved { documents: usize },
}

pub type SubscriptionId = u64;

type Handler = Box<dyn FnMut(&SessionEvent) + Send>;

pub struct EventBus {
    next_id: SubscriptionId,
    handlers: Vec<(SubscriptionId, Handler)>,
    channels: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            handlers: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    /// Returns a receiver that gets a copy of every event from now on.
    /// Dropping the receiver ends the subscription.
    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.push(tx);
        rx
    }

    pub fn emit(&mut self, event: SessionEvent) {
        log::debug!("Event: {:?}", event);
        for (_, handler) in self.handlers.iter_mut() {
            handler(&event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_handlers_receive_events_until_unsubscribed() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        bus.emit(SessionEvent::DocumentListChanged);
        assert!(bus.unsubscribe(id));
        bus.emit(SessionEvent::DocumentListChanged);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_channel_subscription() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe_channel();

        bus.emit(SessionEvent::ActiveDocumentChanged { index: 2 });
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ActiveDocumentChanged { index: 2 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channels_are_dropped() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe_channel();
        drop(rx);

        bus.emit(SessionEvent::DocumentListChanged);
        assert!(bus.channels.is_empty());
    }
}
