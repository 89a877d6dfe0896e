use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcasts reliable messaging lifecycle events
#[derive(Debug, Clone)]
pub struct RmEventPublisher {
    sender: broadcast::Sender<RmEvent>,
}

/// Lifecycle event for a sequence or one of its messages
#[derive(Debug, Clone)]
pub struct RmEvent {
    pub name: String,
    pub sequence_id: String,
    pub message_number: Option<u64>,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl RmEventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(
        &self,
        event_name: impl Into<String>,
        sequence_id: impl Into<String>,
        message_number: Option<u64>,
        context: Value,
    ) {
        let event = RmEvent {
            name: event_name.into(),
            sequence_id: sequence_id.into(),
            message_number,
            context,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RmEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RmEventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
