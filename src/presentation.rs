use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::Sender;
use tokio_stream::wrappers::BroadcastStream;

use crate::{ConnectionStatus, Error, FailureReason, Message, Peripheral};

/// Receives state changes from the controller.
///
/// All methods are called from the controller task, one at a time.
pub trait Presentation: Send + 'static {
    fn on_registry_changed(&mut self, peripherals: &[Peripheral]);

    fn on_session_status_changed(&mut self, peripheral: &Peripheral, status: ConnectionStatus);

    fn on_message_received(&mut self, message: &Message);

    fn on_failure(&mut self, reason: FailureReason, error: &Error);
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    RegistryChanged(Vec<Peripheral>),
    StatusChanged(Peripheral, ConnectionStatus),
    MessageReceived(Message),
    Failure(FailureReason, String),
}

/// [`Presentation`] that publishes [`UiEvent`]s to any number of streams.
#[derive(Clone)]
pub struct EventBroadcaster {
    event_sender: Sender<UiEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        EventBroadcaster::new(64)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity);

        Self { event_sender }
    }

    /// Create a new stream that receives ui events from now on.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = UiEvent> + Send>> {
        let receiver = self.event_sender.subscribe();

        Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }))
    }

    fn send(&self, event: UiEvent) {
        // No subscribers is fine.
        self.event_sender.send(event).ok();
    }
}

impl Presentation for EventBroadcaster {
    fn on_registry_changed(&mut self, peripherals: &[Peripheral]) {
        self.send(UiEvent::RegistryChanged(peripherals.to_vec()));
    }

    fn on_session_status_changed(&mut self, peripheral: &Peripheral, status: ConnectionStatus) {
        self.send(UiEvent::StatusChanged(peripheral.clone(), status));
    }

    fn on_message_received(&mut self, message: &Message) {
        self.send(UiEvent::MessageReceived(message.clone()));
    }

    fn on_failure(&mut self, reason: FailureReason, error: &Error) {
        self.send(UiEvent::Failure(reason, error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_stream_sees_published_events() {
        let mut broadcaster = EventBroadcaster::default();
        let mut first = broadcaster.event_stream();
        let mut second = broadcaster.event_stream();

        broadcaster.on_failure(FailureReason::Busy, &Error::Busy);

        let expected = UiEvent::Failure(FailureReason::Busy, Error::Busy.to_string());
        assert_eq!(first.next().await, Some(expected.clone()));
        assert_eq!(second.next().await, Some(expected));
    }
}
