//! Abstraction over the event delivery mechanism.

use super::events::UserEvent;

/// Fire-and-forget event sink the library pushes [`UserEvent`]s into.
///
/// Embedders implement this for whatever channel drives their UI loop;
/// tests use an in-memory channel. Sending never returns an error to
/// the caller, a closed sink is logged and ignored.
pub trait EventProxy: Send + Sync + Clone + 'static {
    fn send_event(&self, event: UserEvent);
}

/// Ready-made impl for a tokio unbounded channel, the simplest way to
/// drive the library from an async embedder.
impl EventProxy for tokio::sync::mpsc::UnboundedSender<UserEvent> {
    fn send_event(&self, event: UserEvent) {
        if let Err(e) = self.send(event) {
            tracing::warn!("Event receiver closed, dropping event: {e}");
        }
    }
}
