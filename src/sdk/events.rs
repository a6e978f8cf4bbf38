use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

use super::handlers::EventHandlers;
use super::modes::AgentMode;
use super::state::{SessionState, SessionView};
use super::tools::Suggestion;
use super::transcript::{Channel, Message};

/// Notifications for the application, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A message was appended to the conversation log.
    Message(Message),
    /// The in-progress transcript of a channel changed.
    LiveText { channel: Channel, text: String },
    Speaking(bool),
    Suggestion(Suggestion),
    ModeChanged(AgentMode),
    /// The service announced it will close the connection soon.
    GoAway { time_left: Option<String> },
    /// A user-facing failure reason. Non-fatal errors leave the session open.
    Error { reason: String, fatal: bool },
}

/// Owned stream of [`SessionEvent`]s.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<SessionEvent>,
}

impl EventStream {
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Await the next event.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Fans state changes out to the watch view, the event stream and the
/// callbacks. Never waits: a full event queue drops the event, the view is
/// always current.
#[derive(Clone)]
pub(crate) struct Publisher {
    view: Arc<watch::Sender<SessionView>>,
    events: mpsc::Sender<SessionEvent>,
    handlers: Arc<EventHandlers>,
}

impl Publisher {
    pub(crate) fn new(
        view: Arc<watch::Sender<SessionView>>,
        events: mpsc::Sender<SessionEvent>,
        handlers: Arc<EventHandlers>,
    ) -> Self {
        Self {
            view,
            events,
            handlers,
        }
    }

    pub(crate) fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&SessionView) -> R) -> R {
        f(&self.view.borrow())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub(crate) fn modify(&self, f: impl FnOnce(&mut SessionView)) {
        self.view.send_modify(f);
    }

    /// Apply `f`; watchers are only woken when it reports a change.
    pub(crate) fn modify_if(&self, f: impl FnOnce(&mut SessionView) -> bool) -> bool {
        self.view.send_if_modified(f)
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(?event, "Event queue full, dropping event");
            }
        }
    }

    pub(crate) fn state(&self, state: SessionState) {
        let changed = self.modify_if(|view| {
            let changed = view.state != state;
            view.state = state;
            view.is_connected = state.is_connected();
            if !view.is_connected {
                view.is_speaking = false;
            }
            changed
        });
        if !changed {
            return;
        }
        tracing::info!(?state, "Session state changed");
        self.emit(SessionEvent::StateChanged(state));
        if let Some(handler) = &self.handlers.on_state {
            handler(state);
        }
    }

    pub(crate) fn message(&self, message: Message) {
        self.modify(|view| view.messages.push(message.clone()));
        if let Some(handler) = &self.handlers.on_message {
            handler(&message);
        }
        self.emit(SessionEvent::Message(message));
    }

    pub(crate) fn live_text(&self, channel: Channel, text: &str) {
        let changed = self.modify_if(|view| {
            let slot = match channel {
                Channel::Input => &mut view.live_input_text,
                Channel::Output => &mut view.live_output_text,
            };
            if slot.as_str() == text {
                return false;
            }
            text.clone_into(slot);
            true
        });
        if changed {
            self.emit(SessionEvent::LiveText {
                channel,
                text: text.to_string(),
            });
        }
    }

    pub(crate) fn speaking(&self, speaking: bool) {
        self.modify(|view| view.is_speaking = speaking);
        self.emit(SessionEvent::Speaking(speaking));
        if let Some(handler) = &self.handlers.on_speaking {
            handler(speaking);
        }
    }

    pub(crate) fn suggestion(&self, suggestion: Suggestion) {
        self.modify(|view| view.pending_suggestion = Some(suggestion.clone()));
        if let Some(handler) = &self.handlers.on_suggestion {
            handler(&suggestion);
        }
        self.emit(SessionEvent::Suggestion(suggestion));
    }

    pub(crate) fn mode(&self, mode: AgentMode) {
        self.modify(|view| view.mode = mode);
        self.emit(SessionEvent::ModeChanged(mode));
    }

    pub(crate) fn go_away(&self, time_left: Option<String>) {
        self.emit(SessionEvent::GoAway { time_left });
    }

    pub(crate) fn error(&self, reason: String, fatal: bool) {
        if fatal {
            self.modify(|view| view.last_error = Some(reason.clone()));
        }
        self.emit(SessionEvent::Error { reason, fatal });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn publisher(capacity: usize) -> (Publisher, EventStream) {
        let (view, _) = watch::channel(SessionView::default());
        let (tx, rx) = mpsc::channel(capacity);
        (
            Publisher::new(Arc::new(view), tx, Arc::new(EventHandlers::new())),
            EventStream::new(rx),
        )
    }

    #[tokio::test]
    async fn state_change_is_published_once() {
        let (publisher, mut events) = publisher(8);
        publisher.state(SessionState::Connecting);
        publisher.state(SessionState::Connecting);
        publisher.state(SessionState::Open);
        assert!(publisher.snapshot().is_connected);

        assert_eq!(
            events.next().await,
            Some(SessionEvent::StateChanged(SessionState::Connecting))
        );
        assert_eq!(
            events.next().await,
            Some(SessionEvent::StateChanged(SessionState::Open))
        );
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn full_queue_never_blocks_the_view() {
        let (publisher, _events) = publisher(1);
        publisher.message(Message::system("one"));
        publisher.message(Message::system("two"));
        assert_eq!(publisher.snapshot().messages.len(), 2);
    }
}
