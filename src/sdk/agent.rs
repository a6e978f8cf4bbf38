use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::audio::capture::CaptureDevice;
use crate::audio::meter::VolumeMeter;
use crate::audio::playback::PlaybackClock;
use crate::{Error, Result};

use super::builder::{CaptureFactory, LiveBuilder, LiveConfig, SinkFactory};
use super::events::{EventStream, Publisher, SessionEvent};
use super::handlers::EventHandlers;
use super::modes::AgentMode;
use super::session::{Session, SessionContext};
use super::state::{SessionState, SessionView};
use super::tools::{Suggestion, ToolDispatcher};
use super::transcript::Message;
use super::transport::Connector;

/// Application-facing handle. Outlives individual connections: each
/// [`LiveAgent::connect`] builds a fresh [`Session`], while the conversation
/// log, mode and event stream carry over.
pub struct LiveAgent {
    config: Arc<LiveConfig>,
    connector: Arc<dyn Connector>,
    capture: Option<CaptureFactory>,
    sink: SinkFactory,
    clock: Arc<dyn PlaybackClock>,
    rng_seed: Option<u64>,
    publisher: Publisher,
    events: Option<mpsc::Receiver<SessionEvent>>,
    volume: VolumeMeter,
    session: Option<Session>,
    /// The last session ended through [`LiveAgent::disconnect`].
    disconnected: bool,
}

impl std::fmt::Debug for LiveAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveAgent")
            .field("model", &self.config.model)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl LiveAgent {
    #[must_use]
    pub fn builder() -> LiveBuilder {
        LiveBuilder::new()
    }

    pub(crate) fn from_parts(
        config: LiveConfig,
        connector: Arc<dyn Connector>,
        capture: Option<CaptureFactory>,
        sink: SinkFactory,
        clock: Arc<dyn PlaybackClock>,
        handlers: EventHandlers,
        rng_seed: Option<u64>,
    ) -> Self {
        let (view, _) = watch::channel(SessionView {
            mode: config.initial_mode,
            ..SessionView::default()
        });
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let publisher = Publisher::new(Arc::new(view), event_tx, Arc::new(handlers));
        Self {
            config: Arc::new(config),
            connector,
            capture,
            sink,
            clock,
            rng_seed,
            publisher,
            events: Some(event_rx),
            volume: VolumeMeter::new(),
            session: None,
            disconnected: false,
        }
    }

    /// Connect using the configured capture device, seeding the service with
    /// `initial_text` as the shared document.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if no capture device is configured,
    /// [`Error::DeviceUnavailable`] if the microphone cannot be opened, or the
    /// transport or service error that prevented the session from opening.
    pub async fn connect(&mut self, initial_text: &str) -> Result<()> {
        let factory = self.capture.clone().ok_or_else(|| {
            Error::Config("no capture device configured; use connect_with_device".to_string())
        })?;
        let device = match factory() {
            Ok(device) => device,
            Err(err) => {
                self.disconnect().await;
                self.publisher.error(err.user_reason(), true);
                self.publisher.state(SessionState::Error);
                return Err(err);
            }
        };
        self.connect_with_device(device, initial_text).await
    }

    /// Connect with an explicit capture device.
    ///
    /// # Errors
    /// See [`LiveAgent::connect`].
    pub async fn connect_with_device(
        &mut self,
        device: Box<dyn CaptureDevice>,
        initial_text: &str,
    ) -> Result<()> {
        self.disconnect().await;
        self.disconnected = false;
        let sink = (self.sink)()?;
        let dispatcher = self
            .rng_seed
            .map_or_else(ToolDispatcher::new, ToolDispatcher::with_seed);
        let ctx = SessionContext {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            device,
            sink,
            clock: Arc::clone(&self.clock),
            dispatcher,
            publisher: self.publisher.clone(),
            volume: self.volume.clone(),
            mode: self.mode(),
        };
        let session = Session::connect(ctx, initial_text).await?;
        self.session = Some(session);
        Ok(())
    }

    /// End the current session, if any. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
            self.disconnected = true;
        }
    }

    fn live_session(&self) -> Result<&Session> {
        if self.disconnected {
            return Err(Error::Cancelled);
        }
        self.session
            .as_ref()
            .filter(|s| !s.is_finished() && self.is_connected())
            .ok_or(Error::ConnectionClosed)
    }

    /// Send a user text turn.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] after [`LiveAgent::disconnect`] and
    /// [`Error::ConnectionClosed`] when the session ended otherwise.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.live_session()?.send_text(text).await
    }

    /// Share the current document, optionally with a focus selection the
    /// agent should weight over the rest.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] after [`LiveAgent::disconnect`] and
    /// [`Error::ConnectionClosed`] when the session ended otherwise.
    pub async fn update_context(&self, text: &str, selection: Option<&str>) -> Result<()> {
        self.live_session()?
            .update_context(text, selection.map(str::to_string))
            .await
    }

    /// Change persona. While connected the service is told; otherwise the mode
    /// applies to the next connect. A system message is recorded either way.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] if the session ended mid-call.
    pub async fn switch_mode(&self, mode: AgentMode) -> Result<()> {
        match self.live_session() {
            Ok(session) => session.switch_mode(mode).await,
            Err(_) => {
                self.publisher.mode(mode);
                self.publisher
                    .message(Message::system(format!("Switched to {mode} mode")));
                Ok(())
            }
        }
    }

    /// Accept the pending suggestion, removing it from the view.
    pub fn take_suggestion(&self) -> Option<Suggestion> {
        let mut taken = None;
        self.publisher.modify_if(|view| {
            taken = view.pending_suggestion.take();
            taken.is_some()
        });
        taken
    }

    /// Drop the pending suggestion. Returns whether there was one.
    pub fn discard_suggestion(&self) -> bool {
        self.take_suggestion().is_some()
    }

    /// Append a message from the surrounding application, e.g. a
    /// collaborator notice.
    pub fn add_message(&self, message: Message) {
        self.publisher.message(message);
    }

    /// Watch handle over the observable state.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.publisher.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionView {
        self.publisher.snapshot()
    }

    /// The event stream. Only the first call returns it.
    pub fn events(&mut self) -> Option<EventStream> {
        self.events.take().map(EventStream::new)
    }

    /// Latest microphone RMS, 0 when not capturing.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.publisher.read(|view| view.state)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.publisher.read(|view| view.is_connected)
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.publisher.read(|view| view.is_speaking)
    }

    #[must_use]
    pub fn mode(&self) -> AgentMode {
        self.publisher.read(|view| view.mode)
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.publisher.read(|view| view.messages.clone())
    }

    #[must_use]
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }
}
