use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::audio::capture::{CaptureDevice, CaptureEncoder, CaptureFormat};
use crate::audio::meter::VolumeMeter;
use crate::audio::playback::{PlaybackClock, PlaybackScheduler, PlaybackSink};
use crate::protocol::client_events::ClientMessage;
use crate::protocol::models::{AudioFormat, FunctionCall, Modality};
use crate::protocol::server_events::ServerEvent;
use crate::{Error, Result};

use super::builder::LiveConfig;
use super::events::Publisher;
use super::modes::AgentMode;
use super::state::SessionState;
use super::tools::{self, ToolDispatcher, ToolEffect};
use super::transcript::{Channel, Message, Speaker, TranscriptAssembler};
use super::transmit::{TransmitReceiver, transmit_channel};
use super::transport::{Connector, Transport};

const COMMAND_CAPACITY: usize = 64;

/// Close codes the peer uses for an orderly shutdown.
const NORMAL_CLOSE_CODES: [u16; 2] = [1000, 1001];

enum Command {
    SendText(String),
    UpdateContext {
        text: String,
        selection: Option<String>,
    },
    SwitchMode(AgentMode),
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Everything a session needs for one connection.
pub(crate) struct SessionContext {
    pub config: Arc<LiveConfig>,
    pub connector: Arc<dyn Connector>,
    pub device: Box<dyn CaptureDevice>,
    pub sink: Box<dyn PlaybackSink>,
    pub clock: Arc<dyn PlaybackClock>,
    pub dispatcher: ToolDispatcher,
    pub publisher: Publisher,
    pub volume: VolumeMeter,
    pub mode: AgentMode,
}

/// Context note that seeds or refreshes the shared document.
pub(crate) fn context_note(text: &str, selection: Option<&str>) -> String {
    let mut note = format!("[DOCUMENT]\n{text}");
    if let Some(selection) = selection.filter(|s| !s.trim().is_empty()) {
        note.push_str("\n\n[FOCUS] Weight this excerpt over the full document:\n");
        note.push_str(selection);
    }
    note
}

/// One live connection. Created by a successful connect and torn down by
/// [`Session::disconnect`], by the peer or by a fatal error.
pub struct Session {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Acquire the microphone, open the transport, send setup and wait for the
    /// acknowledgement. Returns once the session is open or has failed.
    ///
    /// The device is opened before any network activity, so a denied
    /// microphone never produces a setup message.
    pub(crate) async fn connect(ctx: SessionContext, initial_text: &str) -> Result<Self> {
        let SessionContext {
            config,
            connector,
            device,
            sink,
            clock,
            dispatcher,
            publisher,
            volume,
            mode,
        } = ctx;
        let id = Uuid::new_v4();
        publisher.modify(|view| {
            view.session_id = Some(id);
            view.last_error = None;
            view.live_input_text.clear();
            view.live_output_text.clear();
        });
        publisher.state(SessionState::Connecting);

        let (frame_tx, mut frames) = transmit_channel(config.transmit_capacity);
        let format = CaptureFormat {
            sample_rate_hz: config.input_sample_rate,
            frame_samples: config.frame_samples,
        };
        let mut encoder = match CaptureEncoder::start(device, frame_tx, volume, format).await {
            Ok(encoder) => encoder,
            Err(err) => {
                tracing::warn!(%id, "Capture device unavailable: {err}");
                publisher.error(err.user_reason(), true);
                publisher.state(SessionState::Error);
                return Err(err);
            }
        };

        let transport = match open_transport(&config, connector.as_ref(), mode, initial_text).await
        {
            Ok(transport) => transport,
            Err(err) => {
                tracing::warn!(%id, "Session setup failed: {err}");
                encoder.stop().await;
                frames.discard_pending();
                publisher.error(err.user_reason(), true);
                publisher.state(SessionState::Error);
                publisher.state(SessionState::Closed);
                return Err(err);
            }
        };

        let stale = frames.discard_pending();
        if stale > 0 {
            tracing::debug!(%id, stale, "Dropped frames captured during the handshake");
        }

        let scheduler = PlaybackScheduler::new(clock, sink, config.output_sample_rate);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let actor = SessionActor {
            id,
            assembler: TranscriptAssembler::new(config.max_transcript_chars),
            config,
            transport,
            encoder,
            frames,
            capture_live: true,
            scheduler,
            speaking: false,
            dispatcher,
            commands: cmd_rx,
            publisher: publisher.clone(),
        };

        publisher.state(SessionState::Open);
        tracing::info!(%id, %mode, "Session open");
        let task = tokio::spawn(actor.run());
        Ok(Self {
            id,
            commands: cmd_tx,
            task: Some(task),
        })
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// True once the session task has ended for any reason.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Send a user text turn.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] after [`Session::disconnect`] and
    /// [`Error::ConnectionClosed`] if the session ended otherwise.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::SendText(text.into())).await
    }

    /// Refresh the document context, optionally focusing a selection.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] after [`Session::disconnect`] and
    /// [`Error::ConnectionClosed`] if the session ended otherwise.
    pub async fn update_context(
        &self,
        text: impl Into<String>,
        selection: Option<String>,
    ) -> Result<()> {
        self.command(Command::UpdateContext {
            text: text.into(),
            selection,
        })
        .await
    }

    /// # Errors
    /// Returns [`Error::Cancelled`] after [`Session::disconnect`] and
    /// [`Error::ConnectionClosed`] if the session ended otherwise.
    pub async fn switch_mode(&self, mode: AgentMode) -> Result<()> {
        self.command(Command::SwitchMode(mode)).await
    }

    async fn command(&self, command: Command) -> Result<()> {
        if self.task.is_none() {
            return Err(Error::Cancelled);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Stop capture, flush playback and close the transport. Safe to call
    /// repeatedly and after the session already ended.
    pub async fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
        if let Err(err) = task.await {
            tracing::warn!(id = %self.id, "Session task ended abnormally: {err}");
        }
    }
}

async fn open_transport(
    config: &LiveConfig,
    connector: &dyn Connector,
    mode: AgentMode,
    initial_text: &str,
) -> Result<Box<dyn Transport>> {
    let mut transport = connector.connect().await?;
    let setup = config.setup(mode)?;
    transport.send(ClientMessage::Setup(Box::new(setup))).await?;

    let handshake = await_setup_complete(transport.as_mut());
    match config.handshake_timeout() {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| Error::Transport("timed out waiting for setup acknowledgement".into()))??,
        None => handshake.await?,
    }

    if !initial_text.trim().is_empty() {
        transport
            .send(ClientMessage::context_note(context_note(initial_text, None)))
            .await?;
    }
    Ok(transport)
}

async fn await_setup_complete(transport: &mut dyn Transport) -> Result<()> {
    loop {
        match transport.next_event().await {
            Ok(Some(ServerEvent::SetupComplete)) => return Ok(()),
            Ok(Some(ServerEvent::Error { error })) => return Err(Error::Api(error)),
            Ok(Some(ServerEvent::Closed { code, reason })) => {
                return Err(Error::Transport(format!(
                    "closed during setup ({}): {reason}",
                    code.map_or_else(|| "no code".to_string(), |c| c.to_string())
                )));
            }
            Ok(None) => return Err(Error::ConnectionClosed),
            Ok(Some(other)) => {
                tracing::debug!(kind = other.kind(), "Ignoring event before setup completed");
            }
            Err(err) if !err.is_fatal() => tracing::warn!("Skipping bad frame: {err}"),
            Err(err) => return Err(err),
        }
    }
}

enum Exit {
    Local(Option<oneshot::Sender<()>>),
    PeerClosed { code: Option<u16>, reason: String },
    Failed(Error),
}

/// Owns the pipeline for one connection. Every source is multiplexed in one
/// task, so none of this state needs a lock.
struct SessionActor {
    id: Uuid,
    config: Arc<LiveConfig>,
    transport: Box<dyn Transport>,
    encoder: CaptureEncoder,
    frames: TransmitReceiver,
    capture_live: bool,
    scheduler: PlaybackScheduler,
    speaking: bool,
    assembler: TranscriptAssembler,
    dispatcher: ToolDispatcher,
    commands: mpsc::Receiver<Command>,
    publisher: Publisher,
}

impl SessionActor {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.playback_tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect { done }) => break Exit::Local(Some(done)),
                    Some(cmd) => {
                        if let Err(err) = self.handle_command(cmd).await {
                            break Exit::Failed(err);
                        }
                    }
                    None => break Exit::Local(None),
                },
                event = self.transport.next_event() => match event {
                    Ok(Some(ServerEvent::Closed { code, reason })) => {
                        break Exit::PeerClosed { code, reason };
                    }
                    Ok(Some(event)) => {
                        if let Err(err) = self.handle_server_event(event).await {
                            break Exit::Failed(err);
                        }
                    }
                    Ok(None) => break Exit::Failed(Error::ConnectionClosed),
                    Err(err) if !err.is_fatal() => {
                        tracing::warn!(id = %self.id, "Skipping bad frame: {err}");
                        self.publisher.error(err.user_reason(), false);
                    }
                    Err(err) => break Exit::Failed(err),
                },
                frame = self.frames.recv(), if self.capture_live => match frame {
                    Some(frame) => {
                        if let Err(err) = self.transport.send(frame.into_message()).await {
                            break Exit::Failed(err);
                        }
                    }
                    None => {
                        tracing::info!(id = %self.id, "Capture stream ended");
                        self.capture_live = false;
                    }
                },
                _ = tick.tick() => self.sync_speaking(),
            }
        };
        self.teardown(exit).await;
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        match self.transport.send(message).await {
            Err(err) if !err.is_fatal() => {
                tracing::warn!(id = %self.id, "Dropped invalid outbound message: {err}");
                Ok(())
            }
            other => other,
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SendText(text) => {
                self.publisher.message(Message::new(Speaker::User, text.clone()));
                self.send(ClientMessage::user_text(text)).await
            }
            Command::UpdateContext { text, selection } => {
                let note = context_note(&text, selection.as_deref());
                self.send(ClientMessage::context_note(note)).await
            }
            Command::SwitchMode(mode) => {
                self.publisher.mode(mode);
                self.publisher
                    .message(Message::system(format!("Switched to {mode} mode")));
                self.send(ClientMessage::context_note(mode.switch_note())).await
            }
            Command::Disconnect { .. } => Ok(()),
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::SetupComplete => {
                tracing::debug!(id = %self.id, "Duplicate setup acknowledgement");
            }
            ServerEvent::AudioChunk { mime_type, data } => self.play_chunk(&mime_type, &data),
            ServerEvent::ModelText { text } => {
                if self.config.response_modality == Modality::Text {
                    self.append(Channel::Output, &text);
                }
            }
            ServerEvent::InputTranscription { text } => self.append(Channel::Input, &text),
            ServerEvent::OutputTranscription { text } => self.append(Channel::Output, &text),
            ServerEvent::TurnComplete => {
                for message in self.assembler.turn_complete() {
                    self.publisher.message(message);
                }
                self.publish_live_text();
            }
            ServerEvent::Interrupted => {
                let cleared = self.scheduler.flush();
                self.assembler.clear();
                tracing::info!(id = %self.id, cleared, "Interrupted by user speech");
                self.publish_live_text();
                self.sync_speaking();
            }
            ServerEvent::ToolCall { calls } => {
                for call in calls {
                    self.run_tool(&call).await?;
                }
            }
            ServerEvent::ToolCallCancellation { ids } => {
                // Calls are answered inline, so there is never anything left to withdraw.
                tracing::debug!(id = %self.id, ?ids, "Tool call cancellation after response");
                self.dispatcher.cancel(&ids);
            }
            ServerEvent::GoAway { time_left } => {
                tracing::info!(id = %self.id, ?time_left, "Service is going away");
                self.publisher.go_away(time_left);
            }
            ServerEvent::Error { error } => return Err(Error::Api(error)),
            ServerEvent::Closed { .. } => {}
            ServerEvent::Unknown(value) => {
                tracing::debug!(id = %self.id, "Ignoring unknown event: {value}");
            }
        }
        Ok(())
    }

    fn play_chunk(&mut self, mime_type: &str, data: &str) {
        match AudioFormat::from_mime_type(mime_type) {
            Some(format) if format.rate != self.scheduler.sample_rate_hz() => {
                tracing::warn!(
                    announced = format.rate,
                    expected = self.scheduler.sample_rate_hz(),
                    "Audio chunk rate differs from playback rate"
                );
            }
            Some(_) => {}
            None => tracing::debug!(mime_type, "Audio chunk without a PCM mime type"),
        }
        if let Err(err) = self.scheduler.enqueue_base64(data) {
            tracing::warn!(id = %self.id, "Dropping undecodable audio chunk: {err}");
        }
        self.sync_speaking();
    }

    fn append(&mut self, channel: Channel, delta: &str) {
        if let Some(forced) = self.assembler.append_delta(channel, delta) {
            self.publisher.message(forced);
        }
        self.publisher
            .live_text(channel, self.assembler.live_text(channel));
    }

    fn publish_live_text(&self) {
        for channel in [Channel::Input, Channel::Output] {
            self.publisher
                .live_text(channel, self.assembler.live_text(channel));
        }
    }

    /// Every call gets exactly one response, including calls that fail.
    /// Handlers are synchronous, so each id is resolved before the next event
    /// is read and a repeated id starts a fresh call.
    async fn run_tool(&mut self, call: &FunctionCall) -> Result<()> {
        match self.dispatcher.handle(call) {
            Ok(outcome) => {
                match &outcome.effect {
                    ToolEffect::Suggestion(suggestion) => {
                        self.publisher.suggestion(suggestion.clone());
                    }
                    ToolEffect::Roll(roll) => self.publisher.message(roll.to_message()),
                }
                let sent = self.send(outcome.response_message()).await;
                self.dispatcher.resolve(&outcome.id);
                sent
            }
            Err(err) => {
                tracing::warn!(id = %self.id, call = %call.id, "Tool call failed: {err}");
                self.publisher.error(err.user_reason(), false);
                self.send(tools::error_response(call, &err)).await
            }
        }
    }

    fn sync_speaking(&mut self) {
        self.scheduler.retire_finished();
        let speaking = self.scheduler.is_speaking();
        if speaking != self.speaking {
            self.speaking = speaking;
            self.publisher.speaking(speaking);
        }
    }

    /// Single exit path: flush and release happen here and only here.
    async fn teardown(mut self, exit: Exit) {
        let done = match exit {
            Exit::Local(done) => {
                tracing::info!(id = %self.id, "Disconnecting");
                self.publisher.state(SessionState::Closing);
                done
            }
            Exit::PeerClosed { code, reason } => {
                let orderly = code.is_none_or(|c| NORMAL_CLOSE_CODES.contains(&c));
                tracing::info!(id = %self.id, ?code, %reason, "Connection closed by peer");
                if !orderly {
                    let err = Error::Transport(format!("closed with code {code:?}: {reason}"));
                    self.publisher.error(err.user_reason(), true);
                    self.publisher.state(SessionState::Error);
                }
                None
            }
            Exit::Failed(err) => {
                tracing::warn!(id = %self.id, "Session failed: {err}");
                self.publisher.error(err.user_reason(), true);
                self.publisher.state(SessionState::Error);
                None
            }
        };

        self.scheduler.flush();
        self.assembler.clear();
        self.encoder.stop().await;
        let discarded = self.frames.discard_pending();
        self.transport.close().await;
        self.sync_speaking();
        self.publish_live_text();

        let stats = self.frames.stats();
        tracing::info!(
            id = %self.id,
            frames_sent = stats.queued,
            frames_dropped = stats.dropped,
            discarded,
            "Session closed"
        );
        self.publisher.state(SessionState::Closed);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}
