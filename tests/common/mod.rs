#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use live_rt_rs::audio::{
    CaptureDevice, CaptureFeed, ChannelPlaybackSink, ManualClock, PlaybackCommand,
    PushCaptureDevice,
};
use live_rt_rs::sdk::{BoxFuture, Connector, EventStream, SessionEvent, Transport};
use live_rt_rs::{ClientMessage, Error, LiveAgent, LiveBuilder, Result, ServerEvent};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    outgoing: mpsc::UnboundedSender<ClientMessage>,
}

impl Transport for MockTransport {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        let outgoing = self.outgoing.clone();
        Box::pin(async move {
            outgoing.send(message).map_err(|_| Error::ConnectionClosed)?;
            Ok(())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
        Box::pin(async move { Ok(self.incoming.recv().await) })
    }
}

/// Hands out one pre-built transport and counts connection attempts.
pub struct MockConnector {
    transport: Mutex<Option<MockTransport>>,
    pub attempts: AtomicUsize,
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let transport = self
                .transport
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Transport("no mock transport left".into()))?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        })
    }
}

/// The service side of a mock link.
pub struct MockServer {
    pub events: mpsc::UnboundedSender<ServerEvent>,
    pub sent: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MockServer {
    pub fn push(&self, event: ServerEvent) {
        self.events.send(event).unwrap();
    }

    pub async fn next_sent(&mut self) -> ClientMessage {
        within(self.sent.recv()).await.expect("transport closed")
    }
}

pub fn mock_link() -> (Arc<MockConnector>, MockServer) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        transport: Mutex::new(Some(MockTransport {
            incoming: event_rx,
            outgoing: out_tx,
        })),
        attempts: AtomicUsize::new(0),
    });
    (
        connector,
        MockServer {
            events: event_tx,
            sent: out_rx,
        },
    )
}

pub struct DeniedDevice;

#[async_trait]
impl CaptureDevice for DeniedDevice {
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        Err(Error::DeviceUnavailable("permission denied".into()))
    }

    async fn close(&mut self) {}

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn name(&self) -> &str {
        "denied"
    }
}

/// Microphone that has a backlog of buffers ready the moment it opens.
pub struct BackloggedDevice {
    pub buffers: Vec<Vec<f32>>,
    tx: Option<mpsc::Sender<Vec<f32>>>,
}

impl BackloggedDevice {
    pub fn new(buffers: Vec<Vec<f32>>) -> Self {
        Self { buffers, tx: None }
    }
}

#[async_trait]
impl CaptureDevice for BackloggedDevice {
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        let (tx, rx) = mpsc::channel(self.buffers.len().max(1));
        for buffer in self.buffers.drain(..) {
            tx.try_send(buffer).unwrap();
        }
        self.tx = Some(tx);
        Ok(rx)
    }

    async fn close(&mut self) {
        self.tx = None;
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn name(&self) -> &str {
        "backlogged"
    }
}

/// Agent wired to a mock link, a host-fed microphone, a manual clock and a
/// channel speaker.
pub struct Harness {
    pub agent: LiveAgent,
    pub server: MockServer,
    pub connector: Arc<MockConnector>,
    pub feed: CaptureFeed,
    pub device: Option<PushCaptureDevice>,
    pub clock: ManualClock,
    pub playback: mpsc::UnboundedReceiver<PlaybackCommand>,
    pub events: EventStream,
}

pub fn harness_with(configure: impl FnOnce(LiveBuilder) -> LiveBuilder) -> Harness {
    let (connector, server) = mock_link();
    let (device, feed) = PushCaptureDevice::new("mock mic", 16_000, 160, 8);
    let (sink, playback) = ChannelPlaybackSink::new();
    let clock = ManualClock::new();
    let builder = LiveAgent::builder()
        .connector(connector.clone())
        .playback_sink(move || Ok(Box::new(sink.clone())))
        .clock(Arc::new(clock.clone()))
        .input_format(16_000, 160)
        .rng_seed(42);
    let mut agent = configure(builder).build().unwrap();
    let events = agent.events().unwrap();
    Harness {
        agent,
        server,
        connector,
        feed,
        device: Some(device),
        clock,
        playback,
        events,
    }
}

pub fn harness() -> Harness {
    harness_with(|b| b)
}

impl Harness {
    /// Acknowledge setup up front and connect with the mock microphone.
    pub async fn open(&mut self, initial_text: &str) {
        self.server.push(ServerEvent::SetupComplete);
        let device = self.device.take().expect("device already used");
        self.agent
            .connect_with_device(Box::new(device), initial_text)
            .await
            .unwrap();
    }

    /// Wait for the first event matching `pred`, skipping the others.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&SessionEvent) -> bool) -> SessionEvent {
        within(async {
            loop {
                let event = self.events.recv().await.expect("event stream ended");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
    }
}

pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}
