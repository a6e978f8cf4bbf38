//! Bounded, non-blocking handoff from capture to the session's send loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::AudioFrame;

pub const DEFAULT_TRANSMIT_CAPACITY: usize = 32;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of transmit queue activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmitStats {
    pub queued: u64,
    pub dropped: u64,
}

/// Producer half, owned by the capture pump.
#[derive(Debug, Clone)]
pub struct TransmitSender {
    tx: mpsc::Sender<AudioFrame>,
    counters: Arc<Counters>,
}

/// Consumer half, drained by the session actor.
#[derive(Debug)]
pub struct TransmitReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    counters: Arc<Counters>,
}

/// Create a transmit queue holding at most `capacity` frames.
#[must_use]
pub fn transmit_channel(capacity: usize) -> (TransmitSender, TransmitReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    (
        TransmitSender {
            tx,
            counters: Arc::clone(&counters),
        },
        TransmitReceiver { rx, counters },
    )
}

impl TransmitSender {
    /// Enqueue without waiting. A full queue drops the frame so capture
    /// timing never depends on the network. Returns `false` once the
    /// receiving side is gone.
    pub fn offer(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped, "Transmit queue full, dropping capture frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[must_use]
    pub fn stats(&self) -> TransmitStats {
        stats(&self.counters)
    }
}

impl TransmitReceiver {
    /// Await the next frame. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    /// Drop everything queued; used on teardown so no stale audio is sent.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    #[must_use]
    pub fn stats(&self) -> TransmitStats {
        stats(&self.counters)
    }
}

fn stats(counters: &Counters) -> TransmitStats {
    TransmitStats {
        queued: counters.queued.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> AudioFrame {
        AudioFrame::from_float(&[0.1; 16], 16_000)
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = transmit_channel(2);
        assert!(tx.offer(frame()));
        assert!(tx.offer(frame()));
        assert!(tx.offer(frame()));
        assert_eq!(tx.stats(), TransmitStats { queued: 2, dropped: 1 });

        assert!(rx.recv().await.is_some());
        assert_eq!(rx.discard_pending(), 1);
    }

    #[tokio::test]
    async fn offer_reports_closed_receiver() {
        let (tx, rx) = transmit_channel(1);
        drop(rx);
        assert!(!tx.offer(frame()));
        assert!(tx.is_closed());
    }
}
