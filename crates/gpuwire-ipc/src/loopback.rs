//! In-process bidirectional frame channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::ring::{FrameRing, PopError, PushError};
use crate::{FrameSink, TransportError};

/// One end of a [`loopback_pair`]. Cloning yields another handle to the same
/// end; any number of senders may share it.
#[derive(Clone)]
pub struct LoopbackEndpoint {
    tx: Arc<FrameRing>,
    rx: Arc<FrameRing>,
    closed: Arc<AtomicBool>,
}

/// Two connected endpoints, each direction backed by a ring of
/// `capacity_bytes`.
pub fn loopback_pair(capacity_bytes: usize) -> (LoopbackEndpoint, LoopbackEndpoint) {
    let a_to_b = Arc::new(FrameRing::new(capacity_bytes));
    let b_to_a = Arc::new(FrameRing::new(capacity_bytes));
    let closed = Arc::new(AtomicBool::new(false));
    let a = LoopbackEndpoint {
        tx: Arc::clone(&a_to_b),
        rx: Arc::clone(&b_to_a),
        closed: Arc::clone(&closed),
    };
    let b = LoopbackEndpoint {
        tx: b_to_a,
        rx: a_to_b,
        closed,
    };
    (a, b)
}

impl LoopbackEndpoint {
    /// Severs the channel for both ends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receives every frame the peer has sent so far.
    ///
    /// Frames already in flight are still delivered after [`Self::close`].
    pub fn recv_frames(&self) -> Result<Vec<Vec<u8>>, TransportError> {
        self.rx.drain().map_err(|err| match err {
            PopError::Corrupt | PopError::Empty => TransportError::RingCorrupt,
        })
    }
}

impl FrameSink for LoopbackEndpoint {
    fn send_frame(&mut self, frame: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_push(frame) {
            Ok(()) => true,
            Err(PushError::Full) => {
                warn!(
                    len = frame.len(),
                    queued = self.tx.queued_bytes(),
                    "loopback ring full; dropping connection"
                );
                self.close();
                false
            }
            Err(PushError::TooLarge) => {
                warn!(
                    len = frame.len(),
                    capacity = self.tx.capacity_bytes(),
                    "frame larger than loopback ring"
                );
                self.close();
                false
            }
        }
    }
}
