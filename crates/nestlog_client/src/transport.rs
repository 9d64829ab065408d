//! Outbound transport abstraction.

use crate::error::{ClientError, ClientResult};
use nestlog_protocol::ClientFrame;
use parking_lot::Mutex;

/// The outbound half of a connection.
///
/// Implementations encode the frame and hand it to whatever socket the
/// embedder runs; a mock captures frames for tests. Inbound frames do not
/// go through this trait: the embedder feeds them to the client core
/// directly.
pub trait FrameSink: Send + Sync {
    /// Transmits one frame.
    fn send(&self, frame: &ClientFrame) -> ClientResult<()>;
}

/// A sink that records sent frames, for tests.
#[derive(Default)]
pub struct MockSink {
    sent: Mutex<Vec<ClientFrame>>,
    fail: Mutex<bool>,
}

impl MockSink {
    /// Creates a working mock sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Returns all frames sent so far.
    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent.lock().clone()
    }

    /// Clears the captured frames.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl FrameSink for MockSink {
    fn send(&self, frame: &ClientFrame) -> ClientResult<()> {
        if *self.fail.lock() {
            return Err(ClientError::Transport("sink closed".into()));
        }
        self.sent.lock().push(frame.clone());
        Ok(())
    }
}
