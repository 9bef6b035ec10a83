use stage_proto::OutboundMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{ChannelError, MessageChannel};

/// Records outbound text instead of sending it. Clones share the same log,
/// so a test can keep one handle while the synchronizer owns another.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Outbound log decoded back into protocol messages; undecodable entries
    /// are skipped.
    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent_texts()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Returns and clears everything recorded so far.
    pub fn take_messages(&self) -> Vec<OutboundMessage> {
        let drained: Vec<String> = match self.sent.lock() {
            Ok(mut sent) => sent.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        drained
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MessageChannel for RecordingChannel {
    fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ChannelError::Transport("recording log poisoned".into()))?;
        sent.push(text);
        Ok(())
    }
}
