//! Bidirectional text channel to the streamed application.
//!
//! The transport that really carries these messages belongs to the media
//! stack; this module only describes the seam and provides a WebSocket
//! adapter plus an in-memory recorder.

pub mod mock;
pub mod websocket;

use thiserror::Error;

pub use mock::RecordingChannel;
pub use websocket::WebSocketChannel;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("message channel is closed")]
    Closed,
    #[error("failed to open message channel: {0}")]
    Connect(String),
    #[error("message channel transport error: {0}")]
    Transport(String),
}

/// Something that happened on the channel, delivered to the runtime in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed(Option<String>),
}

/// Fire-and-forget sender. Messages leave in the order they were handed over;
/// no reply is awaited.
pub trait MessageChannel {
    fn send(&self, text: String) -> Result<(), ChannelError>;
}

impl<T: MessageChannel + ?Sized> MessageChannel for &T {
    fn send(&self, text: String) -> Result<(), ChannelError> {
        (**self).send(text)
    }
}
