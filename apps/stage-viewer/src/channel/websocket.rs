use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

use super::{ChannelError, ChannelEvent, MessageChannel};

/// Message channel over a WebSocket. Outbound text is queued on an unbounded
/// sender drained by a writer task; inbound frames are forwarded as
/// [`ChannelEvent`]s by a reader task.
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WebSocketChannel {
    /// Connects and returns the channel together with its event stream. The
    /// first event is always [`ChannelEvent::Opened`].
    pub async fn connect(
        url: &Url,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Connect(err.to_string()))?;
        debug!(target: "stage_viewer::channel", url = %url, "message channel connected");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let _ = events_tx.send(ChannelEvent::Opened);

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                trace!(target: "stage_viewer::channel", bytes = text.len(), "sending frame");
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(target: "stage_viewer::channel", error = %err, "websocket send failed");
                    let _ = writer_events.send(ChannelEvent::Closed(Some(err.to_string())));
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events_tx.send(ChannelEvent::Message(text)).is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|frame| frame.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            };
            debug!(target: "stage_viewer::channel", reason = ?reason, "message channel closed");
            let _ = events_tx.send(ChannelEvent::Closed(reason));
        });

        Ok((
            Self {
                outbound: outbound_tx,
                writer,
                reader,
            },
            events_rx,
        ))
    }

    pub fn close(self) {
        self.reader.abort();
        drop(self.outbound);
        drop(self.writer);
    }
}

impl MessageChannel for WebSocketChannel {
    fn send(&self, text: String) -> Result<(), ChannelError> {
        self.outbound.send(text).map_err(|_| ChannelError::Closed)
    }
}
