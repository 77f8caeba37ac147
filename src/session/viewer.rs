//! Viewer session
//!
//! A viewer upgrades `/<anything>/<channel>` to a WebSocket and from then on
//! receives every chunk its channel's producer sends, one binary message per
//! chunk. Viewers are not authenticated: knowing the channel id is enough.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use super::context::{SessionContext, SharedState};
use crate::error::{Error, Result};
use crate::registry::{ChannelId, ViewerHandle};

/// One viewer connection
pub struct ViewerSession {
    ctx: SessionContext,
    shared: SharedState,
    channel: ChannelId,
}

impl ViewerSession {
    pub fn new(ctx: SessionContext, shared: SharedState, channel: ChannelId) -> Self {
        Self {
            ctx,
            shared,
            channel,
        }
    }

    /// Channel this viewer watches
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Accept the upgrade and run the session on the upgraded connection
    pub fn upgrade(self, ws: WebSocketUpgrade) -> Response {
        let session_id = self.ctx.session_id;
        ws.on_failed_upgrade(move |e| {
            tracing::debug!(session_id = session_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            if let Err(e) = self.run(socket).await {
                tracing::debug!(session_id = session_id, error = %e, "Viewer connection error");
            }
        })
    }

    /// Pump chunks until either side closes
    ///
    /// The viewer is registered with the router for exactly the lifetime of
    /// the pump; it is unregistered on every exit path.
    pub async fn run(self, socket: WebSocket) -> Result<()> {
        let viewer_id = self.ctx.session_id;
        let capacity = self.shared.config.viewer_queue_capacity;
        let (handle, outbox) = ViewerHandle::new(viewer_id, capacity);

        self.shared.router.register(&self.channel, handle.clone()).await;
        let total = self.shared.stats.viewer_connected();

        tracing::info!(
            session_id = viewer_id,
            peer = %self.ctx.peer_addr,
            channel = %self.channel,
            secure = self.ctx.secure,
            total = total,
            "New WebSocket connection"
        );

        let (sink, source) = socket.split();
        let outcome = pump(sink, source, outbox, &handle).await;

        handle.mark_closed();
        self.shared.router.unregister(&self.channel, viewer_id).await;
        let total = self.shared.stats.viewer_disconnected();

        tracing::info!(
            session_id = viewer_id,
            channel = %self.channel,
            total = total,
            "Disconnected WebSocket"
        );

        outcome
    }
}

/// Forward outbox chunks as binary messages; watch the socket for close
async fn pump<Tx, Rx>(
    mut sink: Tx,
    mut source: Rx,
    mut outbox: mpsc::Receiver<Bytes>,
    handle: &ViewerHandle,
) -> Result<()>
where
    Tx: Sink<Message, Error = axum::Error> + Unpin,
    Rx: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    loop {
        tokio::select! {
            chunk = outbox.recv() => {
                let Some(chunk) = chunk else { break };
                if let Err(e) = sink.send(Message::Binary(chunk)).await {
                    handle.mark_closing();
                    return Err(Error::WebSocket(e));
                }
            }
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        handle.mark_closing();
                        break;
                    }
                    // Viewers have nothing to say; pings are answered by the socket
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        handle.mark_closing();
                        return Err(Error::WebSocket(e));
                    }
                }
            }
        }
    }

    // Completes the close handshake; the peer may already be gone
    let _ = sink.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ReadyState;
    use futures_util::stream;

    type Inbound = std::result::Result<Message, axum::Error>;

    /// Sink that forwards every sent message into a channel
    fn recording_sink(
        tx: mpsc::UnboundedSender<Message>,
    ) -> impl Sink<Message, Error = axum::Error> + Unpin {
        Box::pin(futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            let _ = tx.send(msg);
            Ok::<_, axum::Error>(tx)
        }))
    }

    /// Inbound stream fed from a channel; ends when the sender is dropped
    fn inbound(rx: mpsc::UnboundedReceiver<Inbound>) -> impl Stream<Item = Inbound> + Unpin {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }))
    }

    #[tokio::test]
    async fn test_pump_forwards_chunks_and_stops_on_close() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let (handle, outbox) = ViewerHandle::new(1, 16);
        handle.try_send(Bytes::from_static(&[0xAA, 0xBB])).unwrap();

        let pump_handle = handle.clone();
        let task = tokio::spawn(async move {
            pump(recording_sink(sent_tx), inbound(inbound_rx), outbox, &pump_handle).await
        });

        let msg = sent_rx.recv().await.unwrap();
        assert_eq!(msg, Message::Binary(Bytes::from_static(&[0xAA, 0xBB])));

        inbound_tx.send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(handle.state(), ReadyState::Closing);
    }

    #[tokio::test]
    async fn test_pump_ignores_viewer_messages() {
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (handle, outbox) = ViewerHandle::new(1, 16);

        inbound_tx.send(Ok(Message::Text("hello".into()))).unwrap();
        drop(inbound_tx);

        pump(recording_sink(sent_tx), inbound(inbound_rx), outbox, &handle)
            .await
            .unwrap();

        // Nothing but the close handshake went out
        while let Ok(msg) = sent_rx.try_recv() {
            assert!(matches!(msg, Message::Close(_)), "unexpected message {:?}", msg);
        }
        assert_eq!(handle.state(), ReadyState::Closing);
    }

    #[tokio::test]
    async fn test_pump_stops_on_socket_error() {
        let (sent_tx, _sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (handle, outbox) = ViewerHandle::new(1, 16);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        inbound_tx.send(Err(axum::Error::new(reset))).unwrap();

        let result = pump(recording_sink(sent_tx), inbound(inbound_rx), outbox, &handle).await;

        assert!(matches!(result, Err(Error::WebSocket(_))));
        assert_eq!(handle.state(), ReadyState::Closing);
    }
}
