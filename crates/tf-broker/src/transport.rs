//! Duplex message transport seen by a client actor.
//!
//! The actor only deals in [`Frame`]s: a boxed [`FrameStream`] for the read
//! side and a [`FrameSink`] for the write side. The WebSocket implementation
//! wraps a split `tokio_tungstenite::WebSocketStream`, so handshake, opcode
//! framing and ping/pong encoding stay inside tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt, future,
    stream::{BoxStream, SplitSink},
};
use tf_core::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message, error::ProtocolError},
};

/// One message on the wire, independent of the transport library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Read half: yields frames until the peer goes away.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Write half.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame (where the protocol has one) and flush.
    async fn close(&mut self) -> Result<(), TransportError>;
}

pub type BoxSink = Box<dyn FrameSink>;

/// Split an established WebSocket into the actor's sink and stream halves.
pub fn split_websocket<S>(ws: WebSocketStream<S>) -> (BoxSink, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let frames = stream
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_message(msg).map(Ok),
                Err(e) => Some(Err(map_ws_error(e))),
            })
        })
        .boxed();
    (Box::new(WsSink { inner: sink }), frames)
}

struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.inner.send(to_message(frame)).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await.map_err(map_ws_error)
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

/// Raw frames never surface on a read, so they map to nothing.
fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text.to_string())),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(_) => Some(Frame::Close),
        Message::Frame(_) => None,
    }
}

/// Fold tungstenite errors into the close / failure split the actor cares about.
pub fn map_ws_error(err: tungstenite::Error) -> TransportError {
    use std::io::ErrorKind;

    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => TransportError::Closed,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => TransportError::Closed,
        tungstenite::Error::Io(e) => match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => {
                TransportError::Closed
            }
            _ => TransportError::Io(e.to_string()),
        },
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WebSocketStream<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn frames_cross_in_both_directions() {
        let (server, mut client) = pair().await;
        let (mut sink, mut frames) = split_websocket(server);

        client.send(Message::Text(r#"{"m":1,"i":[3]}"#.into())).await.unwrap();
        assert_eq!(frames.next().await, Some(Ok(Frame::Text(r#"{"m":1,"i":[3]}"#.to_string()))));

        sink.send(Frame::Binary(Bytes::from_static(b"tick"))).await.unwrap();
        let got = client.next().await.unwrap().unwrap();
        assert_eq!(got, Message::Binary(Bytes::from_static(b"tick")));
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_close_frame() {
        let (server, mut client) = pair().await;
        let (_sink, mut frames) = split_websocket(server);

        client.close(None).await.unwrap();
        assert_eq!(frames.next().await, Some(Ok(Frame::Close)));
    }

    #[test]
    fn io_resets_are_closes() {
        let err = tungstenite::Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(map_ws_error(err).is_close());
        let err = tungstenite::Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!map_ws_error(err).is_close());
        assert!(map_ws_error(tungstenite::Error::ConnectionClosed).is_close());
    }
}
