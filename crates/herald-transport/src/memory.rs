//! In-process duplex socket.
//!
//! Used to drive the hub without a network, mostly from tests and
//! benchmarks. What one end sends, the other end receives, in order.

use futures_util::{Sink, Stream};
use herald_protocol::Frame;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::traits::TransportError;

/// One end of an in-memory socket pair.
#[derive(Debug)]
pub struct MemorySocket {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Create a connected pair of sockets.
#[must_use]
pub fn pair() -> (MemorySocket, MemorySocket) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemorySocket {
            tx: Some(a_tx),
            rx: a_rx,
        },
        MemorySocket {
            tx: Some(b_tx),
            rx: b_rx,
        },
    )
}

impl MemorySocket {
    /// Whether this end can still send.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Stream for MemorySocket {
    type Item = Result<Frame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<Frame> for MemorySocket {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_open() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(TransportError::ConnectionClosed))
        }
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx = None;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (mut a, mut b) = pair();

        a.send(Frame::text("one")).await.unwrap();
        a.send(Frame::text("two")).await.unwrap();

        assert_eq!(b.next().await.unwrap().unwrap(), Frame::text("one"));
        assert_eq!(b.next().await.unwrap().unwrap(), Frame::text("two"));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (mut a, mut b) = pair();

        a.close().await.unwrap();
        assert!(!a.is_open());
        assert!(b.next().await.is_none());
        assert!(a.send(Frame::text("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_peer_rejects_sends() {
        let (mut a, b) = pair();
        drop(b);

        assert!(matches!(
            a.send(Frame::text("nobody")).await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(a.next().await.is_none());
    }
}
