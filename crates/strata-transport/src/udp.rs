//! UDP datagram channel between cluster nodes.
//!
//! One [`Datagram`] per node, bound to the node's advertised port. Sends are
//! connectionless (`send_to` on the shared socket); receives decode one
//! [`Message`] per datagram. There is no retransmission and no framing
//! beyond the datagram boundary itself.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use strata_types::Message;

use crate::{codec, Result, TransportError, MAX_DATAGRAM};

/// One-shot rendezvous: [`Rendezvous::wait`] blocks until
/// [`Rendezvous::signal`] fires.
///
/// The signal holds a permit, so a signal that arrives before anyone waits
/// is not lost. Used only by the bring-up chain ping, where exactly one
/// probe is expected.
#[derive(Debug, Default)]
pub struct Rendezvous {
    notify: Notify,
}

impl Rendezvous {
    /// Block until [`Rendezvous::signal`] has been invoked.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Release the waiter (or store a permit for a future waiter).
    pub fn signal(&self) {
        self.notify.notify_one();
    }
}

/// A bound UDP socket carrying CBOR-encoded [`Message`] datagrams, plus the
/// node's bring-up rendezvous.
pub struct Datagram {
    socket: UdpSocket,
    local_addr: SocketAddr,
    rendezvous: Rendezvous,
}

impl Datagram {
    /// Bind the node's datagram socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        tracing::info!(%local_addr, "datagram transport bound");

        Ok(Self {
            socket,
            local_addr,
            rendezvous: Rendezvous::default(),
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Encode `msg` and send it to `addr` as a single datagram.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if encoding fails,
    /// [`TransportError::TooLarge`] if the encoding exceeds
    /// [`MAX_DATAGRAM`], or [`TransportError::Io`] on a socket error. The
    /// caller decides whether a failed send matters; replication paths are
    /// fire-and-forget.
    pub async fn send(&self, addr: &str, msg: &Message) -> Result<()> {
        let bytes = codec::to_vec(msg)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::TooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM,
            });
        }

        self.socket.send_to(&bytes, addr).await?;
        tracing::trace!(to = addr, action = %msg.action, "datagram sent");
        Ok(())
    }

    /// Receive and decode the next datagram.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] for a malformed datagram
    /// (the serve loop drops it and keeps listening) or
    /// [`TransportError::Io`] on a socket error (fatal to the loop).
    pub async fn recv(&self) -> Result<Message> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        tracing::trace!(%peer, len, "datagram received");
        codec::from_slice(&buf[..len])
    }

    /// Block until another task (the dispatcher, on receipt of a `signal`
    /// message) invokes [`Datagram::signal`].
    pub async fn wait_for_signal(&self) {
        self.rendezvous.wait().await;
    }

    /// Release the bring-up waiter.
    pub fn signal(&self) {
        self.rendezvous.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use strata_types::{Action, VectorClock};

    async fn loopback() -> Datagram {
        Datagram::bind("127.0.0.1:0").await.expect("bind")
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let a = loopback().await;
        let b = loopback().await;

        let mut msg = Message::new("n0:1", Action::Put, b"foo:bar".to_vec());
        msg.context = VectorClock::from_view(["n0:1", "n1:1"]);

        a.send(&b.local_addr().to_string(), &msg)
            .await
            .expect("send");

        let received = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("no datagram arrived")
            .expect("decode");
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_decode_error() {
        let b = loopback().await;

        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        raw.send_to(b"not cbor at all", b.local_addr())
            .await
            .expect("send");

        let err = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("no datagram arrived")
            .expect_err("garbage must not decode");
        assert!(matches!(err, TransportError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let a = loopback().await;
        let msg = Message::new("n0:1", Action::Gossip, vec![0u8; MAX_DATAGRAM + 1]);
        let err = a
            .send("127.0.0.1:9", &msg)
            .await
            .expect_err("must exceed datagram ceiling");
        assert!(matches!(err, TransportError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_rendezvous_releases_waiter() {
        let transport = Arc::new(loopback().await);

        let waiter = Arc::clone(&transport);
        let handle = tokio::spawn(async move {
            waiter.wait_for_signal().await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.signal();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("waiter never released")
            .expect("join");
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let rendezvous = Rendezvous::default();
        rendezvous.signal();
        tokio::time::timeout(Duration::from_secs(1), rendezvous.wait())
            .await
            .expect("permit should satisfy a later wait");
    }
}
