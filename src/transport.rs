use std::net::SocketAddr;

use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rand::RngExt;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

/// The unreliable datagram transport underneath the protocol. It accepts
///  opaque packets for fire-and-forget transmission and yields received
///  packets one at a time.
///
/// This is an abstraction seam: the protocol endpoints only ever talk to
///  this trait, which keeps the I/O part mockable for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Hand a packet to the transport. There is no delivery guarantee and
    ///  no error reporting - a dropped packet looks exactly like a sent one.
    async fn transmit(&self, packet_buf: &[u8]);

    /// Wait for the next packet. `None` signals that no packet was
    ///  delivered this round (dropped, or nothing usable) - callers must
    ///  loop and call again, never treat it as a zero-length payload.
    async fn receive(&self) -> Option<Vec<u8>>;
}

/// Size of the receive buffer handed to the socket. Well above the largest
///  packet the protocol produces (5 byte header + 1400 byte payload), so
///  datagrams are never truncated.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// A [`DatagramTransport`] over a UDP socket, with a configurable
///  independent per-packet loss probability applied on the receive path to
///  simulate an unreliable link.
///
/// One endpoint is constructed [`listening`](UdpTransport::listening) on a
///  local address and learns its peer from the first arriving datagram; the
///  other is constructed [`connecting`](UdpTransport::connecting) to that
///  address.
pub struct UdpTransport {
    socket: UdpSocket,
    peer_addr: RwLock<Option<SocketAddr>>,
    loss_probability: f64,
}

impl UdpTransport {
    pub async fn listening(local_addr: SocketAddr, loss_probability: f64) -> anyhow::Result<UdpTransport> {
        Self::check_loss_probability(loss_probability)?;

        let socket = UdpSocket::bind(local_addr).await?;
        debug!("bound listening transport to {:?}", socket.local_addr()?);

        Ok(UdpTransport {
            socket,
            peer_addr: RwLock::new(None),
            loss_probability,
        })
    }

    pub async fn connecting(remote_addr: SocketAddr, loss_probability: f64) -> anyhow::Result<UdpTransport> {
        Self::check_loss_probability(loss_probability)?;

        let bind_addr: SocketAddr = if remote_addr.is_ipv4() {
            "0.0.0.0:0".parse()?
        }
        else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!("bound connecting transport to {:?} for peer {:?}", socket.local_addr()?, remote_addr);

        Ok(UdpTransport {
            socket,
            peer_addr: RwLock::new(Some(remote_addr)),
            loss_probability,
        })
    }

    fn check_loss_probability(loss_probability: f64) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&loss_probability) {
            bail!("loss probability {} is outside [0,1]", loss_probability);
        }
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn transmit(&self, packet_buf: &[u8]) {
        let peer_addr = *self.peer_addr.read().await;
        match peer_addr {
            Some(to) => {
                trace!("UDP transport: sending packet to {:?}", to);
                if let Err(e) = self.socket.send_to(packet_buf, to).await {
                    error!("error sending UDP packet to {:?}: {}", to, e);
                }
            }
            None => {
                debug!("no peer address known yet - dropping outgoing packet");
            }
        }
    }

    async fn receive(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (num_read, from) = match self.socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                return None;
            }
        };

        {
            let mut peer_addr = self.peer_addr.write().await;
            if peer_addr.is_none() {
                debug!("learned peer address {:?}", from);
                *peer_addr = Some(from);
            }
        }

        if self.loss_probability > 0.0 && rand::rng().random_bool(self.loss_probability) {
            debug!("simulated loss of received packet from {:?}", from);
            return None;
        }

        buf.truncate(num_read);
        Some(buf)
    }
}
