//! Protocol-level tests driving a sender and a receiver endpoint against
//!  each other, over a deterministic in-memory transport pair and over real
//!  UDP sockets on localhost.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::time;

use swp::config::SwpConfig;
use swp::receiver::SwpReceiver;
use swp::sender::SwpSender;
use swp::transport::{DatagramTransport, UdpTransport};

/// One direction-aware end of an in-memory datagram link: ordered delivery,
///  loss scripted per incoming datagram (front of the script first; an
///  exhausted script delivers everything).
struct InMemoryTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    drop_script: StdMutex<VecDeque<bool>>,
}

#[async_trait]
impl DatagramTransport for InMemoryTransport {
    async fn transmit(&self, packet_buf: &[u8]) {
        let _ = self.outgoing.send(packet_buf.to_vec());
    }

    async fn receive(&self) -> Option<Vec<u8>> {
        let datagram = match self.incoming.lock().await.recv().await {
            Some(datagram) => datagram,
            // the peer end is gone; behave like a socket and wait forever
            None => std::future::pending().await,
        };

        if self.drop_script.lock().unwrap().pop_front().unwrap_or(false) {
            return None;
        }
        Some(datagram)
    }
}

/// Build a linked transport pair; `to_receiver_drop_script` scripts losses
///  of datagrams arriving at the receiver-side end.
fn transport_pair(to_receiver_drop_script: Vec<bool>) -> (Arc<InMemoryTransport>, Arc<InMemoryTransport>) {
    let (sender_tx, receiver_rx) = mpsc::unbounded_channel();
    let (receiver_tx, sender_rx) = mpsc::unbounded_channel();

    let sender_end = InMemoryTransport {
        outgoing: sender_tx,
        incoming: Mutex::new(sender_rx),
        drop_script: StdMutex::new(VecDeque::new()),
    };
    let receiver_end = InMemoryTransport {
        outgoing: receiver_tx,
        incoming: Mutex::new(receiver_rx),
        drop_script: StdMutex::new(to_receiver_drop_script.into()),
    };

    (Arc::new(sender_end), Arc::new(receiver_end))
}

fn endpoints(
    sender_end: Arc<InMemoryTransport>,
    receiver_end: Arc<InMemoryTransport>,
    config: SwpConfig,
) -> (Arc<SwpSender>, Arc<SwpReceiver>) {
    let config = Arc::new(config);

    let mut sender = SwpSender::new(sender_end, config.clone()).unwrap();
    sender.spawn_active_loops();

    let mut receiver = SwpReceiver::new(receiver_end, config).unwrap();
    receiver.spawn_active_loop();

    (Arc::new(sender), Arc::new(receiver))
}

fn patterned_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(start_paused = true)]
async fn test_zero_loss_end_to_end_reconstruction() {
    let (sender_end, receiver_end) = transport_pair(vec![]);
    let (sender, receiver) = endpoints(sender_end, receiver_end, SwpConfig::default());

    // more than twice the window's worth of segments, with a partial tail
    let data = patterned_data(10 * 1400 + 777);
    let num_segments = 11; // ceil(len / 1400)

    let send_task = {
        let sender = sender.clone();
        let data = data.clone();
        tokio::spawn(async move { sender.send(&data).await })
    };

    let mut reassembled = Vec::new();
    for _ in 0..num_segments {
        reassembled.extend_from_slice(&receiver.recv().await);
    }

    send_task.await.unwrap().unwrap();
    assert_eq!(reassembled, data);

    // exactly ceil(len / 1400) segments - nothing further is released
    assert!(time::timeout(Duration::from_millis(50), receiver.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_lossy_reordering_scenario() {
    // segment 2's first transmission is lost; 0, 1, 3 and 4 get through
    let (sender_end, receiver_end) = transport_pair(vec![false, false, true]);
    let config = SwpConfig {
        max_segment_size: 3,
        ..SwpConfig::default()
    };
    let (sender, receiver) = endpoints(sender_end, receiver_end, config);

    let data: Vec<u8> = (0..15).collect();
    sender.send(&data).await.unwrap();

    // segments 0 and 1 are released immediately
    assert_eq!(receiver.recv().await, Bytes::from_static(&[0, 1, 2]));
    assert_eq!(receiver.recv().await, Bytes::from_static(&[3, 4, 5]));

    // segment 2 is missing, so nothing more is released before the
    //  retransmission timeout
    assert!(time::timeout(Duration::from_millis(100), receiver.recv()).await.is_err());

    // the retransmission closes the gap; 2, 3 and 4 come out in order with
    //  no duplicate release of the buffered 3 and 4
    assert_eq!(receiver.recv().await, Bytes::from_static(&[6, 7, 8]));
    assert_eq!(receiver.recv().await, Bytes::from_static(&[9, 10, 11]));
    assert_eq!(receiver.recv().await, Bytes::from_static(&[12, 13, 14]));

    assert!(time::timeout(Duration::from_millis(50), receiver.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_datagrams_do_not_poison_the_endpoints() {
    let (sender_end, receiver_end) = transport_pair(vec![]);

    // garbage in both directions: an unknown type tag towards the receiver,
    //  a truncated header towards the sender
    sender_end.transmit(&[0xff, 1, 2, 3, 4, 5]).await;
    receiver_end.transmit(&[0x41, 0]).await;

    let (sender, receiver) = endpoints(sender_end, receiver_end, SwpConfig::default());

    sender.send(b"still alive").await.unwrap();
    assert_eq!(receiver.recv().await, Bytes::from_static(b"still alive"));
}

#[tokio::test(start_paused = true)]
async fn test_ack_loss_causes_duplicate_that_is_suppressed() {
    let (sender_end, receiver_end) = transport_pair(vec![]);
    // the first ACK towards the sender is lost, so the sender re-sends
    //  segment 0 after the timeout; the receiver must not release it twice
    sender_end.drop_script.lock().unwrap().push_back(true);

    let (sender, receiver) = endpoints(sender_end, receiver_end, SwpConfig::default());

    sender.send(b"once only").await.unwrap();

    assert_eq!(receiver.recv().await, Bytes::from_static(b"once only"));
    assert!(time::timeout(Duration::from_secs(5), receiver.recv()).await.is_err());
}

#[tokio::test]
async fn test_zero_loss_over_udp_localhost() {
    let config = Arc::new(SwpConfig::default());

    let receiver_transport = UdpTransport::listening("127.0.0.1:0".parse().unwrap(), 0.0).await.unwrap();
    let sender_transport = UdpTransport::connecting(receiver_transport.local_addr(), 0.0).await.unwrap();

    let mut sender = SwpSender::new(Arc::new(sender_transport), config.clone()).unwrap();
    sender.spawn_active_loops();
    let mut receiver = SwpReceiver::new(Arc::new(receiver_transport), config).unwrap();
    receiver.spawn_active_loop();

    let data = patterned_data(2 * 1400 + 200);

    let result = time::timeout(Duration::from_secs(10), async {
        let send = sender.send(&data);
        let recv = async {
            let mut reassembled = Vec::new();
            for _ in 0..3 {
                reassembled.extend_from_slice(&receiver.recv().await);
            }
            reassembled
        };
        let (send_result, reassembled) = tokio::join!(send, recv);
        send_result.unwrap();
        reassembled
    }).await.unwrap();

    assert_eq!(result, data);
}
