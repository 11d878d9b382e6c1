use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::SwpConfig;
use crate::packet::{Packet, PacketType};
use crate::seq_num::SeqNum;
use crate::transport::DatagramTransport;

struct ReceiverInner {
    config: Arc<SwpConfig>,
    transport: Arc<dyn DatagramTransport>,

    /// the lowest sequence number not yet released to the application; all
    ///  lower segments have been released exactly once, and the cumulative
    ///  ACK value is always one below this
    next_expected: SeqNum,

    /// out-of-order segments that arrived while a lower-numbered segment is
    ///  still missing. Entries leave the instant the gap below them closes.
    ///
    /// NB: There is an invariant that all keys are in
    ///  `next_expected..next_expected + receive_window_size` - segments
    ///  below are handled as duplicates, segments above are discarded on
    ///  arrival, and draining removes a key before `next_expected` moves
    ///  past it.
    recv_buffer: BTreeMap<SeqNum, Bytes>,

    ready_tx: mpsc::UnboundedSender<Bytes>,
}

impl ReceiverInner {
    /// Handle one arriving DATA segment. Every path through this function
    ///  transmits at most one cumulative acknowledgment, always carrying the
    ///  highest contiguous sequence number released so far.
    async fn on_data(&mut self, seq_num: SeqNum, payload: Bytes) {
        if seq_num < self.next_expected {
            debug!("segment #{} was already released - its ACK was presumably lost, resending", seq_num);
            self.send_ack().await;
            return;
        }

        if seq_num.distance_from(self.next_expected) >= self.config.receive_window_size {
            debug!("segment #{} is beyond the receive window starting at #{} - discarding", seq_num, self.next_expected);
            self.send_ack().await;
            return;
        }

        // overwriting on duplicate arrival is harmless - the payload is identical
        self.recv_buffer.insert(seq_num, payload);

        while let Some(payload) = self.recv_buffer.remove(&self.next_expected) {
            trace!("releasing segment #{} to the ready queue", self.next_expected);
            if self.ready_tx.send(payload).is_err() {
                warn!("ready queue consumer is gone - discarding released segment");
            }
            self.next_expected = self.next_expected.next();
        }

        self.send_ack().await;
    }

    /// Transmit the current cumulative acknowledgment. While nothing has
    ///  been released yet there is no sequence number to acknowledge, and
    ///  the transmission is skipped - the sender's retransmission covers
    ///  re-delivery of segment 0.
    async fn send_ack(&self) {
        let ack_seq_num = match self.next_expected.checked_minus(1) {
            Some(ack_seq_num) => ack_seq_num,
            None => {
                trace!("nothing released yet - no cumulative ACK to send");
                return;
            }
        };

        let mut packet_buf = BytesMut::with_capacity(Packet::HEADER_LEN);
        Packet::ack(ack_seq_num).ser(&mut packet_buf);

        trace!("sending cumulative ACK #{}", ack_seq_num);
        self.transport.transmit(&packet_buf).await;
    }
}

/// The receiving endpoint: buffers out-of-order segments, releases
///  contiguous runs to a FIFO ready queue in sequence-number order, and
///  acknowledges cumulatively after every DATA arrival.
pub struct SwpReceiver {
    transport: Arc<dyn DatagramTransport>,
    inner: Arc<RwLock<ReceiverInner>>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    ingest_loop_handle: Option<JoinHandle<()>>,
}

impl Drop for SwpReceiver {
    fn drop(&mut self) {
        if let Some(handle) = self.ingest_loop_handle.take() {
            handle.abort();
        }
    }
}

impl SwpReceiver {
    pub fn new(transport: Arc<dyn DatagramTransport>, config: Arc<SwpConfig>) -> anyhow::Result<SwpReceiver> {
        config.validate()?;

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        let inner = ReceiverInner {
            config,
            transport: transport.clone(),
            next_expected: SeqNum::ZERO,
            recv_buffer: BTreeMap::default(),
            ready_tx,
        };

        Ok(SwpReceiver {
            transport,
            inner: Arc::new(RwLock::new(inner)),
            ready_rx: Mutex::new(ready_rx),
            ingest_loop_handle: None,
        })
    }

    /// Spawn the ingestion loop pulling from the transport. Runs until the
    ///  receiver is dropped.
    pub fn spawn_active_loop(&mut self) {
        if self.ingest_loop_handle.is_some() {
            warn!("active loop already spawned");
            return;
        }
        self.ingest_loop_handle = Some(tokio::spawn(Self::ingest_loop(
            self.transport.clone(),
            self.inner.clone(),
        )));
    }

    /// Wait until at least one in-order segment is available and return
    ///  exactly one released payload. Successive calls yield segments in
    ///  strictly increasing sequence-number order with no duplicates.
    pub async fn recv(&self) -> Bytes {
        self.ready_rx.lock().await
            .recv().await
            .expect("the ready queue producer lives as long as the receiver")
    }

    async fn ingest_loop(transport: Arc<dyn DatagramTransport>, inner: Arc<RwLock<ReceiverInner>>) {
        loop {
            let Some(datagram) = transport.receive().await else {
                continue;
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "receiver_ingest", ?correlation_id);

            let packet = match span.in_scope(|| Packet::deser(&mut datagram.as_slice())) {
                Ok(packet) => packet,
                Err(e) => {
                    span.in_scope(|| warn!("received malformed datagram - discarding: {}", e));
                    continue;
                }
            };

            match packet.packet_type {
                PacketType::Data => {
                    Self::handle_data(&inner, packet.seq_num, packet.payload)
                        .instrument(span).await
                }
                PacketType::Ack => {
                    span.in_scope(|| trace!("received ACK #{} on the receiving side - ignoring", packet.seq_num));
                }
            }
        }
    }

    async fn handle_data(inner: &RwLock<ReceiverInner>, seq_num: SeqNum, payload: Bytes) {
        inner.write().await.on_data(seq_num, payload).await;
    }
}
