use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use tokio::select;
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::SwpConfig;
use crate::packet::{Packet, PacketType};
use crate::retransmit::RetransmitQueue;
use crate::seq_num::SeqNum;
use crate::transport::DatagramTransport;

/// One unacknowledged segment in the send window. The encoded packet is
///  kept verbatim so retransmissions put the identical bytes on the wire.
struct InFlightEntry {
    packet_buf: Bytes,
    sent_at: Instant,
    /// the deadline currently armed in the retransmit queue for this entry
    deadline: Instant,
    retransmit_count: u32,
}

struct SenderInner {
    config: Arc<SwpConfig>,
    transport: Arc<dyn DatagramTransport>,

    /// the sequence number assigned to the next outgoing DATA segment
    next_seq_num: SeqNum,
    send_window: BTreeMap<SeqNum, InFlightEntry>,
    retransmit_queue: RetransmitQueue,

    /// set when the retransmission budget for some segment is exhausted -
    ///  the endpoint stops accepting new segments from then on
    failed: bool,
}

impl SenderInner {
    /// Process a cumulative acknowledgment: every window entry with a
    ///  sequence number at or below the acknowledged one is removed and its
    ///  deadline cancelled. Idempotent - an ACK covering nothing is a no-op,
    ///  so duplicated and reordered ACK arrivals are harmless.
    fn on_ack(&mut self, ack_seq_num: SeqNum, window_slots: &Semaphore, timer_wake: &Notify) {
        let mut num_freed = 0;
        while let Some((&seq_num, _)) = self.send_window.first_key_value() {
            if seq_num > ack_seq_num {
                break;
            }
            if let Some(entry) = self.send_window.remove(&seq_num) {
                self.retransmit_queue.cancel(entry.deadline, seq_num);
                num_freed += 1;
            }
        }

        if num_freed == 0 {
            trace!("ACK #{} covers no outstanding segment - ignoring", ack_seq_num);
            return;
        }

        debug!("ACK #{} slid the send window past {} segment(s)", ack_seq_num, num_freed);
        window_slots.add_permits(num_freed);
        timer_wake.notify_one();
    }

    /// Retransmit every segment whose deadline has passed. Each popped
    ///  deadline is checked against current window membership first: an
    ///  entry acknowledged since arming makes the firing a no-op.
    async fn process_due_retransmits(&mut self, window_slots: &Semaphore) {
        let now = Instant::now();
        for seq_num in self.retransmit_queue.pop_due(now) {
            let (packet_buf, deadline) = match self.send_window.get_mut(&seq_num) {
                Some(entry) => {
                    if let Some(max_retransmits) = self.config.max_retransmits {
                        if entry.retransmit_count >= max_retransmits {
                            error!("segment #{} still unacknowledged after {} retransmission(s) - aborting delivery", seq_num, entry.retransmit_count);
                            self.abort_delivery(window_slots);
                            return;
                        }
                    }
                    entry.retransmit_count += 1;
                    entry.deadline = now + self.config.retransmit_timeout;
                    debug!("retransmitting segment #{} (retransmission {}, first sent {:?} ago)", seq_num, entry.retransmit_count, now - entry.sent_at);
                    (entry.packet_buf.clone(), entry.deadline)
                }
                None => {
                    trace!("deadline fired for segment #{} which is no longer in the window - ignoring", seq_num);
                    continue;
                }
            };

            self.retransmit_queue.arm(deadline, seq_num);
            self.transport.transmit(&packet_buf).await;
        }
    }

    fn abort_delivery(&mut self, window_slots: &Semaphore) {
        self.failed = true;
        self.send_window.clear();
        self.retransmit_queue.clear();

        // closing the semaphore wakes all senders suspended on a full
        //  window; they surface the failure instead of waiting forever
        window_slots.close();
    }
}

/// The sending endpoint: segments application data, keeps at most
///  `send_window_size` segments in flight, retransmits on timeout and
///  consumes cumulative acknowledgments from the transport.
pub struct SwpSender {
    config: Arc<SwpConfig>,
    transport: Arc<dyn DatagramTransport>,
    inner: Arc<RwLock<SenderInner>>,

    /// one permit per free window slot; acquired (and folded into the
    ///  window entry) on transmission, released on acknowledgment
    window_slots: Arc<Semaphore>,
    /// wakes the retransmit loop when the earliest deadline may have changed
    timer_wake: Arc<Notify>,

    ack_loop_handle: Option<JoinHandle<()>>,
    retransmit_loop_handle: Option<JoinHandle<()>>,
}

impl Drop for SwpSender {
    fn drop(&mut self) {
        if let Some(handle) = self.ack_loop_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.retransmit_loop_handle.take() {
            handle.abort();
        }
    }
}

impl SwpSender {
    pub fn new(transport: Arc<dyn DatagramTransport>, config: Arc<SwpConfig>) -> anyhow::Result<SwpSender> {
        config.validate()?;

        let inner = SenderInner {
            config: config.clone(),
            transport: transport.clone(),
            next_seq_num: SeqNum::ZERO,
            send_window: BTreeMap::default(),
            retransmit_queue: RetransmitQueue::default(),
            failed: false,
        };

        let window_slots = Arc::new(Semaphore::new(config.send_window_size));

        Ok(SwpSender {
            config,
            transport,
            inner: Arc::new(RwLock::new(inner)),
            window_slots,
            timer_wake: Arc::new(Notify::new()),
            ack_loop_handle: None,
            retransmit_loop_handle: None,
        })
    }

    /// Spawn the acknowledgment ingestion loop and the retransmission loop.
    ///  Both run until the sender is dropped.
    pub fn spawn_active_loops(&mut self) {
        if self.ack_loop_handle.is_some() {
            warn!("active loops already spawned");
            return;
        }
        self.ack_loop_handle = Some(tokio::spawn(Self::ack_loop(
            self.transport.clone(),
            self.inner.clone(),
            self.window_slots.clone(),
            self.timer_wake.clone(),
        )));
        self.retransmit_loop_handle = Some(tokio::spawn(Self::retransmit_loop(
            self.inner.clone(),
            self.window_slots.clone(),
            self.timer_wake.clone(),
        )));
    }

    /// Send `data` reliably: it is split into consecutive segments of at
    ///  most `max_segment_size` bytes, each transmitted as one DATA packet
    ///  in sequence-number order. Suspends while the send window is full.
    ///
    /// With an unbounded retransmission budget (the default) this only
    ///  fails after delivery was aborted; it never gives up on its own.
    pub async fn send(&self, data: &[u8]) -> anyhow::Result<()> {
        for segment in data.chunks(self.config.max_segment_size) {
            self.send_segment(segment).await?;
        }
        Ok(())
    }

    async fn send_segment(&self, payload: &[u8]) -> anyhow::Result<()> {
        let permit = match self.window_slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => bail!("reliable delivery was aborted - segment not sent"),
        };
        // the slot is occupied until an ACK removes the window entry
        permit.forget();

        let mut inner = self.inner.write().await;
        if inner.failed {
            bail!("reliable delivery was aborted - segment not sent");
        }

        let seq_num = inner.next_seq_num;
        inner.next_seq_num = seq_num.next();

        let mut packet_buf = BytesMut::with_capacity(Packet::HEADER_LEN + payload.len());
        Packet::data(seq_num, payload).ser(&mut packet_buf);
        let packet_buf = packet_buf.freeze();

        trace!("sending segment #{} with {} payload byte(s)", seq_num, payload.len());
        inner.transport.transmit(&packet_buf).await;

        let now = Instant::now();
        let deadline = now + self.config.retransmit_timeout;
        inner.send_window.insert(seq_num, InFlightEntry {
            packet_buf,
            sent_at: now,
            deadline,
            retransmit_count: 0,
        });
        inner.retransmit_queue.arm(deadline, seq_num);
        drop(inner);

        self.timer_wake.notify_one();
        Ok(())
    }

    async fn ack_loop(
        transport: Arc<dyn DatagramTransport>,
        inner: Arc<RwLock<SenderInner>>,
        window_slots: Arc<Semaphore>,
        timer_wake: Arc<Notify>,
    ) {
        loop {
            let Some(datagram) = transport.receive().await else {
                continue;
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "sender_ingest", ?correlation_id);

            let packet = match span.in_scope(|| Packet::deser(&mut datagram.as_slice())) {
                Ok(packet) => packet,
                Err(e) => {
                    span.in_scope(|| warn!("received malformed datagram - discarding: {}", e));
                    continue;
                }
            };

            match packet.packet_type {
                PacketType::Ack => {
                    Self::handle_ack(&inner, packet.seq_num, &window_slots, &timer_wake)
                        .instrument(span).await
                }
                PacketType::Data => {
                    span.in_scope(|| debug!("received DATA packet #{} on the sending side - ignoring", packet.seq_num));
                }
            }
        }
    }

    async fn handle_ack(inner: &RwLock<SenderInner>, ack_seq_num: SeqNum, window_slots: &Semaphore, timer_wake: &Notify) {
        inner.write().await.on_ack(ack_seq_num, window_slots, timer_wake);
    }

    /// Single coordinating loop for all retransmissions: sleeps until the
    ///  earliest armed deadline, wakes early whenever the queue head may
    ///  have changed, and never acts without re-checking the window under
    ///  the lock.
    async fn retransmit_loop(inner: Arc<RwLock<SenderInner>>, window_slots: Arc<Semaphore>, timer_wake: Arc<Notify>) {
        loop {
            let next_deadline = inner.read().await.retransmit_queue.next_deadline();

            match next_deadline {
                Some(deadline) => {
                    select! {
                        _ = time::sleep_until(deadline) => {
                            inner.write().await.process_due_retransmits(&window_slots).await;
                        }
                        _ = timer_wake.notified() => {
                            // earliest deadline may have changed - re-evaluate
                        }
                    }
                }
                None => timer_wake.notified().await,
            }
        }
    }
}
