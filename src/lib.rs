//! A sliding-window ARQ protocol providing reliable, in-order delivery of
//!  byte segments over an unreliable datagram transport that may silently
//!  drop or reorder packets.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *segments*: bounded-size chunks
//!   of application data, each carried by exactly one DATA packet. There is
//!   no re-assembly of segments into larger messages - what was chunked on
//!   the sending side arrives as the same chunks on the receiving side.
//! * Delivery is reliable and strictly in order: every segment is delivered
//!   to the application exactly once, in the order it was sent, regardless
//!   of loss and reordering underneath.
//! * The sender keeps at most a fixed number of unacknowledged segments in
//!   flight (the send window); `send` suspends while the window is full and
//!   resumes on the next acknowledgment that frees a slot.
//! * Acknowledgments are *cumulative*: an ACK for sequence number `k` covers
//!   every segment up to and including `k`. Duplicate and out-of-date ACKs
//!   are harmless no-ops.
//! * Unacknowledged segments are retransmitted after a fixed timeout, driven
//!   by a single coordinating loop per sender rather than one timer task per
//!   packet. Deadlines are cancelled on acknowledgment, and window
//!   membership is re-checked under the lock before every retransmission, so
//!   stale deadlines cannot cause duplicates in the window state.
//! * The receiver buffers out-of-order segments (bounded by its receive
//!   window) and releases contiguous runs to a FIFO ready queue consumed by
//!   `recv`.
//!
//! Explicitly *not* goals: congestion control, connection establishment or
//!  teardown handshakes, encryption or authentication, stream multiplexing,
//!  and selective acknowledgment.
//!
//! ## Wire format
//!
//! All integers in network byte order (BE):
//!
//! ```ascii
//! 0: type tag (u8): 0x44 ('D') = DATA, 0x41 ('A') = ACK
//! 1: sequence number (u32)
//! 5: payload - empty for ACK, at most 1400 bytes for DATA
//! ```
//!
//! The payload cap is enforced by the sender's segmentation, not by the
//!  codec: the decoder accepts any payload length.
//!
//! For a DATA packet the sequence number identifies the segment; sequence
//!  numbers are assigned monotonically starting at 0 and are never reused.
//!  For an ACK packet it is the cumulative acknowledgment value, i.e. the
//!  highest sequence number below which everything has been released to the
//!  receiving application.
//!
//! ## Transport
//!
//! The datagram transport underneath is a collaborator behind the
//!  [`transport::DatagramTransport`] trait: fire-and-forget transmission and
//!  a receive call that yields the next surviving packet or an empty signal
//!  ("nothing usable this round" - the caller loops). [`transport::UdpTransport`]
//!  implements it over a UDP socket with a configurable, independent
//!  per-packet loss probability for protocol testing under adverse
//!  conditions.

pub mod config;
pub mod packet;
pub mod receiver;
mod retransmit;
pub mod sender;
pub mod seq_num;
pub mod transport;
