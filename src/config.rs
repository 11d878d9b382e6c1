use std::time::Duration;
use anyhow::bail;

/// Protocol parameters shared by sender and receiver endpoints. The
///  defaults are the protocol's nominal values; deviating from them is
///  mostly useful for tests and for tuning to unusual link characteristics.
#[derive(Debug, Clone)]
pub struct SwpConfig {
    /// The maximum number of payload bytes per DATA segment. `send` splits
    ///  application data into chunks of this size.
    ///
    /// The nominal value of 1400 leaves room for IP, UDP and protocol
    ///  headers inside a regular 1500-byte Ethernet frame so segments are
    ///  not fragmented at the IP level.
    pub max_segment_size: usize,

    /// The maximum number of *segments* (not bytes) that may be transmitted
    ///  but not yet acknowledged at any time. `send` suspends when the
    ///  window is full and resumes when an acknowledgment frees a slot.
    pub send_window_size: usize,

    /// The number of segments ahead of the next expected sequence number
    ///  that the receiver is prepared to buffer. Segments further ahead are
    ///  discarded on arrival; the sender's retransmission re-delivers them
    ///  once the receiver has caught up.
    ///
    /// Must be at least the peer's send window size, or in-window segments
    ///  get discarded and retransmitted needlessly.
    pub receive_window_size: u32,

    /// How long an unacknowledged segment stays in flight before it is
    ///  retransmitted. There is no RTT estimation; the timeout is fixed.
    pub retransmit_timeout: Duration,

    /// Upper bound on retransmissions per segment. `None` retransmits
    ///  indefinitely until the segment is acknowledged, which means a
    ///  permanently dead link keeps the sender retrying forever. `Some(n)`
    ///  gives up after `n` retransmissions and fails all pending and future
    ///  `send` calls on this endpoint.
    pub max_retransmits: Option<u32>,
}

impl Default for SwpConfig {
    fn default() -> SwpConfig {
        SwpConfig {
            max_segment_size: 1400,
            send_window_size: 5,
            receive_window_size: 5,
            retransmit_timeout: Duration::from_secs(1),
            max_retransmits: None,
        }
    }
}

impl SwpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_segment_size == 0 {
            bail!("max segment size must be at least 1");
        }
        if self.max_segment_size > 1400 {
            bail!("max segment size {} exceeds the wire format's cap of 1400", self.max_segment_size);
        }
        if self.send_window_size == 0 {
            bail!("send window must have room for at least one segment");
        }
        if self.receive_window_size == 0 {
            bail!("receive window must have room for at least one segment");
        }
        if self.retransmit_timeout.is_zero() {
            bail!("retransmit timeout must be non-zero");
        }
        Ok(())
    }
}
