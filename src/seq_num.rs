use std::fmt::{Display, Formatter};

/// The sequence number of a segment. Assigned monotonically per sender
///  starting at zero, never reused: the protocol has no wrap-around
///  semantics, and exhausting the `u32` space is treated as a bug upstream.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SeqNum(u32);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SeqNum {
        SeqNum(
            self.0.checked_add(1)
                .expect("sequence number space exhausted")
        )
    }

    pub fn checked_minus(&self, other: u32) -> Option<SeqNum> {
        self.0.checked_sub(other).map(SeqNum)
    }

    /// Number of sequence numbers from `base` up to (excluding) `self`,
    ///  or zero if `self` is at or below `base`.
    pub fn distance_from(&self, base: SeqNum) -> u32 {
        self.0.saturating_sub(base.0)
    }
}
