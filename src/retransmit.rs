use std::collections::BTreeSet;
use tokio::time::Instant;

use crate::seq_num::SeqNum;

/// The time-ordered set of armed retransmission deadlines, one per
///  unacknowledged segment. A single coordinating loop per sender sleeps
///  until [`next_deadline`](RetransmitQueue::next_deadline) and pops due
///  entries, instead of one timer task per in-flight packet.
///
/// NB: There is an invariant that every entry corresponds to exactly one
///  segment currently in the send window and vice versa - acknowledgment
///  removes the window entry and cancels its deadline in the same critical
///  section. The consumer still re-checks window membership for each popped
///  sequence number, so a violation degrades to a harmless no-op rather
///  than a duplicate retransmission of an acknowledged segment.
#[derive(Default)]
pub struct RetransmitQueue {
    deadlines: BTreeSet<(Instant, SeqNum)>,
}

impl RetransmitQueue {
    pub fn arm(&mut self, deadline: Instant, seq_num: SeqNum) {
        self.deadlines.insert((deadline, seq_num));
    }

    /// Cancel an armed deadline, e.g. because the segment was acknowledged.
    ///  Cancelling an entry that was already popped is a no-op.
    pub fn cancel(&mut self, deadline: Instant, seq_num: SeqNum) {
        self.deadlines.remove(&(deadline, seq_num));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|&(deadline, _)| deadline)
    }

    /// Remove and return the sequence numbers of all entries due at `now`,
    ///  earliest deadline first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<SeqNum> {
        let mut due = Vec::new();
        while let Some(&(deadline, seq_num)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, seq_num));
            due.push(seq_num);
        }
        due
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }
}
