//! IO value change monitoring.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use softplc_codec::{layout, Layout};
use tracing::warn;

/// Default number of changes buffered between drains.
pub const DEFAULT_MONITOR_CAPACITY: usize = 100;

layout! {
    /// One reported IO value change.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct IoChange {
        pub id: u32,
        pub io_num: u32,
        pub value: f32,
    }
}

/// Bounded buffer of pending changes.
///
/// When full, new changes are dropped and counted. The buffer never blocks.
#[derive(Debug, Clone)]
pub struct MonitorBuffer {
    changes: Vec<IoChange>,
    capacity: usize,
    dropped: u64,
}

impl Default for MonitorBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MONITOR_CAPACITY)
    }
}

impl MonitorBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            changes: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Total number of changes dropped on overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append a change. Returns `false` if it was dropped.
    pub fn record(&mut self, change: IoChange) -> bool {
        if self.changes.len() >= self.capacity {
            self.dropped += 1;
            warn!(
                id = change.id,
                io_num = change.io_num,
                dropped = self.dropped,
                "monitor buffer full, dropping change"
            );
            return false;
        }
        self.changes.push(change);
        true
    }

    /// Drain all pending changes.
    pub fn take(&mut self) -> Vec<IoChange> {
        std::mem::take(&mut self.changes)
    }
}

/// Pack changes as consecutive 12-byte little-endian records.
pub fn encode(changes: &[IoChange]) -> Bytes {
    let mut buf = BytesMut::zeroed(changes.len() * IoChange::SIZE);
    let mut offset = 0;
    for change in changes {
        offset += change.write_to(&mut buf, offset);
    }
    buf.freeze()
}

/// Unpack records produced by [`encode`]. A trailing partial record is ignored.
pub fn decode(buf: &[u8]) -> Vec<IoChange> {
    (0..buf.len() / IoChange::SIZE)
        .map(|i| IoChange::read_from(buf, i * IoChange::SIZE))
        .collect()
}
