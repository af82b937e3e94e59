//! Snowflake identifier generation.
//!
//! Layout of a generated id (most significant bit first):
//! - 42 bits: milliseconds since Unix epoch
//! - 14 bits: node id (up to 16384 nodes)
//! - 8 bits: per-millisecond sequence (256 ids per millisecond per node)
//!
//! Ids from a single generator are strictly increasing, even if the wall
//! clock steps backwards.

use crate::{EntityId, Error, Result};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const NODE_BITS: u32 = 14;
const SEQUENCE_BITS: u32 = 8;
const TIMESTAMP_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

/// Exclusive upper bound for node ids.
pub const MAX_NODE_ID: u64 = 1 << NODE_BITS;

/// Number of ids a node can hand out within one millisecond.
pub const MAX_SEQUENCE: u64 = 1 << SEQUENCE_BITS;

#[derive(Debug)]
struct ClockState {
    last_ms: u64,
    sequence: u64,
}

/// Thread-safe generator of time-ordered entity ids.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u64,
    state: Mutex<ClockState>,
}

impl IdGenerator {
    /// Creates a generator for the given node.
    pub fn new(node_id: u64) -> Result<Self> {
        if node_id >= MAX_NODE_ID {
            return Err(Error::InvalidNodeId(node_id));
        }
        Ok(Self {
            node_id,
            state: Mutex::new(ClockState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    /// Returns the node id baked into generated ids.
    #[must_use]
    pub const fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Generates the next id using the system clock.
    pub fn next_id(&self) -> EntityId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        self.next_id_at(now)
    }

    /// Generates the next id as if the wall clock read `now_ms`.
    ///
    /// A clock that went backwards reuses the last timestamp, and an
    /// exhausted sequence borrows the following millisecond.
    pub fn next_id_at(&self, now_ms: u64) -> EntityId {
        let mut state = self.state.lock().unwrap();
        let mut ts = now_ms;
        if ts <= state.last_ms {
            ts = state.last_ms;
            state.sequence += 1;
            if state.sequence >= MAX_SEQUENCE {
                ts += 1;
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = ts;
        EntityId::from_raw(ts << TIMESTAMP_SHIFT | self.node_id << SEQUENCE_BITS | state.sequence)
    }

    /// Extracts the node id from a generated id.
    #[must_use]
    pub const fn node_of(id: EntityId) -> u64 {
        (id.as_raw() >> SEQUENCE_BITS) & (MAX_NODE_ID - 1)
    }

    /// Extracts the millisecond timestamp from a generated id.
    #[must_use]
    pub const fn timestamp_of(id: EntityId) -> u64 {
        id.as_raw() >> TIMESTAMP_SHIFT
    }

    /// Extracts the per-millisecond sequence from a generated id.
    #[must_use]
    pub const fn sequence_of(id: EntityId) -> u64 {
        id.as_raw() & (MAX_SEQUENCE - 1)
    }
}
