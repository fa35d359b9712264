//! Snowflake id generation
//!
//! Every entity id is a 64-bit value laid out as
//!
//! ```text
//! | 1 bit unused | 41 bits ms since epoch | 10 bits node | 12 bits sequence |
//! ```
//!
//! Uniqueness across processes comes from the node id alone: two live
//! instances must never share one. Within a node the sequence counter
//! disambiguates ids minted in the same millisecond; once it is exhausted
//! the generator waits for the clock to tick.

use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::clock::Clock;
use crate::error::{AgoraError, Result};

/// 2010-11-04T01:42:54.657Z
pub const DEFAULT_EPOCH_MS: i64 = 1_288_834_974_657;

pub const NODE_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;
const NODE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;
const MAX_TIMESTAMP: i64 = (1 << 41) - 1;

/// The fields packed into an id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Milliseconds since the unix epoch
    pub timestamp_ms: i64,
    pub node_id: u16,
    pub sequence: u16,
}

struct State {
    last_ms: i64,
    sequence: u16,
}

/// Time-ordered, collision-free id generator for one node
pub struct IdGenerator {
    node_id: u16,
    epoch_ms: i64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl IdGenerator {
    pub fn new(node_id: u16, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_epoch(node_id, DEFAULT_EPOCH_MS, clock)
    }

    pub fn with_epoch(node_id: u16, epoch_ms: i64, clock: Arc<dyn Clock>) -> Result<Self> {
        if node_id > MAX_NODE_ID {
            return Err(AgoraError::Config(format!(
                "node id {} out of range (0..={})",
                node_id, MAX_NODE_ID
            )));
        }

        Ok(Self {
            node_id,
            epoch_ms,
            clock,
            state: Mutex::new(State {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Mint the next id.
    ///
    /// Fails if the clock is observed behind the last issued timestamp; the
    /// generator never reuses a millisecond it may already have handed out.
    pub fn generate(&self) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| AgoraError::Internal(format!("Lock poisoned: {}", e)))?;

        let mut now = self.elapsed_millis()?;
        if now < state.last_ms {
            error!(
                last_ms = state.last_ms,
                now_ms = now,
                "Clock moved backwards, refusing to issue ids"
            );
            return Err(AgoraError::ClockMovedBackwards {
                last_ms: state.last_ms + self.epoch_ms,
                now_ms: now + self.epoch_ms,
            });
        }

        // State is only written once the id is certain to be issued, so a
        // failed wait leaves the last issued (ms, sequence) pair intact.
        let mut sequence = 0;
        if now == state.last_ms {
            sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if sequence == 0 {
                debug!(node_id = self.node_id, "Sequence exhausted, waiting for next millisecond");
                now = self.wait_past(state.last_ms)?;
            }
        }

        if now > MAX_TIMESTAMP {
            return Err(AgoraError::Internal(
                "timestamp no longer fits in 41 bits".into(),
            ));
        }
        state.last_ms = now;
        state.sequence = sequence;

        Ok(((now as u64) << TIMESTAMP_SHIFT)
            | ((self.node_id as u64) << NODE_SHIFT)
            | sequence as u64)
    }

    /// Split an id back into its fields
    pub fn decompose(&self, id: u64) -> IdParts {
        IdParts {
            timestamp_ms: (id >> TIMESTAMP_SHIFT) as i64 + self.epoch_ms,
            node_id: ((id >> NODE_SHIFT) & MAX_NODE_ID as u64) as u16,
            sequence: (id & SEQUENCE_MASK as u64) as u16,
        }
    }

    fn elapsed_millis(&self) -> Result<i64> {
        let elapsed = self.clock.now_millis() - self.epoch_ms;
        if elapsed < 0 {
            return Err(AgoraError::Internal(format!(
                "clock reads {}ms, before the id epoch",
                elapsed + self.epoch_ms
            )));
        }
        Ok(elapsed)
    }

    fn wait_past(&self, last_ms: i64) -> Result<i64> {
        loop {
            let now = self.elapsed_millis()?;
            if now > last_ms {
                return Ok(now);
            }
            if now < last_ms {
                return Err(AgoraError::ClockMovedBackwards {
                    last_ms: last_ms + self.epoch_ms,
                    now_ms: now + self.epoch_ms,
                });
            }
            std::thread::yield_now();
        }
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node_id", &self.node_id)
            .field("epoch_ms", &self.epoch_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// Advances one millisecond every `per_tick` reads
    struct TickingClock {
        start_ms: i64,
        reads: AtomicI64,
        per_tick: i64,
    }

    impl Clock for TickingClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            chrono::DateTime::from_timestamp_millis(self.now_millis()).unwrap()
        }

        fn now_millis(&self) -> i64 {
            let reads = self.reads.fetch_add(1, Ordering::SeqCst);
            self.start_ms + reads / self.per_tick
        }
    }

    /// Holds `start_ms` for `hold` reads, dips one millisecond for a single
    /// read, then returns `start_ms` for two more reads before moving on.
    struct DippingClock {
        start_ms: i64,
        hold: i64,
        reads: AtomicI64,
    }

    impl Clock for DippingClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            chrono::DateTime::from_timestamp_millis(self.now_millis()).unwrap()
        }

        fn now_millis(&self) -> i64 {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            match read - self.hold {
                n if n < 0 => self.start_ms,
                0 => self.start_ms - 1,
                1 | 2 => self.start_ms,
                _ => self.start_ms + 1,
            }
        }
    }

    fn manual() -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_now())
    }

    #[test]
    fn test_rejects_out_of_range_node() {
        assert!(IdGenerator::new(MAX_NODE_ID, manual()).is_ok());
        let err = IdGenerator::new(MAX_NODE_ID + 1, manual()).unwrap_err();
        assert!(matches!(err, AgoraError::Config(_)));
    }

    #[test]
    fn test_sequential_ids_strictly_increase() {
        for node_id in [0, 1, 513, MAX_NODE_ID] {
            let ids = IdGenerator::new(node_id, Arc::new(SystemClock)).unwrap();
            let mut previous = 0;
            for _ in 0..10_000 {
                let id = ids.generate().unwrap();
                assert!(id > previous, "{} not greater than {}", id, previous);
                previous = id;
            }
        }
    }

    #[test]
    fn test_decompose_round_trips_fields() {
        let clock = manual();
        let ids = IdGenerator::new(42, clock.clone()).unwrap();

        let first = ids.decompose(ids.generate().unwrap());
        let second = ids.decompose(ids.generate().unwrap());

        assert_eq!(first.timestamp_ms, clock.now_millis());
        assert_eq!(first.node_id, 42);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.timestamp_ms, first.timestamp_ms);
        assert_eq!(second.sequence, 1);

        clock.advance(Duration::from_millis(3));
        let third = ids.decompose(ids.generate().unwrap());
        assert_eq!(third.timestamp_ms, first.timestamp_ms + 3);
        assert_eq!(third.sequence, 0);
    }

    #[test]
    fn test_distinct_nodes_never_collide() {
        // Same frozen millisecond, same sequence counters
        let clock = manual();
        let a = IdGenerator::new(1, clock.clone()).unwrap();
        let b = IdGenerator::new(2, clock).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id_a = a.generate().unwrap();
            let id_b = b.generate().unwrap();
            assert_eq!(a.decompose(id_a).sequence, b.decompose(id_b).sequence);
            assert!(seen.insert(id_a));
            assert!(seen.insert(id_b));
        }
    }

    #[test]
    fn test_sequence_exhaustion_moves_to_next_millisecond() {
        let start_ms = chrono::Utc::now().timestamp_millis();
        let clock = Arc::new(TickingClock {
            start_ms,
            reads: AtomicI64::new(0),
            per_tick: 10_000,
        });
        let ids = IdGenerator::new(7, clock).unwrap();

        let mut last = ids.decompose(ids.generate().unwrap());
        for _ in 0..SEQUENCE_MASK {
            let parts = ids.decompose(ids.generate().unwrap());
            assert_eq!(parts.timestamp_ms, last.timestamp_ms);
            last = parts;
        }
        assert_eq!(last.sequence, SEQUENCE_MASK);

        let rolled = ids.decompose(ids.generate().unwrap());
        assert!(rolled.timestamp_ms > last.timestamp_ms);
        assert_eq!(rolled.sequence, 0);
    }

    #[test]
    fn test_clock_regression_is_fatal() {
        let clock = manual();
        let ids = IdGenerator::new(3, clock.clone()).unwrap();
        ids.generate().unwrap();

        clock.rewind(Duration::from_millis(10));
        let err = ids.generate().unwrap_err();
        assert!(matches!(err, AgoraError::ClockMovedBackwards { .. }));

        // Issuance resumes once the clock has caught up
        clock.advance(Duration::from_millis(11));
        assert!(ids.generate().is_ok());
    }

    #[test]
    fn test_regression_during_exhaustion_wait_never_reissues() {
        let start_ms = chrono::Utc::now().timestamp_millis();
        // One read per id for the full sequence, plus the read that finds it exhausted
        let hold = SEQUENCE_MASK as i64 + 2;
        let clock = Arc::new(DippingClock {
            start_ms,
            hold,
            reads: AtomicI64::new(0),
        });
        let ids = IdGenerator::new(5, clock).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..=SEQUENCE_MASK {
            assert!(seen.insert(ids.generate().unwrap()));
        }

        // Sequence exhausted, and the wait sees the clock step back
        let err = ids.generate().unwrap_err();
        assert!(matches!(err, AgoraError::ClockMovedBackwards { .. }));

        // Still exhausted for this millisecond: the next id waits for the one after
        let id = ids.generate().unwrap();
        assert!(seen.insert(id), "id {} issued twice", id);
        let parts = ids.decompose(id);
        assert_eq!(parts.timestamp_ms, start_ms + 1);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let ids = Arc::new(IdGenerator::new(9, Arc::new(SystemClock)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..5_000).map(|_| ids.generate().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 40_000);
    }
}
