use std::sync::Mutex;

use plexus_types::{wall_clock_ms, TemporalAnchor};

/// Internal mutable state of the Hybrid Logical Clock.
struct HlcState {
    /// Last-known physical millisecond timestamp.
    physical_ms: u64,
    /// Logical counter for events within the same physical millisecond.
    logical: u32,
}

/// Hybrid Logical Clock stamping ledger writes.
///
/// Produces monotonically increasing [`TemporalAnchor`] values, and is
/// advanced past every remote anchor merged into the ledger so a local write
/// always supersedes what this peer has already observed.
///
/// # HLC Rules
///
/// - **Local event**: `physical = max(wall_clock, state.physical)`.
///   If physical advanced, `logical = 0`; otherwise `logical += 1`.
/// - **Receive**: `physical = max(wall_clock, state.physical, received.physical)`,
///   with logical adjusted to be strictly greater than both local and received
///   counters when the physical component ties.
pub struct HybridLogicalClock {
    state: Mutex<HlcState>,
}

impl HybridLogicalClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HlcState {
                physical_ms: 0,
                logical: 0,
            }),
        }
    }

    /// Generate a new monotonic timestamp for a local write.
    pub fn now(&self) -> TemporalAnchor {
        let wall = wall_clock_ms();
        let mut state = self.state.lock().expect("HLC mutex poisoned");

        let new_physical = wall.max(state.physical_ms);
        let new_logical = if new_physical > state.physical_ms {
            0
        } else {
            state.logical + 1
        };

        state.physical_ms = new_physical;
        state.logical = new_logical;

        TemporalAnchor::new(new_physical, new_logical)
    }

    /// Advance the clock past a received anchor.
    pub fn update(&self, received: &TemporalAnchor) -> TemporalAnchor {
        let wall = wall_clock_ms();
        let mut state = self.state.lock().expect("HLC mutex poisoned");

        let new_physical = wall.max(state.physical_ms).max(received.physical_ms);

        let new_logical = if new_physical > state.physical_ms
            && new_physical > received.physical_ms
        {
            0
        } else if new_physical == state.physical_ms && new_physical == received.physical_ms {
            state.logical.max(received.logical) + 1
        } else if new_physical == state.physical_ms {
            state.logical + 1
        } else {
            received.logical + 1
        };

        state.physical_ms = new_physical;
        state.logical = new_logical;

        TemporalAnchor::new(new_physical, new_logical)
    }
}

impl Default for HybridLogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_across_rapid_calls() {
        let hlc = HybridLogicalClock::new();
        let mut prev = hlc.now();
        for _ in 0..1000 {
            let next = hlc.now();
            assert!(next > prev, "HLC must be strictly monotonic: {prev:?} >= {next:?}");
            prev = next;
        }
    }

    #[test]
    fn logical_increments_within_same_physical() {
        let hlc = HybridLogicalClock::new();
        {
            let mut state = hlc.state.lock().unwrap();
            state.physical_ms = u64::MAX;
            state.logical = 0;
        }
        let t1 = hlc.now();
        let t2 = hlc.now();
        assert_eq!(t1.physical_ms, u64::MAX);
        assert_eq!(t1.logical, 1);
        assert_eq!(t2.logical, 2);
    }

    #[test]
    fn update_advances_past_received() {
        let hlc = HybridLogicalClock::new();
        let remote = TemporalAnchor::new(u64::MAX - 1, 10);
        let updated = hlc.update(&remote);
        assert!(updated > remote);
        // Subsequent local writes stay ahead of the remote anchor.
        assert!(hlc.now() > remote);
    }

    #[test]
    fn update_when_all_three_tie() {
        let hlc = HybridLogicalClock::new();
        {
            let mut state = hlc.state.lock().unwrap();
            state.physical_ms = u64::MAX;
            state.logical = 5;
        }
        let updated = hlc.update(&TemporalAnchor::new(u64::MAX, 10));
        assert_eq!(updated.physical_ms, u64::MAX);
        assert_eq!(updated.logical, 11);
    }

    #[test]
    fn concurrent_now_calls_are_unique() {
        use std::sync::Arc;
        use std::thread;

        let hlc = Arc::new(HybridLogicalClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hlc = Arc::clone(&hlc);
                thread::spawn(move || (0..100).map(|_| hlc.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<TemporalAnchor> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let len = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len, "all timestamps must be unique across threads");
    }
}
