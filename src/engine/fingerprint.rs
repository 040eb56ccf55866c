//! At-most-one-build-per-fingerprint dedup. See spec.md §4.3 "Concurrency
//! contract" and §8 "Fingerprint" testable property: "under concurrent
//! submission of the same (level, block_index) twice, only one compression
//! job runs; the second caller observes the first's result."

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::dimension::Index5D;

/// The pair identifying one unit of compression/downsample work.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Fingerprint {
    pub level: u32,
    pub block_index: Index5D,
}

/// The outcome a build eventually resolves to — cheap to clone so every
/// waiter on a fingerprint can receive its own copy.
pub type BuildOutcome = Result<(), String>;

enum SlotState {
    Building,
    Done(BuildOutcome),
}

struct Slot {
    state: Mutex<SlotState>,
    condvar: Condvar,
}

/// Deduplicates concurrent submissions of the same [`Fingerprint`].
#[derive(Clone, Default)]
pub struct FingerprintRegistry {
    inflight: Arc<Mutex<HashMap<Fingerprint, Arc<Slot>>>>,
}

/// What the caller of [`FingerprintRegistry::begin`] should do next.
pub enum Role {
    /// This caller is the first to submit this fingerprint and must
    /// actually perform the build, then call [`LeaderGuard::finish`].
    Leader(LeaderGuard),
    /// Another caller is already building this fingerprint; this is the
    /// outcome it eventually produced.
    Follower(BuildOutcome),
}

pub struct LeaderGuard {
    registry: FingerprintRegistry,
    fingerprint: Fingerprint,
    slot: Arc<Slot>,
}

impl LeaderGuard {
    /// Records the build's outcome, wakes every follower waiting on it, and
    /// removes the fingerprint from the in-flight table so a later rebuild
    /// (e.g. a retry) is possible.
    pub fn finish(self, outcome: BuildOutcome) {
        {
            let mut state = self.slot.state.lock().expect("fingerprint slot poisoned");
            *state = SlotState::Done(outcome);
        }
        self.slot.condvar.notify_all();

        let mut inflight = self.registry.inflight.lock().expect("fingerprint registry poisoned");
        inflight.remove(&self.fingerprint);
    }
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers intent to build `fingerprint`. Exactly one caller per
    /// currently-in-flight fingerprint receives [`Role::Leader`]; every
    /// other concurrent caller blocks until the leader finishes and
    /// receives [`Role::Follower`] with the leader's outcome.
    pub fn begin(&self, fingerprint: Fingerprint) -> Role {
        let slot = {
            let mut inflight = self.inflight.lock().expect("fingerprint registry poisoned");
            match inflight.get(&fingerprint) {
                Some(existing) => {
                    let slot = Arc::clone(existing);
                    drop(inflight);
                    return Role::Follower(Self::wait(&slot));
                }
                None => {
                    let slot = Arc::new(Slot { state: Mutex::new(SlotState::Building), condvar: Condvar::new() });
                    inflight.insert(fingerprint, Arc::clone(&slot));
                    slot
                }
            }
        };

        Role::Leader(LeaderGuard { registry: self.clone(), fingerprint, slot })
    }

    fn wait(slot: &Arc<Slot>) -> BuildOutcome {
        let mut state = slot.state.lock().expect("fingerprint slot poisoned");
        loop {
            match &*state {
                SlotState::Done(outcome) => return outcome.clone(),
                SlotState::Building => {
                    state = slot.condvar.wait(state).expect("fingerprint slot poisoned");
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn second_submitter_observes_first_result_without_rebuilding() {
        let registry = FingerprintRegistry::new();
        let build_count = Arc::new(AtomicUsize::new(0));
        let fingerprint = Fingerprint { level: 0, block_index: Index5D::ZERO };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let build_count = Arc::clone(&build_count);
                thread::spawn(move || match registry.begin(fingerprint) {
                    Role::Leader(guard) => {
                        build_count.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(5));
                        guard.finish(Ok(()));
                        Ok(())
                    }
                    Role::Follower(outcome) => outcome,
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(build_count.load(Ordering::SeqCst), 1, "exactly one leader must perform the build");
    }

    #[test]
    fn distinct_fingerprints_do_not_collapse() {
        let registry = FingerprintRegistry::new();
        let a = Fingerprint { level: 0, block_index: Index5D::ZERO };
        let b = Fingerprint { level: 0, block_index: Index5D::new(1, 0, 0, 0, 0) };

        let role_a = registry.begin(a);
        let role_b = registry.begin(b);
        assert!(matches!(role_a, Role::Leader(_)));
        assert!(matches!(role_b, Role::Leader(_)));
    }
}
