//! Cooperative cancellation. See spec.md §5 "Cancellation and timeouts" and
//! §9's redesign flag: "Replace [signal handlers that call exit()] with a
//! cancellation token and a dedicated supervisor that translates OS signals
//! into a cancel request; the core itself never terminates the process."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable handle workers check between jobs. Setting it from any
/// thread (a signal supervisor, a timeout timer, an API caller) causes every
/// holder to observe `is_cancelled() == true` on their next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancelling_one_handle_is_observed_by_a_clone() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
