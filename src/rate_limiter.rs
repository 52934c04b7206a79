//! The 1-second sliding rate window (spec §4.3). Deliberately not a strict
//! token bucket: the window resets on the first call that lands at least a
//! second after its start, not on a fixed wall-clock boundary (spec §9: "this
//! is intentional, preserve this semantics").

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

const WINDOW: Duration = Duration::from_millis(1000);

/// Tracks admissions-per-second and parks resource ids that exceed the limit
/// until the window clears. Owned exclusively by the Dispatcher task; the
/// `timer` handle is how the window's own clock re-enters that task's mailbox
/// (see `Dispatcher`'s `RateWindowElapsed` handling) rather than mutating
/// state from a separate task.
pub(crate) struct RateLimiter {
    rate_limit: Option<u32>,
    counter: u32,
    checkpoint: Option<Instant>,
    parked: VecDeque<u64>,
    timer: Option<JoinHandle<()>>,
}

impl RateLimiter {
    pub(crate) fn new(rate_limit: Option<u32>) -> Self {
        RateLimiter { rate_limit, counter: 0, checkpoint: None, parked: VecDeque::new(), timer: None }
    }

    /// Charge one dispatch against the window (spec §4.3 step 2: "record
    /// counter++ at dispatch time"). A no-op when no `rate_limit` is set.
    pub(crate) fn record_dispatch(&mut self) {
        if self.rate_limit.is_none() {
            return;
        }
        self.counter += 1;
        self.checkpoint.get_or_insert_with(Instant::now);
    }

    /// Ask whether `resource_id` may rejoin the available set right now.
    /// Returns `true` if admitted immediately; `false` if parked (the
    /// Dispatcher must wait for a `RateWindowElapsed`-triggered `clear()`
    /// before treating the resource as available).
    ///
    /// `on_timer_needed` is invoked with the delay to arm a timer for, if one
    /// isn't already armed; the caller (`Dispatcher`) owns spawning it so the
    /// resulting `JoinHandle` can be stored here via `set_timer`.
    pub(crate) fn admit(&mut self, resource_id: u64) -> RateAdmission {
        let Some(limit) = self.rate_limit else {
            return RateAdmission::Admitted;
        };

        if self.counter < limit {
            return RateAdmission::Admitted;
        }

        self.parked.push_back(resource_id);
        let checkpoint = self.checkpoint.unwrap_or_else(Instant::now);
        let elapsed = checkpoint.elapsed();
        if elapsed >= WINDOW {
            RateAdmission::ClearNow
        } else if self.timer.is_none() {
            RateAdmission::ArmTimer(WINDOW - elapsed)
        } else {
            RateAdmission::Parked
        }
    }

    pub(crate) fn set_timer(&mut self, handle: JoinHandle<()>) {
        self.timer = Some(handle);
    }

    /// Reset the window and return every parked resource id, in FIFO order.
    pub(crate) fn clear(&mut self) -> Vec<u64> {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        self.counter = 0;
        self.checkpoint = None;
        self.parked.drain(..).collect()
    }

    /// Cancel the armed timer without clearing parked state (pool close).
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// Outcome of `RateLimiter::admit`.
pub(crate) enum RateAdmission {
    /// Under the limit: the resource is available immediately.
    Admitted,
    /// Over the limit, but the window is already stale: clear it now.
    ClearNow,
    /// Over the limit, no timer armed yet: the caller should arm one for this
    /// delay and hand the handle back via `set_timer`.
    ArmTimer(Duration),
    /// Over the limit, a timer is already armed: nothing more to do.
    Parked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_rate_limit_always_admits() {
        let mut rl = RateLimiter::new(None);
        rl.record_dispatch();
        assert!(matches!(rl.admit(1), RateAdmission::Admitted));
    }

    #[test]
    fn under_limit_admits_immediately() {
        let mut rl = RateLimiter::new(Some(2));
        rl.record_dispatch();
        assert!(matches!(rl.admit(1), RateAdmission::Admitted));
    }

    #[test]
    fn over_limit_parks_and_requests_timer() {
        let mut rl = RateLimiter::new(Some(1));
        rl.record_dispatch();
        rl.record_dispatch();
        assert!(matches!(rl.admit(7), RateAdmission::ArmTimer(_)));
    }

    #[test]
    fn clear_drains_parked_in_fifo_order() {
        let mut rl = RateLimiter::new(Some(1));
        rl.record_dispatch();
        rl.record_dispatch();
        let _ = rl.admit(1);
        let _ = rl.admit(2);
        let _ = rl.admit(3);
        assert_eq!(rl.clear(), vec![1, 2, 3]);
    }
}
