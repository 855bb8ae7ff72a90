use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use types::StopReason;

/// Cooperative cancellation flag shared between the caller and the search phases.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Relaxed)
    }

    pub fn cancel(&self) {
        self.0.store(true, Relaxed)
    }
}

/// Wall-clock budget for one request: the configured search budget and an
/// optional caller deadline, whichever comes first.
#[derive(Clone, Debug)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
    cancel: CancelToken,
}

impl Budget {
    pub fn new(limit: Duration, caller_deadline: Option<Instant>, cancel: CancelToken) -> Self {
        let started = Instant::now();
        let own = started.checked_add(limit).unwrap_or_else(far_future);
        let deadline = match caller_deadline {
            Some(d) if d < own => d,
            _ => own,
        };
        Self {
            started,
            deadline,
            cancel,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::from_secs(60 * 60 * 24 * 365), None, CancelToken::new())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Polled by the search loops at a bounded interval.
    pub fn check(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(StopReason::Deadline)
        } else {
            None
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}
