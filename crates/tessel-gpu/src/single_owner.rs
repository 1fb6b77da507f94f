//! Debug-time thread-affinity guard.
//!
//! A [`Context`](crate::Context) and each [`Recorder`](crate::Recorder) may be
//! used from one thread at a time. Every public entry point enters the
//! object's [`SingleOwner`]; in debug builds entering while another thread is
//! inside panics. Release builds compile the guard away and the rule is a
//! documented precondition only.

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
#[cfg(debug_assertions)]
use std::sync::Arc;

#[cfg(debug_assertions)]
fn current_thread_token() -> u64 {
    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}

#[cfg(debug_assertions)]
#[derive(Debug, Default)]
struct OwnerState {
    /// Token of the thread currently inside, 0 when idle.
    owner: AtomicU64,
    /// Re-entrancy depth of the owning thread.
    depth: AtomicU32,
}

/// Thread-affinity token carried by single-threaded objects.
#[derive(Debug, Default)]
pub struct SingleOwner {
    #[cfg(debug_assertions)]
    state: Arc<OwnerState>,
}

impl SingleOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the calling thread as inside the guarded object until the guard drops.
    ///
    /// Re-entry from the owning thread is allowed.
    #[track_caller]
    pub fn enter(&self) -> SingleOwnerGuard {
        #[cfg(debug_assertions)]
        {
            let me = current_thread_token();
            match self
                .state
                .owner
                .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {}
                Err(current) if current == me => {}
                Err(current) => panic!(
                    "single-owner violation: object entered from thread token {me} \
                     while thread token {current} is using it"
                ),
            }
            self.state.depth.fetch_add(1, Ordering::Relaxed);
            SingleOwnerGuard {
                state: Arc::clone(&self.state),
            }
        }
        #[cfg(not(debug_assertions))]
        SingleOwnerGuard {}
    }
}

/// Scope of one guarded call.
#[must_use = "the guard only protects while it is alive"]
pub struct SingleOwnerGuard {
    #[cfg(debug_assertions)]
    state: Arc<OwnerState>,
}

#[cfg(debug_assertions)]
impl Drop for SingleOwnerGuard {
    fn drop(&mut self) {
        if self.state.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.state.owner.store(0, Ordering::Release);
        }
    }
}
