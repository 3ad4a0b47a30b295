//! Cooperative cancellation shared between a caller and every search it starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Flag {
    cancelled: AtomicBool,
    parent: Option<Arc<Flag>>,
}

impl Flag {
    fn is_set(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|parent| parent.is_set())
    }
}

/// Cheaply clonable cancellation signal.
///
/// A child token observes its parent, so cancelling the parent stops every
/// search holding a child, while cancelling a child leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<Flag>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_set()
    }

    pub fn child_token(&self) -> CancellationToken {
        CancellationToken {
            flag: Arc::new(Flag {
                cancelled: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.flag)),
            }),
        }
    }

    /// Cancels this token when the returned guard is dropped.
    pub fn drop_guard(self) -> CancelOnDrop {
        CancelOnDrop(self)
    }
}

#[derive(Debug)]
pub struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
