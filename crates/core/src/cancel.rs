#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues tokens for one kind of request; issuing a token supersedes every
/// token issued before it.
#[derive(Clone, Debug, Default)]
pub struct RequestGate {
    latest: Arc<AtomicU64>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestToken {
        let id = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        RequestToken {
            id,
            latest: Arc::clone(&self.latest),
        }
    }

    /// Supersedes every outstanding token without issuing a new one.
    pub fn cancel_all(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Debug)]
pub struct RequestToken {
    id: u64,
    latest: Arc<AtomicU64>,
}

impl RequestToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.id
    }

    /// Hands `value` back only while this token is still the latest one.
    pub fn deliver<T>(&self, value: T) -> Option<T> {
        self.is_current().then_some(value)
    }
}
