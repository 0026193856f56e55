use core::sync::atomic::{AtomicU64, Ordering};

/// A unique id for one broadcast operation on a fabric channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

static TRANSFER_COUNTER: AtomicU64 = AtomicU64::new(0);

impl TransferId {
    /// Get a new unique transfer id.
    pub fn new() -> Self {
        let val = TRANSFER_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(val)
    }

    /// Raw counter value, used in logs.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

/// A unique id for one launched run on a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

impl RunId {
    /// Get a new unique run id.
    pub fn new() -> Self {
        let val = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(val)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}
