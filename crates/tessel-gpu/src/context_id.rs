//! Process-wide identifiers for contexts, device connections and recorders.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use tessel_core::{Result, TesselError};

const INVALID_ID: u32 = 0;

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_RECORDER_ID: AtomicU32 = AtomicU32::new(1);

/// Take the next id from `counter`. Once the id space is used up the
/// counter stays put and every further call fails.
fn next_id(counter: &AtomicU32, kind: &str) -> Result<u32> {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        .map_err(|_| TesselError::Initialization(format!("{kind} ids exhausted")))
}

/// Identity of a [`Context`](crate::Context).
///
/// Ids are unique for the lifetime of the process and never reused. A
/// default-constructed id is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextId(u32);

impl ContextId {
    /// Allocate the next id.
    pub fn next() -> Result<Self> {
        next_id(&NEXT_CONTEXT_ID, "context").map(Self)
    }

    pub fn is_valid(self) -> bool {
        self.0 != INVALID_ID
    }

    /// Permanently invalidate this id value.
    pub fn make_invalid(&mut self) {
        self.0 = INVALID_ID;
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ctx#{}", self.0)
        } else {
            f.write_str("ctx#invalid")
        }
    }
}

/// Identity of one device connection ([`SharedContext`](crate::SharedContext)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn next() -> Result<Self> {
        next_id(&NEXT_DEVICE_ID, "device").map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Identity of a [`Recorder`](crate::Recorder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecorderId(u32);

impl RecorderId {
    pub fn next() -> Result<Self> {
        next_id(&NEXT_RECORDER_ID, "recorder").map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}
