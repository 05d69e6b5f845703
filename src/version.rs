//! Version tokens attached to every process-variable value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A totally ordered version token with a wall-clock projection.
///
/// Every call to [`Version::new`] mints a token strictly greater than all
/// tokens minted before it, in any thread. Ordering and equality are defined
/// by the mint order alone; the timestamp is informational (strict ordering
/// over versions implies ordering in time, but equal wall-clock instants do
/// not make versions equal). Copies of a token compare equal, which is how
/// two updates can share a version.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    serial: u64,
    time: SystemTime,
}

impl Version {
    /// Mints a fresh version, greater than every previously minted one.
    pub fn new() -> Version {
        Version {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            time: SystemTime::now(),
        }
    }

    /// The wall-clock instant at which this version was minted.
    pub fn time(&self) -> SystemTime {
        self.time
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::new()
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.serial.cmp(&other.serial)
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.serial)
    }
}
