use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::robot::{Command, Observation};

#[derive(Debug, Default)]
struct Latched {
    command: Command,
    command_seq: u64,
    scan: Option<Arc<Observation>>,
    scan_seq: u64,
}

/// A consistent view of the inputs, taken under a single lock.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub command: Command,

    /// How many commands have been latched so far, 0 if none.
    pub command_seq: u64,

    /// The latest scan and its latch sequence number (starting at 1).
    pub scan: Option<(u64, Arc<Observation>)>,
}

/// Shared handoff point between the input producers and the filter. Producers on any thread
/// replace the latest value; the filter copies a complete command/scan pair at the start of a
/// cycle. Cloning gives another handle to the same latch.
#[derive(Debug, Clone, Default)]
pub struct InputHandle {
    inner: Arc<Mutex<Latched>>,
}

impl InputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Latched> {
        // the latched values are plain data that is always written completely, so a panic in
        // another holder cannot leave them half updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the command used by the following cycles.
    pub fn latch_command(&self, command: Command) {
        let mut latched = self.lock();
        latched.command = command;
        latched.command_seq += 1;
    }

    /// Replaces the latest scan.
    pub fn latch_scan(&self, scan: Arc<Observation>) {
        let mut latched = self.lock();
        latched.scan = Some(scan);
        latched.scan_seq += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let latched = self.lock();
        Snapshot {
            command: latched.command,
            command_seq: latched.command_seq,
            scan: latched
                .scan
                .as_ref()
                .map(|s| (latched.scan_seq, Arc::clone(s))),
        }
    }
}
