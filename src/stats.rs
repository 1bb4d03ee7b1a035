//! Request counters.

use std::cell::Cell;

/// A single-threaded counter.
#[derive(Debug, Default)]
pub(crate) struct Counter(Cell<u64>);

impl Counter {
    pub(crate) fn incr(&self) {
        self.add(1);
    }

    pub(crate) fn add(&self, n: u64) {
        self.0.set(self.0.get().wrapping_add(n));
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.get()
    }
}

/// Aggregate request statistics.
///
/// The per-kind counts may sum to more than the number of served requests:
/// a database check against upstream can fail and the request still gets
/// redirected upstream in the hope the failure was transient.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub(crate) served_total: Counter,
    pub(crate) served_upstream: Counter,
    pub(crate) served_locally: Counter,
    pub(crate) not_modified: Counter,
    pub(crate) failed_upstream: Counter,
    pub(crate) unknown_repo_requests: Counter,
}

/// Formats a byte count with base-1000 units, widening the precision one
/// digit per unit step.
pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 9] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size > 1000.0 && unit + 1 < UNITS.len() {
        size /= 1000.0;
        unit += 1;
    }
    format!("{:.*} {}", unit, size, UNITS[unit])
}
