// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Communicator traffic counters

use std::sync::atomic::{AtomicU64, Ordering};

use xcopy_types::CommStats;

/// Lock-free counters shared by a communicator and the readers it hands
/// out. Counters only ever grow.
#[derive(Debug, Default)]
pub struct Stats {
    obj_count: AtomicU64,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_objects(&self) {
        self.obj_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Negative sizes (unknown) are not counted.
    pub fn add_in(&self, n: i64) {
        if n > 0 {
            self.in_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn add_out(&self, n: u64) {
        self.out_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CommStats {
        CommStats {
            obj_count: self.obj_count.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.add_in(100);
        stats.add_in(-1);
        stats.add_out(40);
        stats.add_out(60);
        stats.inc_objects();
        assert_eq!(
            stats.snapshot(),
            CommStats {
                obj_count: 1,
                in_bytes: 100,
                out_bytes: 100,
            }
        );
    }
}
