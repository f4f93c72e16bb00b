// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Process-wide slab buffer pool
//!
//! Copy paths borrow a fixed-size buffer for the duration of one object and
//! hand it back when the [`SlabBuf`] is dropped. Buffers are grouped into
//! power-of-two size classes between [`PAGE_SIZE`] and [`MAX_BUF_SIZE`].

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

/// Smallest size class
pub const PAGE_SIZE: usize = 4 * 1024;

/// Largest size class
pub const MAX_BUF_SIZE: usize = 128 * 1024;

/// Size handed out when the object size is unknown
pub const DEFAULT_BUF_SIZE: usize = 32 * 1024;

/// Free buffers retained per size class
const MAX_FREE_PER_CLASS: usize = 64;

const SIZE_CLASSES: [usize; 6] = [
    PAGE_SIZE,
    8 * 1024,
    16 * 1024,
    DEFAULT_BUF_SIZE,
    64 * 1024,
    MAX_BUF_SIZE,
];

lazy_static! {
    static ref POOL: SlabPool = SlabPool::new();
}

/// Pool statistics summed over all size classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers ever allocated from the heap
    pub allocated: u64,
    /// Buffers currently checked out
    pub in_use: u64,
    /// Buffers sitting in free lists
    pub free: u64,
}

struct Slab {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicU64,
    in_use: AtomicU64,
}

impl Slab {
    fn new(size: usize) -> Self {
        Self {
            size,
            free: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            in_use: AtomicU64::new(0),
        }
    }

    fn take(&self) -> Vec<u8> {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        recycled.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.size]
        })
    }

    fn give_back(&self, buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < MAX_FREE_PER_CLASS {
            free.push(buf);
        }
    }

    fn free_len(&self) -> u64 {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }
}

/// A set of size-class slabs.
pub struct SlabPool {
    slabs: Vec<Slab>,
}

impl SlabPool {
    fn new() -> Self {
        Self {
            slabs: SIZE_CLASSES.iter().map(|&size| Slab::new(size)).collect(),
        }
    }

    fn class_for(&self, size: usize) -> &Slab {
        self.slabs
            .iter()
            .find(|slab| slab.size >= size)
            .unwrap_or(&self.slabs[self.slabs.len() - 1])
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for slab in &self.slabs {
            stats.allocated += slab.allocated.load(Ordering::Relaxed);
            stats.in_use += slab.in_use.load(Ordering::Relaxed);
            stats.free += slab.free_len();
        }
        stats
    }
}

/// A buffer on loan from the pool; returned on drop.
pub struct SlabBuf {
    buf: Vec<u8>,
    slab: &'static Slab,
}

impl SlabBuf {
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Deref for SlabBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for SlabBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for SlabBuf {
    fn drop(&mut self) {
        self.slab.give_back(std::mem::take(&mut self.buf));
    }
}

/// Borrow a buffer of the default size.
pub fn alloc() -> SlabBuf {
    alloc_size(DEFAULT_BUF_SIZE as i64)
}

/// Borrow a buffer sized for an object of `size` bytes.
///
/// Unknown (negative) sizes get [`DEFAULT_BUF_SIZE`]; anything above
/// [`MAX_BUF_SIZE`] is capped.
pub fn alloc_size(size: i64) -> SlabBuf {
    let pool: &'static SlabPool = &POOL;
    let slab = pool.class_for(buf_size_for(size));
    SlabBuf {
        buf: slab.take(),
        slab,
    }
}

/// Buffer size used for an object of `size` bytes.
pub fn buf_size_for(size: i64) -> usize {
    if size < 0 {
        DEFAULT_BUF_SIZE
    } else {
        (size as usize).clamp(PAGE_SIZE, MAX_BUF_SIZE)
    }
}

/// Snapshot of the process-wide pool.
pub fn stats() -> PoolStats {
    POOL.stats()
}
