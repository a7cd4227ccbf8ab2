//! Lock-free single-producer / single-consumer byte ring.
//!
//! `RingBuffer::with_capacity` returns a [`Producer`] for the record worker
//! and a [`Consumer`] for whoever drains captured audio. The two halves share
//! a heap slab and two monotonic cursors:
//!
//! - `write_index` is advanced only by the producer, with a release store
//!   after the bytes are in place;
//! - `read_index` is advanced only by the consumer, with a release store
//!   after the bytes have been copied out.
//!
//! Cursors use wrapping arithmetic and are reduced modulo the capacity only
//! when a slot is touched, so `write_index - read_index` is always the fill
//! level and never exceeds the capacity.
//!
//! # Constraints
//!
//! - Capacity is rounded up to a power of two so the cursor wrap at
//!   `usize::MAX` stays consistent with the slot mask.
//! - Pushes are all-or-nothing: a chunk that does not fit is rejected and
//!   the buffer is left unchanged.

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// A push did not fit; nothing was written.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ring buffer full: {requested} bytes requested, {free} free")]
pub struct Full {
    /// Bytes offered.
    pub requested: usize,
    /// Bytes that were free at the time.
    pub free: usize,
}

/// Shared storage behind a [`Producer`] / [`Consumer`] pair.
pub struct RingBuffer {
    slots: Box<[UnsafeCell<u8>]>,
    mask: usize,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

// SAFETY: slots in `[read_index, write_index)` are only read by the consumer
// and slots outside it are only written by the producer. Ownership of a slot
// passes between them through the release/acquire pairs on the cursors, and
// each half is a unique (non-Clone) handle.
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocate a ring of at least `capacity` bytes (rounded up to a power of
    /// two, minimum 1) and split it into its two halves.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Producer, Consumer) {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        let ring = Arc::new(Self {
            slots,
            mask: capacity - 1,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        });
        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer { ring },
        )
    }

    /// Total bytes the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Bytes currently buffered (a snapshot).
    #[must_use]
    pub fn len(&self) -> usize {
        let w = self.write_index.load(Ordering::Acquire);
        let r = self.read_index.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, cursor: usize) -> *mut u8 {
        self.slots[cursor & self.mask].get()
    }
}

impl core::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Writing half. Exactly one exists per ring.
#[derive(Debug)]
pub struct Producer {
    ring: Arc<RingBuffer>,
}

impl Producer {
    /// Append `data` in full, or reject it.
    ///
    /// # Errors
    ///
    /// [`Full`] if fewer than `data.len()` bytes are free. The ring is not
    /// modified.
    pub fn push(&mut self, data: &[u8]) -> Result<(), Full> {
        let ring = &*self.ring;
        // Only this half stores `write_index`.
        let w = ring.write_index.load(Ordering::Relaxed);
        let r = ring.read_index.load(Ordering::Acquire);
        let free = ring.capacity() - w.wrapping_sub(r);
        if data.len() > free {
            return Err(Full {
                requested: data.len(),
                free,
            });
        }
        for (i, &byte) in data.iter().enumerate() {
            // SAFETY: cursor `w + i` lies outside `[r, w)`, so the consumer
            // is not reading this slot, and no other producer exists.
            unsafe { ring.slot(w.wrapping_add(i)).write(byte) };
        }
        ring.write_index
            .store(w.wrapping_add(data.len()), Ordering::Release);
        Ok(())
    }

    /// Bytes that can be pushed right now.
    #[must_use]
    pub fn free(&self) -> usize {
        self.ring.capacity() - self.ring.len()
    }

    /// The shared ring.
    #[must_use]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}

/// Reading half. Exactly one exists per ring.
#[derive(Debug)]
pub struct Consumer {
    ring: Arc<RingBuffer>,
}

impl Consumer {
    /// Copy up to `out.len()` buffered bytes into `out`, returning the count.
    ///
    /// Never blocks; returns 0 when the ring is empty.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let ring = &*self.ring;
        // Only this half stores `read_index`.
        let r = ring.read_index.load(Ordering::Relaxed);
        let w = ring.write_index.load(Ordering::Acquire);
        let n = out.len().min(w.wrapping_sub(r));
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            // SAFETY: cursor `r + i` lies inside `[r, w)`, published by the
            // producer's release store, and the producer will not reuse it
            // until `read_index` moves past it.
            *slot = unsafe { ring.slot(r.wrapping_add(i)).read() };
        }
        ring.read_index.store(r.wrapping_add(n), Ordering::Release);
        n
    }

    /// Bytes available to pop.
    #[must_use]
    pub fn available(&self) -> usize {
        self.ring.len()
    }

    /// The shared ring.
    #[must_use]
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}
