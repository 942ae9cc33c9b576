//! Graduated segment pool for scatter reads.
//!
//! The pool holds one slot per entry of the size table, smallest first.
//! A vectored read fills the slots front to back, so a packet of `n` bytes
//! always occupies a prefix of the slots. Small packets take only the first
//! (smallest) segment; large packets span progressively larger ones.
//!
//! Slot invariants:
//! - empty slots only ever form a prefix of the table;
//! - an empty slot is reallocated with the capacity its position dictates;
//! - a consumed segment moves into exactly one [`Packet`] and the slot is
//!   marked empty, so no segment is shared between packets.

use std::io::IoSliceMut;

use bytes::BytesMut;

use super::packet::Packet;
use crate::error::{Error, Result};

/// Default shape of the buffer used to read packets from the descriptor.
pub const DEFAULT_BUFFER_SIZES: [usize; 10] =
    [128, 256, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];

/// Segment pool feeding one dispatcher.
///
/// Not shared across dispatchers and not internally locked; access is
/// single-threaded by construction.
#[derive(Debug)]
pub struct BufferPool {
    /// Segment slots; `None` marks an empty slot.
    views: Vec<Option<BytesMut>>,
    /// Capacity of each slot. Immutable.
    sizes: Vec<usize>,
}

impl BufferPool {
    /// Create an empty pool with the given size table.
    pub fn new(sizes: &[usize]) -> Self {
        Self {
            views: vec![None; sizes.len()],
            sizes: sizes.to_vec(),
        }
    }

    /// Create a pool with [`DEFAULT_BUFFER_SIZES`].
    pub fn with_default_sizes() -> Self {
        Self::new(&DEFAULT_BUFFER_SIZES)
    }

    /// The size table.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Build the scatter descriptors for the next read.
    ///
    /// Empty slots at the front are allocated first; allocation stops at the
    /// first slot that still holds an unconsumed segment, which is handed out
    /// unchanged together with every slot after it.
    pub fn prepare_read(&mut self) -> Vec<IoSliceMut<'_>> {
        for (slot, &size) in self.views.iter_mut().zip(&self.sizes) {
            if slot.is_some() {
                break;
            }
            *slot = Some(BytesMut::zeroed(size));
        }

        self.views
            .iter_mut()
            .flatten()
            .map(|view| IoSliceMut::new(&mut view[..]))
            .collect()
    }

    /// Pull exactly `n` bytes out of the front of the pool as a [`Packet`].
    ///
    /// Contributing segments are moved into the packet and their slots
    /// marked empty; the last one is capped so the total equals `n`.
    /// Trailing segments stay in place for the next read. `n == 0` yields
    /// an empty packet and leaves the pool untouched.
    pub fn consume(&mut self, n: usize) -> Result<Packet> {
        if n == 0 {
            return Ok(Packet::default());
        }

        let capacity = self.pooled_bytes();
        if n > capacity {
            return Err(Error::BufferOverrun {
                requested: n,
                capacity,
            });
        }

        let mut chunks = Vec::new();
        let mut remaining = n;
        for slot in &mut self.views {
            // Slots emptied by an earlier consume form a prefix.
            let Some(mut view) = slot.take() else {
                continue;
            };
            if view.len() >= remaining {
                view.truncate(remaining);
                chunks.push(view.freeze());
                break;
            }
            remaining -= view.len();
            chunks.push(view.freeze());
        }

        Ok(Packet::from_chunks(chunks))
    }

    /// Free every allocated segment.
    pub fn release(&mut self) {
        for slot in &mut self.views {
            *slot = None;
        }
    }

    /// Sum of valid bytes across all allocated segments.
    pub fn pooled_bytes(&self) -> usize {
        self.views.iter().flatten().map(BytesMut::len).sum()
    }

    /// Number of slots currently holding a segment.
    pub fn allocated_slots(&self) -> usize {
        self.views.iter().filter(|v| v.is_some()).count()
    }

    #[cfg(test)]
    fn slot_ptr(&self, index: usize) -> Option<*const u8> {
        self.views[index].as_ref().map(|v| v.as_ptr())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_default_sizes()
    }
}
