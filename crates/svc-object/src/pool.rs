//! Block-reserving pool for metadata records.
//!
//! Metadata is attached and removed on almost every command, and every record
//! has the same shape. Records live in a [`Slab`]: freed slots are reused by
//! the next allocation and capacity only ever grows in whole blocks, so the
//! add/delete cycle does not touch the general-purpose allocator.

use slab::Slab;
use tracing::debug;

use crate::metadata::Metadata;

/// Index of a record inside a [`MetadataPool`].
pub type MetadataKey = usize;

/// Fixed-shape record pool.
#[derive(Debug)]
pub struct MetadataPool {
    records: Slab<Metadata>,
    block: usize,
}

impl MetadataPool {
    /// Create a pool with one block of `block` records reserved.
    pub fn new(block: usize) -> Self {
        let block = block.max(1);
        Self {
            records: Slab::with_capacity(block),
            block,
        }
    }

    /// Store a record, growing by one block if every slot is taken.
    pub fn alloc(&mut self, record: Metadata) -> MetadataKey {
        if self.records.len() == self.records.capacity() {
            self.records.reserve(self.block);
            debug!(
                capacity = self.records.capacity(),
                in_use = self.records.len(),
                "metadata pool grew"
            );
        }
        self.records.insert(record)
    }

    /// Return a record's slot to the pool, handing back its contents.
    pub fn free(&mut self, key: MetadataKey) -> Option<Metadata> {
        self.records.try_remove(key)
    }

    /// Borrow a record.
    pub fn get(&self, key: MetadataKey) -> Option<&Metadata> {
        self.records.get(key)
    }

    /// Records currently allocated.
    pub fn in_use(&self) -> usize {
        self.records.len()
    }

    /// Slots reserved, used or not.
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }
}
