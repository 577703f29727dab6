//! Per-frame upload pools for vertex, instance and index data, and a small
//! cache of CPU scratch buffers.
//!
//! A [`BufferAllocPool`] hands out ranges of large driver buffers. Data is
//! staged on the CPU and written to the driver in one call per block when
//! the pool is submitted. [`reset`](BufferAllocPool::reset) at the end of a
//! frame makes the blocks available again without deleting them.

use std::sync::Arc;

use crate::driver::{BufferUsage, Driver, ObjectKind};
use crate::object::GpuObject;
use crate::render_thread::RenderThread;

/// Where an appended run of data ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSlice {
    /// Native buffer name.
    pub buffer: u32,
    /// Byte offset of the first element.
    pub offset: usize,
    /// Byte length.
    pub size: usize,
}

#[derive(Debug)]
struct Block {
    buffer: GpuObject,
    size: usize,
    staging: Vec<u8>,
    /// Staged bytes already written to the driver.
    submitted: usize,
}

/// Sub-allocates per-frame data from a growing list of driver buffers.
#[derive(Debug)]
pub struct BufferAllocPool {
    render_thread: Arc<RenderThread>,
    usage: BufferUsage,
    block_size: usize,
    blocks: Vec<Block>,
    /// First block that may still have room.
    current: usize,
}

impl BufferAllocPool {
    /// An empty pool whose blocks are at least `block_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is 0.
    #[must_use]
    pub fn new(render_thread: Arc<RenderThread>, usage: BufferUsage, block_size: usize) -> Self {
        assert!(block_size > 0, "buffer pool block size is 0");
        Self {
            render_thread,
            usage,
            block_size,
            blocks: Vec::new(),
            current: 0,
        }
    }

    /// The binding target of every block.
    #[must_use]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Number of driver buffers owned.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes handed out since the last reset.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.blocks.iter().map(|b| b.staging.len()).sum()
    }

    /// Copies `data` into the pool, aligned to the element size so the
    /// offset can be expressed in elements.
    ///
    /// Returns `None` for empty data or if the driver can't create a buffer.
    ///
    /// # Panics
    ///
    /// Panics off the render thread.
    pub fn append<T: bytemuck::Pod>(&mut self, driver: &dyn Driver, data: &[T]) -> Option<PoolSlice> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return None;
        }
        let align = std::mem::size_of::<T>().max(1);

        let index = match self.find_space(bytes.len(), align) {
            Some(index) => index,
            None => self.add_block(driver, bytes.len())?,
        };
        let block = &mut self.blocks[index];
        let offset = block.staging.len().next_multiple_of(align);
        block.staging.resize(offset, 0);
        block.staging.extend_from_slice(bytes);
        Some(PoolSlice {
            buffer: block.buffer.id(),
            offset,
            size: bytes.len(),
        })
    }

    fn find_space(&mut self, size: usize, align: usize) -> Option<usize> {
        while let Some(block) = self.blocks.get(self.current) {
            let offset = block.staging.len().next_multiple_of(align);
            if offset + size <= block.size {
                return Some(self.current);
            }
            self.current += 1;
        }
        None
    }

    fn add_block(&mut self, driver: &dyn Driver, size: usize) -> Option<usize> {
        let size = size.max(self.block_size);
        let buffer = GpuObject::new(Arc::clone(&self.render_thread), ObjectKind::Buffer);
        let id = buffer.name(driver)?;
        driver.buffer_storage(id, self.usage, size);
        tracing::debug!(usage = ?self.usage, id, size, "new pool block");
        self.blocks.push(Block {
            buffer,
            size,
            staging: Vec::with_capacity(size),
            submitted: 0,
        });
        self.current = self.blocks.len() - 1;
        Some(self.current)
    }

    /// Writes everything staged since the last submit to the driver.
    pub fn submit(&mut self, driver: &dyn Driver) {
        for block in &mut self.blocks {
            if block.submitted < block.staging.len() {
                let Some(id) = block.buffer.name(driver) else { continue };
                driver.buffer_sub_data(id, self.usage, block.submitted, &block.staging[block.submitted..]);
                block.submitted = block.staging.len();
            }
        }
    }

    /// Makes all blocks empty again. Unsubmitted data is dropped.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.staging.clear();
            block.submitted = 0;
        }
        self.current = 0;
    }

    /// Deletes every block now.
    pub fn release(&mut self, driver: &dyn Driver) {
        for block in self.blocks.drain(..) {
            block.buffer.close(driver);
        }
        self.current = 0;
    }

    /// Forgets every block without driver calls.
    pub fn discard(&mut self) {
        for block in self.blocks.drain(..) {
            block.buffer.abandon();
        }
        self.current = 0;
    }
}

/// A bounded free list of CPU byte buffers for repacking uploads.
#[derive(Debug)]
pub struct CpuBufferCache {
    capacity: usize,
    buffers: Vec<Vec<u8>>,
}

impl CpuBufferCache {
    /// Keeps at most `capacity` idle buffers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Vec::with_capacity(capacity),
        }
    }

    /// A zeroed buffer of `size` bytes, reusing the smallest idle one that
    /// fits.
    pub fn acquire(&mut self, size: usize) -> Vec<u8> {
        let best = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.capacity() >= size)
            .min_by_key(|(_, b)| b.capacity())
            .map(|(i, _)| i);
        let mut buffer = best.map_or_else(|| Vec::with_capacity(size), |i| self.buffers.swap_remove(i));
        buffer.clear();
        buffer.resize(size, 0);
        buffer
    }

    /// Returns a buffer for reuse. Dropped if the cache is full.
    pub fn recycle(&mut self, buffer: Vec<u8>) {
        if self.buffers.len() < self.capacity {
            self.buffers.push(buffer);
        }
    }

    /// Idle buffers held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no idle buffer is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Frees every idle buffer.
    pub fn release_all(&mut self) {
        self.buffers.clear();
    }
}
