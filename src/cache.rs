//! The page cache sits between the engines and the block device.
//! Every block the filesystem touches is materialized as a `Frame`; engines mutate frame bytes in
//! place, mark them dirty, and let the cache decide when to write them back.
//!
//! A frame is only evicted when nobody outside the cache holds it and its pin count is zero, so two
//! copies of the same block can never be live at once.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::trace;
use spin::{Mutex, MutexGuard};

use crate::{BlockDevice, Error, Result, BLOCK_SIZE};

pub struct Frame {
    block_id: u32,
    data: Mutex<Box<[u8; BLOCK_SIZE]>>,
    dirty: AtomicBool,
    pins: AtomicUsize,
    last_used: AtomicU64,
}

impl Frame {
    fn new(block_id: u32, data: Box<[u8; BLOCK_SIZE]>, dirty: bool) -> Self {
        Frame {
            block_id,
            data: Mutex::new(data),
            dirty: AtomicBool::new(dirty),
            pins: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    /// Locks the frame's bytes.
    pub fn data(&self) -> MutexGuard<'_, Box<[u8; BLOCK_SIZE]>> {
        self.data.lock()
    }

    /// Keeps the frame resident until the matching `unpin`.
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of unpinned frame {}", self.block_id);
    }

    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

pub struct PageCache<D: BlockDevice + ?Sized> {
    device: Arc<D>,
    frames: Mutex<BTreeMap<u32, Arc<Frame>>>,
    capacity: usize,
    clock: AtomicU64,
}

impl<D: BlockDevice + ?Sized> PageCache<D> {
    pub fn new(device: Arc<D>, capacity: usize) -> Self {
        PageCache {
            device,
            frames: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn num_blocks(&self) -> usize {
        self.device.num_blocks()
    }

    /// Number of frames currently resident.
    pub fn resident(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns the frame for `block_id`, reading it from the device on a miss.
    pub fn get(&self, block_id: u32) -> Result<Arc<Frame>> {
        self.check_block_id(block_id)?;
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&block_id) {
            self.touch(frame);
            return Ok(Arc::clone(frame));
        }

        let mut buf = Box::new([0u8; BLOCK_SIZE]);
        self.device.read_block(block_id, &mut buf)?;
        self.insert(&mut frames, Frame::new(block_id, buf, false))
    }

    /// Returns a zero-filled, dirty frame for `block_id` without reading the device.
    /// Used for blocks that were just allocated or are about to be overwritten whole.
    pub fn get_zeroed(&self, block_id: u32) -> Result<Arc<Frame>> {
        self.check_block_id(block_id)?;
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&block_id) {
            frame.data().fill(0);
            frame.dirty.store(true, Ordering::Release);
            self.touch(frame);
            return Ok(Arc::clone(frame));
        }

        self.insert(&mut frames, Frame::new(block_id, Box::new([0u8; BLOCK_SIZE]), true))
    }

    /// Marks a frame as needing write-back.
    pub fn dirty(&self, frame: &Frame) {
        frame.dirty.store(true, Ordering::Release);
    }

    /// Writes one frame back to the device if it is dirty.
    pub fn flush_frame(&self, frame: &Frame) -> Result<()> {
        if frame.is_dirty() {
            self.write_back(frame)?;
        }
        Ok(())
    }

    /// Writes every dirty frame back and flushes the device.
    pub fn flush_all(&self) -> Result<()> {
        let frames: Vec<Arc<Frame>> = self.frames.lock().values().cloned().collect();
        for frame in frames.iter() {
            self.flush_frame(frame)?;
        }
        self.device.flush()
    }

    fn check_block_id(&self, block_id: u32) -> Result<()> {
        if block_id as usize >= self.device.num_blocks() {
            return Err(Error::InvalidBlockId);
        }
        Ok(())
    }

    fn touch(&self, frame: &Frame) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        frame.last_used.store(now, Ordering::Relaxed);
    }

    fn insert(
        &self,
        frames: &mut BTreeMap<u32, Arc<Frame>>,
        frame: Frame,
    ) -> Result<Arc<Frame>> {
        if frames.len() >= self.capacity {
            self.evict_one(frames)?;
        }
        let frame = Arc::new(frame);
        self.touch(&frame);
        frames.insert(frame.block_id, Arc::clone(&frame));
        Ok(frame)
    }

    /// Evicts the least recently used frame that no one else references.
    /// If every frame is in use the cache simply grows past its capacity.
    fn evict_one(&self, frames: &mut BTreeMap<u32, Arc<Frame>>) -> Result<()> {
        let victim = frames
            .values()
            .filter(|f| !f.is_pinned() && Arc::strong_count(f) == 1)
            .min_by_key(|f| f.last_used.load(Ordering::Relaxed))
            .map(|f| f.block_id);

        if let Some(block_id) = victim {
            if let Some(frame) = frames.get(&block_id) {
                if frame.is_dirty() {
                    self.write_back(frame)?;
                }
            }
            trace!("[cache] evicting block {}", block_id);
            frames.remove(&block_id);
        }
        Ok(())
    }

    fn write_back(&self, frame: &Frame) -> Result<()> {
        let data = frame.data();
        self.device.write_block(frame.block_id, &data)?;
        frame.dirty.store(false, Ordering::Release);
        Ok(())
    }
}
