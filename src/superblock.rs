//! The superblock and the `Volume` that owns it.
//! A volume is a page cache plus the in-memory superblock; the superblock lock doubles as the
//! filesystem-wide allocator lock and is only held around allocator operations.

use alloc::sync::Arc;

use log::warn;
use spin::{Mutex, MutexGuard};

use crate::cache::{Frame, PageCache};
use crate::config::*;
use crate::structs::{read_record, write_record};
use crate::{BlockDevice, Error, Result, SuperBlock};

/// Validates magic, version and the inode-number fields of a superblock.
pub fn check_superblock(superblock: &SuperBlock) -> Result<()> {
    if superblock.magic != MAGIC {
        return Err(Error::Corrupt);
    }
    if superblock.free_inode >= superblock.num_inodes && superblock.free_inode != FREE_INODE_END {
        return Err(Error::Corrupt);
    }
    if superblock.root_inode >= superblock.num_inodes {
        return Err(Error::Corrupt);
    }
    if superblock.nfree as usize >= NUM_FREE_SLOTS {
        return Err(Error::Corrupt);
    }
    if superblock.version != VERSION {
        warn!("filesystem is version {}; only version {} is supported", superblock.version, VERSION);
        return Err(Error::Corrupt);
    }
    Ok(())
}

pub fn read_superblock<D: BlockDevice + ?Sized>(cache: &PageCache<D>) -> Result<SuperBlock> {
    let frame = cache.get(SUPERBLOCK_ID)?;
    let superblock: SuperBlock = read_record(&frame.data(), 0);
    check_superblock(&superblock)?;
    Ok(superblock)
}

pub fn write_superblock<D: BlockDevice + ?Sized>(
    cache: &PageCache<D>,
    superblock: &SuperBlock,
) -> Result<()> {
    let frame = cache.get(SUPERBLOCK_ID)?;
    let mut data = frame.data();
    write_record(&mut data, 0, superblock);
    cache.dirty(&frame);
    Ok(())
}

pub struct Volume<D: BlockDevice + ?Sized> {
    cache: PageCache<D>,
    superblock: Mutex<SuperBlock>,
    superblock_frame: Arc<Frame>,
    num_inodes: u32,
    data_start: u32,
    num_blocks: u32,
}

impl<D: BlockDevice + ?Sized> Volume<D> {
    /// Opens an existing volume, validating its superblock.
    pub fn open(cache: PageCache<D>) -> Result<Self> {
        let superblock = read_superblock(&cache)?;
        Self::with_superblock(cache, superblock)
    }

    /// Starts a fresh volume around `superblock`, writing it to block 0.
    pub fn create(cache: PageCache<D>, superblock: SuperBlock) -> Result<Self> {
        if superblock.data_start() as usize >= cache.num_blocks() {
            return Err(Error::InvalidArgument);
        }
        cache.get_zeroed(SUPERBLOCK_ID)?;
        write_superblock(&cache, &superblock)?;
        Self::with_superblock(cache, superblock)
    }

    fn with_superblock(cache: PageCache<D>, superblock: SuperBlock) -> Result<Self> {
        let num_blocks = u32::try_from(cache.num_blocks()).map_err(|_| Error::InvalidArgument)?;
        if superblock.data_start() > num_blocks {
            return Err(Error::Corrupt);
        }
        let superblock_frame = cache.get(SUPERBLOCK_ID)?;
        superblock_frame.pin();
        Ok(Volume {
            num_inodes: superblock.num_inodes,
            data_start: superblock.data_start(),
            num_blocks,
            superblock: Mutex::new(superblock),
            superblock_frame,
            cache,
        })
    }

    pub fn cache(&self) -> &PageCache<D> {
        &self.cache
    }

    /// Takes the filesystem-wide allocator lock.
    pub(crate) fn lock_super(&self) -> MutexGuard<'_, SuperBlock> {
        self.superblock.lock()
    }

    /// Copies the in-memory superblock into its pinned frame and marks it dirty.
    pub(crate) fn dirty_super(&self, superblock: &SuperBlock) {
        let mut data = self.superblock_frame.data();
        write_record(&mut data, 0, superblock);
        self.cache.dirty(&self.superblock_frame);
    }

    pub fn superblock(&self) -> SuperBlock {
        *self.superblock.lock()
    }

    pub fn num_inodes(&self) -> u32 {
        self.num_inodes
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    /// Writes back every dirty frame, superblock included.
    pub fn sync(&self) -> Result<()> {
        self.cache.flush_all()
    }
}

impl<D: BlockDevice + ?Sized> Drop for Volume<D> {
    fn drop(&mut self) {
        self.superblock_frame.unpin();
    }
}
