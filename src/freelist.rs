//! Management of the free-block list.
//! The superblock caches up to NUM_FREE_SLOTS - 1 free block numbers; its last slot points at a
//! free block holding the next full array, and so on until FREE_LIST_END.

use log::debug;

use crate::config::*;
use crate::structs::{read_record, write_record};
use crate::superblock::Volume;
use crate::{BlockDevice, Error, Result};

const CHAIN_SLOT: usize = NUM_FREE_SLOTS - 1;

/// Allocates a data block, popping from the superblock's array.
/// When the array runs dry the next chained array is pulled in, and the block that held it is the
/// one handed out. The returned block reads as zeros.
pub fn alloc_block<D: BlockDevice + ?Sized>(volume: &Volume<D>) -> Result<u32> {
    let mut superblock = volume.lock_super();

    let block_id = if superblock.nfree > 0 {
        superblock.free_blocks[superblock.nfree as usize - 1]
    } else {
        superblock.free_blocks[CHAIN_SLOT]
    };
    if block_id == FREE_LIST_END && superblock.nfree == 0 {
        return Err(Error::NoSpace);
    }
    // A bad entry leaves the superblock untouched.
    if block_id < volume.data_start() || block_id >= volume.num_blocks() {
        return Err(Error::Corrupt);
    }

    if superblock.nfree > 0 {
        superblock.nfree -= 1;
    } else {
        let frame = volume.cache().get(block_id)?;
        superblock.free_blocks = read_record(&frame.data(), 0);
        superblock.nfree = CHAIN_SLOT as u32;
    }
    volume.dirty_super(&superblock);
    drop(superblock);

    volume.cache().get_zeroed(block_id)?;
    debug!("[alloc_block] allocated block {}", block_id);
    Ok(block_id)
}

/// Returns a block to the free list.
/// When the in-memory array is full it is written verbatim into `block_id`, which becomes the new
/// head of the on-disk chain. The caller must have dropped every reference to the block.
pub fn free_block<D: BlockDevice + ?Sized>(volume: &Volume<D>, block_id: u32) -> Result<()> {
    if block_id < volume.data_start() || block_id >= volume.num_blocks() {
        return Err(Error::InvalidBlockId);
    }

    let mut superblock = volume.lock_super();
    if superblock.nfree as usize == CHAIN_SLOT {
        let frame = volume.cache().get_zeroed(block_id)?;
        let mut data = frame.data();
        write_record(&mut data, 0, &superblock.free_blocks);
        volume.cache().dirty(&frame);
        drop(data);

        superblock.nfree = 0;
        superblock.free_blocks[CHAIN_SLOT] = block_id;
    } else {
        let slot = superblock.nfree as usize;
        superblock.free_blocks[slot] = block_id;
        superblock.nfree += 1;
    }
    volume.dirty_super(&superblock);

    debug!("[free_block] freed block {}", block_id);
    Ok(())
}

/// Walks the whole chain and counts free blocks, chain-holding blocks included.
pub fn count_free_blocks<D: BlockDevice + ?Sized>(volume: &Volume<D>) -> Result<u32> {
    let superblock = volume.lock_super();
    let mut count = superblock.nfree;
    let mut next = superblock.free_blocks[CHAIN_SLOT];
    drop(superblock);

    let mut hops = 0;
    while next != FREE_LIST_END {
        // A chain longer than the device means a cycle.
        hops += 1;
        if hops > volume.num_blocks() {
            return Err(Error::Corrupt);
        }
        let frame = volume.cache().get(next)?;
        let array: [u32; NUM_FREE_SLOTS] = read_record(&frame.data(), 0);
        count += 1 + CHAIN_SLOT as u32;
        next = array[CHAIN_SLOT];
    }
    Ok(count)
}
