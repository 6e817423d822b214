//! Management of reading and writing to inodes.
//! Inodes are packed INODES_PER_BLOCK to a block right after the superblock; free inodes form a
//! singly linked list through `next_free`, anchored in the superblock.

use alloc::vec::Vec;

use log::{debug, trace};

use crate::config::*;
use crate::device::DevId;
use crate::freelist::{alloc_block, free_block};
use crate::structs::{read_ptr, read_record, write_ptr, write_record};
use crate::superblock::Volume;
use crate::{BlockDevice, Error, FileType, Inode, Result};

fn inode_location(inode_id: u32) -> (u32, usize) {
    let block_id = INODE_TABLE_START + inode_id / INODES_PER_BLOCK as u32;
    let block_inner_offset = (inode_id as usize % INODES_PER_BLOCK) * INODE_SIZE;
    (block_id, block_inner_offset)
}

pub fn get_inode<D: BlockDevice + ?Sized>(volume: &Volume<D>, inode_id: u32) -> Result<Inode> {
    if inode_id >= volume.num_inodes() {
        return Err(Error::InvalidArgument);
    }
    let (block_id, offset) = inode_location(inode_id);
    let frame = volume.cache().get(block_id)?;
    let inode: Inode = read_record(&frame.data(), offset);
    if inode.id != inode_id {
        return Err(Error::Corrupt);
    }
    Ok(inode)
}

/// Writes the inode into its cached table block and marks that block dirty.
pub fn write_inode<D: BlockDevice + ?Sized>(volume: &Volume<D>, inode: &Inode) -> Result<()> {
    if inode.id >= volume.num_inodes() {
        return Err(Error::InvalidArgument);
    }
    let (block_id, offset) = inode_location(inode.id);
    let frame = volume.cache().get(block_id)?;
    let mut data = frame.data();
    write_record(&mut data, offset, inode);
    volume.cache().dirty(&frame);
    Ok(())
}

/// Pops the head of the free inode list and initializes it as `ftype`.
/// Device inodes keep their device id in the indirect pointer slot.
pub fn alloc_inode<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    ftype: FileType,
    devid: Option<DevId>,
) -> Result<u32> {
    if ftype == FileType::Free {
        return Err(Error::InvalidArgument);
    }

    let mut superblock = volume.lock_super();
    if superblock.free_inode == FREE_INODE_END {
        return Err(Error::NoSpace);
    }
    let inode_id = superblock.free_inode;
    let mut inode = get_inode(volume, inode_id)?;
    if inode.file_type()? != FileType::Free {
        return Err(Error::Corrupt);
    }

    superblock.free_inode = inode.next_free;
    volume.dirty_super(&superblock);

    inode.size = 0;
    inode.ftype = ftype as u16;
    inode.links_cnt = 0;
    inode.next_free = FREE_INODE_END;
    inode.direct_ptrs = [0; NUM_DIRECT_PTRS];
    inode.indirect_ptr = match (ftype.is_device(), devid) {
        (true, Some(devid)) => devid.raw(),
        _ => 0,
    };
    write_inode(volume, &inode)?;
    drop(superblock);

    debug!("[alloc_inode] allocated inode {} as {:?}", inode_id, ftype);
    Ok(inode_id)
}

/// Releases every block the inode references and pushes it onto the free inode list.
/// The link count must already be zero.
pub fn free_inode<D: BlockDevice + ?Sized>(volume: &Volume<D>, inode: &mut Inode) -> Result<()> {
    debug_assert_eq!(inode.links_cnt, 0, "freeing inode {} with live links", inode.id);
    let ftype = inode.file_type()?;

    if !ftype.is_device() {
        for i in 0..NUM_DIRECT_PTRS {
            if inode.direct_ptrs[i] != 0 {
                free_block(volume, inode.direct_ptrs[i])?;
                inode.direct_ptrs[i] = 0;
            }
        }

        if inode.indirect_ptr != 0 {
            let frame = volume.cache().get(inode.indirect_ptr)?;
            frame.pin();
            let ptrs: Vec<u32> = {
                let data = frame.data();
                (0..PTRS_PER_BLOCK).map(|i| read_ptr(&data, i)).filter(|&b| b != 0).collect()
            };
            frame.unpin();
            drop(frame);
            for block_id in ptrs {
                debug_assert_ne!(block_id, inode.indirect_ptr);
                free_block(volume, block_id)?;
            }
            free_block(volume, inode.indirect_ptr)?;
        }
    }

    inode.indirect_ptr = 0;
    inode.size = 0;
    inode.ftype = FileType::Free as u16;

    let mut superblock = volume.lock_super();
    inode.next_free = superblock.free_inode;
    superblock.free_inode = inode.id;
    volume.dirty_super(&superblock);
    write_inode(volume, inode)?;
    drop(superblock);

    debug!("[free_inode] freed inode {}", inode.id);
    Ok(())
}

/// Maps a file block index to a disk block without allocating.
/// Returns 0 for a sparse block.
pub fn block_of<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    inode: &Inode,
    block_index: usize,
) -> Result<u32> {
    if block_index < NUM_DIRECT_PTRS {
        return Ok(inode.direct_ptrs[block_index]);
    }
    let indirect_index = block_index - NUM_DIRECT_PTRS;
    if indirect_index >= PTRS_PER_BLOCK {
        return Err(Error::NoSpace);
    }
    if inode.indirect_ptr == 0 {
        return Ok(0);
    }
    let frame = volume.cache().get(inode.indirect_ptr)?;
    let block_id = read_ptr(&frame.data(), indirect_index);
    Ok(block_id)
}

/// Maps a file block index to a disk block.
/// With `create`, sparse blocks (and the indirect block itself) are allocated on the way; the
/// caller is responsible for writing the inode back.
pub fn bmap<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    inode: &mut Inode,
    block_index: usize,
    create: bool,
) -> Result<u32> {
    if !create {
        return block_of(volume, inode, block_index);
    }

    // Direct blocks
    if block_index < NUM_DIRECT_PTRS {
        let mut block_id = inode.direct_ptrs[block_index];
        if block_id == 0 {
            block_id = alloc_block(volume)?;
            inode.direct_ptrs[block_index] = block_id;
        }
        trace!("[bmap] inode {} block {} -> {}", inode.id, block_index, block_id);
        return Ok(block_id);
    }

    // Indirect blocks
    let indirect_index = block_index - NUM_DIRECT_PTRS;
    if indirect_index >= PTRS_PER_BLOCK {
        return Err(Error::NoSpace);
    }
    if inode.indirect_ptr == 0 {
        inode.indirect_ptr = alloc_block(volume)?;
    }

    let frame = volume.cache().get(inode.indirect_ptr)?;
    frame.pin();
    let existing = read_ptr(&frame.data(), indirect_index);
    let result = if existing != 0 {
        Ok(existing)
    } else {
        alloc_block(volume).map(|block_id| {
            let mut data = frame.data();
            write_ptr(&mut data, indirect_index, block_id);
            volume.cache().dirty(&frame);
            block_id
        })
    };
    frame.unpin();

    if let Ok(block_id) = result {
        trace!("[bmap] inode {} block {} -> {}", inode.id, block_index, block_id);
    }
    result
}

/// Detaches the block at `block_index` from the inode and returns it (0 if it was sparse).
/// The caller frees it.
pub fn unmap_block<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    inode: &mut Inode,
    block_index: usize,
) -> Result<u32> {
    if block_index < NUM_DIRECT_PTRS {
        let block_id = inode.direct_ptrs[block_index];
        inode.direct_ptrs[block_index] = 0;
        return Ok(block_id);
    }
    let indirect_index = block_index - NUM_DIRECT_PTRS;
    if indirect_index >= PTRS_PER_BLOCK {
        return Err(Error::InvalidArgument);
    }
    if inode.indirect_ptr == 0 {
        return Ok(0);
    }
    let frame = volume.cache().get(inode.indirect_ptr)?;
    let mut data = frame.data();
    let block_id = read_ptr(&data, indirect_index);
    if block_id != 0 {
        write_ptr(&mut data, indirect_index, 0);
        volume.cache().dirty(&frame);
    }
    Ok(block_id)
}

/// Number of disk blocks the inode holds: allocated data blocks plus the indirect block.
pub fn inode_blocks<D: BlockDevice + ?Sized>(volume: &Volume<D>, inode: &Inode) -> Result<u32> {
    if inode.file_type()?.is_device() {
        return Ok(0);
    }
    let mut count = inode.direct_ptrs.iter().filter(|&&b| b != 0).count() as u32;
    if inode.indirect_ptr != 0 {
        let frame = volume.cache().get(inode.indirect_ptr)?;
        let data = frame.data();
        count += 1 + (0..PTRS_PER_BLOCK).filter(|&i| read_ptr(&data, i) != 0).count() as u32;
    }
    Ok(count)
}
