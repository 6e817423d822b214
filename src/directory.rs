//! A directory's content is a packed, unordered array of fixed-size `DirEntry` records read and
//! written through the file layer. Removal moves the last record into the hole, so the array
//! never has gaps.

use alloc::vec::Vec;

use log::debug;

use crate::config::*;
use crate::file::{fread, fwrite};
use crate::freelist::free_block;
use crate::inode::{unmap_block, write_inode};
use crate::structs::*;
use crate::superblock::Volume;
use crate::{BlockDevice, Error, Result};

pub fn trim_zero(name: &[u8]) -> &[u8] {
    match name.iter().position(|&c| c == 0) {
        Some(end) => &name[..end],
        None => name,
    }
}

fn name_cmp(n1: &[u8], n2: &[u8]) -> bool {
    trim_zero(n1) == trim_zero(n2)
}

impl DirEntry {
    /// The entry's name without its NUL padding.
    pub fn name_bytes(&self) -> &[u8] {
        trim_zero(&self.name)
    }

    pub fn name_eq(&self, name: &[u8]) -> bool {
        name_cmp(&self.name, name)
    }

    pub fn name_eq_str(&self, name: &str) -> bool {
        name_cmp(&self.name, name.as_bytes())
    }
}

/// Checks a single path component before it is stored in a directory.
pub fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name.iter().any(|&c| c == b'/' || c == 0) {
        return Err(Error::InvalidArgument);
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// The inode a new entry points at.
pub enum LinkTarget<'a> {
    /// The directory itself, as for ".".
    Itself,
    Other(&'a mut Inode),
}

/// Reads the record at `offset`, or `None` past the end of the directory.
pub fn dir_entry_at<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &Inode,
    offset: usize,
) -> Result<Option<DirEntry>> {
    let mut buf = [0u8; DIR_ENTRY_SIZE];
    match fread(volume, dir_inode, offset, &mut buf)? {
        0 => Ok(None),
        DIR_ENTRY_SIZE => Ok(Some(record_from_bytes(&buf))),
        _ => Err(Error::Corrupt),
    }
}

fn find_offset<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &Inode,
    name: &[u8],
) -> Result<(usize, u32)> {
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    let mut offset = 0;
    while let Some(entry) = dir_entry_at(volume, dir_inode, offset)? {
        if entry.name_eq(name) {
            return Ok((offset, entry.inode_id));
        }
        offset += DIR_ENTRY_SIZE;
    }
    Err(Error::NotFound)
}

/// Query inode id of a file by name in the directory inode.
pub fn dir_lookup<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &Inode,
    name: &[u8],
) -> Result<u32> {
    find_offset(volume, dir_inode, name).map(|(_, inode_id)| inode_id)
}

/// Appends an entry for `target` and bumps the target's link count.
pub fn dir_add_entry<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &mut Inode,
    name: &[u8],
    target: LinkTarget<'_>,
) -> Result<()> {
    validate_name(name)?;
    match dir_lookup(volume, dir_inode, name) {
        Ok(_) => return Err(Error::AlreadyExists),
        Err(Error::NotFound) => {}
        Err(e) => return Err(e),
    }
    if dir_inode.size as usize + DIR_ENTRY_SIZE > MAX_FILE_SIZE {
        return Err(Error::NoSpace);
    }

    let target_id = match &target {
        LinkTarget::Itself => dir_inode.id,
        LinkTarget::Other(inode) => inode.id,
    };
    let entry = DirEntry::new(target_id, name)?;
    let end = dir_inode.size as usize;
    // Records never straddle a block, so a short write means nothing landed.
    if fwrite(volume, dir_inode, end, record_bytes(&entry))? != DIR_ENTRY_SIZE {
        return Err(Error::NoSpace);
    }

    match target {
        LinkTarget::Itself => {
            dir_inode.links_cnt = dir_inode.links_cnt.checked_add(1).ok_or(Error::NoSpace)?;
            write_inode(volume, dir_inode)?;
        }
        LinkTarget::Other(inode) => {
            inode.links_cnt = inode.links_cnt.checked_add(1).ok_or(Error::NoSpace)?;
            write_inode(volume, inode)?;
        }
    }

    debug!("[dir_add_entry] dir {} += {:?} -> {}", dir_inode.id,
        core::str::from_utf8(name).unwrap_or("?"), target_id);
    Ok(())
}

/// Removes the entry called `name`, filling the hole with the last record.
/// Returns the inode id the entry pointed at; dropping that inode's link is the caller's job.
/// A trailing block left without records is given back to the allocator.
pub fn dir_rm_entry<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &mut Inode,
    name: &[u8],
) -> Result<u32> {
    let (offset, inode_id) = find_offset(volume, dir_inode, name)?;
    let last_offset = dir_inode.size as usize - DIR_ENTRY_SIZE;

    if offset != last_offset {
        let last = dir_entry_at(volume, dir_inode, last_offset)?.ok_or(Error::Corrupt)?;
        fwrite(volume, dir_inode, offset, record_bytes(&last))?;
    }

    if last_offset % BLOCK_SIZE == 0 {
        let block_id = unmap_block(volume, dir_inode, last_offset / BLOCK_SIZE)?;
        if block_id != 0 {
            free_block(volume, block_id)?;
        }
    }

    dir_inode.size = last_offset as u32;
    write_inode(volume, dir_inode)?;

    debug!("[dir_rm_entry] dir {} -= {:?} ({})", dir_inode.id,
        core::str::from_utf8(name).unwrap_or("?"), inode_id);
    Ok(inode_id)
}

/// True when only "." and ".." are left.
pub fn dir_is_empty(dir_inode: &Inode) -> bool {
    dir_inode.size as usize == 2 * DIR_ENTRY_SIZE
}

pub fn read_dir<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    dir_inode: &Inode,
) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while let Some(entry) = dir_entry_at(volume, dir_inode, offset)? {
        entries.push(entry);
        offset += DIR_ENTRY_SIZE;
    }
    Ok(entries)
}
