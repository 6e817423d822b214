//! Byte-level reads and writes over an inode's block map.
//! Files and directories are treated identically here; type checks happen in the vnode layer.

use log::debug;

use crate::config::*;
use crate::inode::{block_of, bmap, write_inode};
use crate::superblock::Volume;
use crate::{BlockDevice, Error, Inode, Result};

/// Reads data from a file into the provided buffer.
/// The `offset` is the position in the file to start reading from.
/// Stops at the recorded size, so fewer bytes than `buffer.len()` may come back; sparse blocks
/// read as zeros and are never allocated.
pub fn fread<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    inode: &Inode,
    offset: usize,
    buffer: &mut [u8],
) -> Result<usize> {
    let size = inode.size as usize;
    if offset >= size || buffer.is_empty() {
        return Ok(0);
    }

    let total = buffer.len().min(size - offset);
    let mut bytes_read = 0;
    while bytes_read < total {
        let current_offset = offset + bytes_read;
        let start_offset = current_offset % BLOCK_SIZE;
        let bytes_to_read = (BLOCK_SIZE - start_offset).min(total - bytes_read);
        let dest = &mut buffer[bytes_read..bytes_read + bytes_to_read];

        let block_id = block_of(volume, inode, current_offset / BLOCK_SIZE)?;
        if block_id == 0 {
            dest.fill(0);
        } else {
            let frame = volume.cache().get(block_id)?;
            let data = frame.data();
            dest.copy_from_slice(&data[start_offset..start_offset + bytes_to_read]);
        }
        bytes_read += bytes_to_read;
    }

    Ok(bytes_read)
}

/// Writes data from the provided buffer to a file at the specified offset.
/// Sparse blocks in the range get allocated; the size grows when the write ends past it.
/// Running out of space after some bytes landed yields the partial count, not an error.
pub fn fwrite<D: BlockDevice + ?Sized>(
    volume: &Volume<D>,
    inode: &mut Inode,
    offset: usize,
    buffer: &[u8],
) -> Result<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }
    if offset >= MAX_FILE_SIZE {
        return Err(Error::NoSpace);
    }

    let mut bytes_written = 0;
    let mut failure = None;
    while bytes_written < buffer.len() {
        let current_offset = offset + bytes_written;
        let start_offset = current_offset % BLOCK_SIZE;
        let bytes_to_write = (BLOCK_SIZE - start_offset).min(buffer.len() - bytes_written);

        let block_id = match bmap(volume, inode, current_offset / BLOCK_SIZE, true) {
            Ok(block_id) => block_id,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };

        let frame = match volume.cache().get(block_id) {
            Ok(frame) => frame,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        let mut data = frame.data();
        data[start_offset..start_offset + bytes_to_write]
            .copy_from_slice(&buffer[bytes_written..bytes_written + bytes_to_write]);
        volume.cache().dirty(&frame);
        drop(data);

        bytes_written += bytes_to_write;
    }

    let end = (offset + bytes_written) as u32;
    if end > inode.size {
        inode.size = end;
    }
    // Blocks allocated before a failure are recorded either way.
    write_inode(volume, inode)?;

    match failure {
        Some(e) if bytes_written == 0 => Err(e),
        Some(e) => {
            debug!("[fwrite] inode {} partial write of {} bytes: {:?}", inode.id, bytes_written, e);
            Ok(bytes_written)
        }
        None => Ok(bytes_written),
    }
}
