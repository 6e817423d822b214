use core::mem::size_of;
use core::ptr;

use crate::config::*;
use crate::device::DevId;
use crate::Error;
use crate::Result;

/// Marker for on-disk records made only of integers, so any byte pattern is a valid value.
///
/// # Safety
/// Implementors must be `repr(C)` (or primitive arrays) without padding or non-integer fields.
pub(crate) unsafe trait Plain: Copy {}

/// Reads a record at `offset` inside a block buffer.
pub(crate) fn read_record<T: Plain>(buf: &[u8; BLOCK_SIZE], offset: usize) -> T {
    assert!(offset + size_of::<T>() <= BLOCK_SIZE);
    unsafe { ptr::read_unaligned(buf.as_ptr().add(offset) as *const T) }
}

/// Writes a record at `offset` inside a block buffer.
pub(crate) fn write_record<T: Plain>(buf: &mut [u8; BLOCK_SIZE], offset: usize, value: &T) {
    assert!(offset + size_of::<T>() <= BLOCK_SIZE);
    unsafe { ptr::write_unaligned(buf.as_mut_ptr().add(offset) as *mut T, *value) }
}

/// Decodes a record from the front of a byte slice.
pub(crate) fn record_from_bytes<T: Plain>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= size_of::<T>());
    unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

/// Views a record as its raw on-disk bytes.
pub(crate) fn record_bytes<T: Plain>(value: &T) -> &[u8] {
    unsafe { core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Reads the `index`-th block number of an indirect block.
pub(crate) fn read_ptr(buf: &[u8; BLOCK_SIZE], index: usize) -> u32 {
    read_record::<u32>(buf, index * 4)
}

pub(crate) fn write_ptr(buf: &mut [u8; BLOCK_SIZE], index: usize, block_id: u32) {
    write_record::<u32>(buf, index * 4, &block_id)
}

unsafe impl Plain for u32 {}
unsafe impl Plain for [u32; NUM_FREE_SLOTS] {}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,       // Magic number to identify the filesystem
    pub version: u32,     // On-disk format version
    pub num_inodes: u32,  // Total number of inodes in the filesystem
    pub root_inode: u32,  // Inode number of the root directory
    pub free_inode: u32,  // Head of the free inode list, or FREE_INODE_END
    pub nfree: u32,       // Valid entries in free_blocks, excluding the chain slot
    pub free_blocks: [u32; NUM_FREE_SLOTS], // Last slot chains to the next array on disk
}

unsafe impl Plain for SuperBlock {}

impl SuperBlock {
    pub fn new(num_inodes: u32) -> Self {
        let mut free_blocks = [0; NUM_FREE_SLOTS];
        free_blocks[NUM_FREE_SLOTS - 1] = FREE_LIST_END;
        SuperBlock {
            magic: MAGIC,
            version: VERSION,
            num_inodes,
            root_inode: ROOT_INODE_ID,
            free_inode: FREE_INODE_END,
            nfree: 0,
            free_blocks,
        }
    }

    /// Blocks occupied by the inode table.
    pub fn inode_table_blocks(&self) -> u32 {
        self.num_inodes.div_ceil(INODES_PER_BLOCK as u32)
    }

    /// First block past the superblock and inode table.
    pub fn data_start(&self) -> u32 {
        INODE_TABLE_START + self.inode_table_blocks()
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Free = 0,
    Data = 1,
    Directory = 2,
    CharDevice = 3,
    BlockDevice = 4,
}

impl FileType {
    pub fn is_device(&self) -> bool {
        matches!(self, FileType::CharDevice | FileType::BlockDevice)
    }
}

impl TryFrom<u16> for FileType {
    type Error = Error;

    fn try_from(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(FileType::Free),
            1 => Ok(FileType::Data),
            2 => Ok(FileType::Directory),
            3 => Ok(FileType::CharDevice),
            4 => Ok(FileType::BlockDevice),
            _ => Err(Error::Corrupt),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub id: u32,
    pub next_free: u32, // Only meaningful while the inode is free
    pub size: u32,
    pub ftype: u16,
    pub links_cnt: u16,
    pub direct_ptrs: [u32; NUM_DIRECT_PTRS],
    pub indirect_ptr: u32, // Device id for device inodes
}

unsafe impl Plain for Inode {}

const _: () = assert!(size_of::<Inode>() == INODE_SIZE);
const _: () = assert!(size_of::<SuperBlock>() <= BLOCK_SIZE);
const _: () = assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);

impl Inode {
    /// A free inode linked in front of `next_free`.
    pub fn free(id: u32, next_free: u32) -> Self {
        Inode {
            id,
            next_free,
            size: 0,
            ftype: FileType::Free as u16,
            links_cnt: 0,
            direct_ptrs: [0; NUM_DIRECT_PTRS],
            indirect_ptr: 0,
        }
    }

    pub fn file_type(&self) -> Result<FileType> {
        FileType::try_from(self.ftype)
    }

    pub fn devid(&self) -> DevId {
        DevId::from_raw(self.indirect_ptr)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub inode_id: u32,
    pub name: [u8; DIR_NAME_WIDTH],
}

unsafe impl Plain for DirEntry {}

impl DirEntry {
    pub const NULL: Self = Self {
        inode_id: 0,
        name: [0; DIR_NAME_WIDTH],
    };

    pub fn new(inode_id: u32, name: &[u8]) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(Self {
            inode_id,
            name: {
                let mut arr = [0; DIR_NAME_WIDTH];
                arr[..name.len()].copy_from_slice(name);
                arr
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(size_of::<Inode>(), 132);
        assert_eq!(INODES_PER_BLOCK, 31);
        assert_eq!(size_of::<SuperBlock>(), 24 + 4 * NUM_FREE_SLOTS);
    }

    #[test]
    fn test_record_round_trip_at_offset() {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut inode = Inode::free(7, 8);
        inode.direct_ptrs[3] = 99;
        write_record(&mut buf, INODE_SIZE * 5, &inode);
        let back: Inode = read_record(&buf, INODE_SIZE * 5);
        assert_eq!(back, inode);
        assert_eq!(back.file_type(), Ok(FileType::Free));
    }

    #[test]
    fn test_bad_type_tag() {
        let mut inode = Inode::free(1, FREE_INODE_END);
        inode.ftype = 42;
        assert_eq!(inode.file_type(), Err(Error::Corrupt));
    }

    #[test]
    fn test_dir_entry_name_limits() {
        assert_eq!(DirEntry::new(1, b"").unwrap_err(), Error::InvalidArgument);
        let long = [b'a'; MAX_FILE_NAME_LEN + 1];
        assert_eq!(DirEntry::new(1, &long).unwrap_err(), Error::NameTooLong);
        let fits = [b'a'; MAX_FILE_NAME_LEN];
        let entry = DirEntry::new(1, &fits).unwrap();
        assert_eq!(entry.name[MAX_FILE_NAME_LEN], 0);
    }
}
