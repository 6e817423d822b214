pub const MAGIC: u32 = 0x5335_4653; // "S5FS" in ASCII
pub const VERSION: u32 = 1;

pub const BLOCK_SIZE: usize = 4096;
pub const SUPERBLOCK_ID: u32 = 0; // Block ID for the superblock
pub const INODE_TABLE_START: u32 = 1; // Inode table follows the superblock
pub const ROOT_INODE_ID: u32 = 0; // Inode ID of the root directory after format

pub const INODE_SIZE: usize = 132;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

pub const NUM_DIRECT_PTRS: usize = 28; // Number of direct pointers in an inode
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4; // 32-bit block numbers in the indirect block
pub const MAX_FILE_BLOCKS: usize = NUM_DIRECT_PTRS + PTRS_PER_BLOCK;
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Slots in the superblock's free-block array. The last slot chains to the next array on disk.
pub const NUM_FREE_SLOTS: usize = 30;
pub const FREE_LIST_END: u32 = u32::MAX;
pub const FREE_INODE_END: u32 = u32::MAX;

pub const DIR_ENTRY_SIZE: usize = 32; // Size of a directory entry (inode ID + name)
pub const DIR_NAME_WIDTH: usize = DIR_ENTRY_SIZE - 4; // DirEntry name field, NUL terminated
pub const MAX_FILE_NAME_LEN: usize = DIR_NAME_WIDTH - 1;
pub const NUM_ENTRY_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;
pub const DOT_NAME: &[u8; 1] = b".";
pub const DOTDOT_NAME: &[u8; 2] = b"..";

pub const DEFAULT_CACHE_FRAMES: usize = 64;
