//! s5fs is a small System V style block file system engine.
//! No permissions, timestamps, or journaling: files, directories, hard links and device nodes.
//!
//! Linear on-disk layout:
//! - Superblock (block 0), carrying the head of the chained free-block list
//! - Inode Table, threaded into a free-inode list
//! - Data Blocks
//!
//! Layers (from bottom to top):
//! 1. Block Device: fixed-size block reads and writes.         | User implemented (hardware-specific)
//! 2. Page Cache: frames with pin/dirty state over the device.  | Fs implemented
//! 3. Allocators: free-block chain and free-inode list.         | Fs implemented
//! 4. Inode: records, direct/indirect block mapping.            | Fs implemented
//! 5. File/Directory: byte I/O and fixed-size entry arrays.     | Fs implemented
//! 6. FileSystem: vnodes and the operations a VFS calls.        | Fs implemented
//! 7. Path: component-wise resolution over `lookup`.            | Fs implemented

#![cfg_attr(not(test), no_std)]

// Users of this crate must provide a global allocator.
extern crate alloc;

mod config;
mod error;
mod block_dev;
mod device;
mod cache;
mod structs;
mod superblock;
mod freelist;
mod inode;
mod file;
mod directory;
mod vnode;
mod fs;
pub mod path;

pub use block_dev::BlockDevice;
pub use cache::{Frame, PageCache};
pub use config::*;
pub use device::{parse_disk_name, CharDevice, DevId, DeviceRegistry, DISK_MAJOR};
pub use directory::validate_name;
pub use structs::*;
pub use superblock::check_superblock;
pub use vnode::{DeviceHandle, DirEnt, Stat, Vnode, VnodeKind, VnodeOps};
pub use fs::{FileSystem, MountOptions, Usage};
pub use path::OpenFlags;
pub use error::FsError as Error;
pub use error::Result;
