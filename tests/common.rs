//! Common utilities for tests

use std::sync::{Arc, Mutex};

use s5fs::{BlockDevice, CharDevice, DevId, DeviceRegistry, Error, FileSystem, Result, BLOCK_SIZE};

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// Provides a macro for logging messages during tests.
/// e.g. log!("placeholder") -> println!("[test] placeholder");
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// In-memory block device. Clones share the same storage, so a disk can be remounted.
#[derive(Clone)]
pub struct RamDisk {
    inner: Arc<Mutex<Vec<u8>>>,
    num_blocks: usize,
}

impl RamDisk {
    /// Creates a new RamDisk with the specified number of blocks.
    /// Each block is BLOCK_SIZE bytes.
    pub fn new(num_blocks: usize) -> Self {
        let size = num_blocks * BLOCK_SIZE;
        RamDisk {
            inner: Arc::new(Mutex::new(vec![0u8; size])),
            num_blocks,
        }
    }

    /// Overwrites raw bytes on the disk, bypassing any filesystem on it.
    pub fn poke(&self, block_id: u32, offset: usize, bytes: &[u8]) {
        let start = block_id as usize * BLOCK_SIZE + offset;
        let mut data = self.inner.lock().unwrap();
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(Error::InvalidBlockId);
        }
        let start = block_id as usize * BLOCK_SIZE;
        let data = self.inner.lock().unwrap();
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(Error::InvalidBlockId);
        }
        let start = block_id as usize * BLOCK_SIZE;
        let mut data = self.inner.lock().unwrap();
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Formats a fresh RamDisk and returns it alongside the mounted filesystem.
pub fn mkfs(num_blocks: usize, num_inodes: u32) -> (RamDisk, FileSystem<RamDisk>) {
    let disk = RamDisk::new(num_blocks);
    let fs = FileSystem::format(Arc::new(disk.clone()), num_inodes).unwrap();
    (disk, fs)
}

/// Char device that remembers everything written to it.
#[derive(Default)]
pub struct Tape {
    data: Mutex<Vec<u8>>,
}

impl CharDevice for Tape {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> Result<usize> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[derive(Default)]
pub struct Registry {
    pub disks: Vec<(DevId, Arc<dyn BlockDevice>)>,
    pub chars: Vec<(DevId, Arc<dyn CharDevice>)>,
}

impl DeviceRegistry for Registry {
    fn block_device(&self, id: DevId) -> Option<Arc<dyn BlockDevice>> {
        self.disks.iter().find(|(dev, _)| *dev == id).map(|(_, d)| Arc::clone(d))
    }

    fn char_device(&self, id: DevId) -> Option<Arc<dyn CharDevice>> {
        self.chars.iter().find(|(dev, _)| *dev == id).map(|(_, d)| Arc::clone(d))
    }
}
