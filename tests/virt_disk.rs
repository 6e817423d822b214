#![allow(unused)]

mod common;

const DISK_BLOCKS: usize = 80;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use s5fs::path::{self, resolve};
use s5fs::*;

/// Block device backed by an image file.
pub struct VirtDisk {
    inner: Mutex<File>,
}

impl VirtDisk {
    pub fn create(path: &PathBuf) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| Error::Io)?;
        file.set_len((DISK_BLOCKS * BLOCK_SIZE) as u64).map_err(|_| Error::Io)?;
        Ok(VirtDisk { inner: Mutex::new(file) })
    }

    pub fn open(path: &PathBuf) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path).map_err(|_| Error::Io)?;
        Ok(VirtDisk { inner: Mutex::new(file) })
    }
}

impl BlockDevice for VirtDisk {
    fn num_blocks(&self) -> usize {
        DISK_BLOCKS
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= DISK_BLOCKS {
            return Err(Error::InvalidBlockId);
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .map_err(|_| Error::Io)?;
        inner.read_exact(buf).map_err(|_| Error::Io)
    }

    fn write_block(&self, block_id: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= DISK_BLOCKS {
            return Err(Error::InvalidBlockId);
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .map_err(|_| Error::Io)?;
        inner.write_all(buf).map_err(|_| Error::Io)
    }

    fn flush(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.sync_all().map_err(|_| Error::Io)
    }
}

#[test]
fn test_image_survives_reopen() {
    let image = std::env::temp_dir().join(format!("s5fs-virt-{}.img", std::process::id()));
    let motd = b"welcome to s5fs\n";

    {
        let disk = VirtDisk::create(&image).unwrap();
        let fs = FileSystem::format(Arc::new(disk), 64).unwrap();
        path::mkdir(&fs, "/etc", None).unwrap();
        let file = resolve(&fs, "/etc/motd", OpenFlags::CREATE, None).unwrap();
        assert_eq!(fs.write(&file, 0, motd).unwrap(), motd.len());
        fs.vput(file).unwrap();
        path::link(&fs, "/etc/motd", "/motd", None).unwrap();
        fs.unmount(true).unwrap();
    }

    {
        let disk = VirtDisk::open(&image).unwrap();
        let fs = FileSystem::mount(Arc::new(disk)).unwrap();
        let stat = path::stat(&fs, "/motd", None).unwrap();
        assert_eq!(stat.size, motd.len());
        assert_eq!(stat.nlink, 2);

        let file = resolve(&fs, "/etc/motd", OpenFlags::empty(), None).unwrap();
        let mut buf = vec![0u8; 64];
        let n = fs.read(&file, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], motd);
        fs.vput(file).unwrap();

        log!("usage after reopen: {:?}", fs.usage().unwrap());
        fs.unmount(true).unwrap();
    }

    std::fs::remove_file(&image).unwrap();
}
