#![allow(unused)]
use std::sync::Arc;

use common::{mkfs, RamDisk};
use s5fs::path::{self, resolve};
use s5fs::{BlockDevice, Error, FileSystem, MountOptions, OpenFlags, BLOCK_SIZE};

mod common;

fn small_cache(frames: usize) -> MountOptions {
    MountOptions { cache_frames: frames, ..MountOptions::default() }
}

fn block_pattern(block: usize) -> Vec<u8> {
    (0..BLOCK_SIZE).map(|i| (i as u8) ^ (block as u8)).collect()
}

#[test]
fn test_small_cache_workload() {
    let disk = RamDisk::new(256);
    let fs = FileSystem::format_with(Arc::new(disk.clone()), 64, small_cache(4)).unwrap();

    let sizes = [10, BLOCK_SIZE + 1, 30 * BLOCK_SIZE + 17, 5 * BLOCK_SIZE];
    for dir in ["x", "y"] {
        path::mkdir(&fs, &format!("/{}", dir), None).unwrap();
        for (i, &size) in sizes.iter().enumerate() {
            let file = resolve(&fs, &format!("/{}/f{}", dir, i), OpenFlags::CREATE, None).unwrap();
            let data: Vec<u8> = (0..size).map(|b| (b % 253) as u8 ^ i as u8).collect();
            assert_eq!(fs.write(&file, 0, &data).unwrap(), size);
            fs.vput(file).unwrap();
        }
    }
    log!("cache holds {} frames after the workload", fs.cache().resident());
    fs.unmount(true).unwrap();

    // Everything evicted along the way must have reached the disk.
    let fs = FileSystem::mount(Arc::new(disk.clone())).unwrap();
    for dir in ["x", "y"] {
        for (i, &size) in sizes.iter().enumerate() {
            let file = resolve(&fs, &format!("/{}/f{}", dir, i), OpenFlags::empty(), None).unwrap();
            let mut buf = vec![0u8; size];
            assert_eq!(fs.read(&file, 0, &mut buf).unwrap(), size);
            assert!(buf.iter().enumerate().all(|(b, &v)| v == (b % 253) as u8 ^ i as u8));
            fs.vput(file).unwrap();
        }
    }
    assert!(fs.check_refcounts().unwrap());
    fs.unmount(true).unwrap();
}

#[test]
fn test_dirty_eviction_writes_back() {
    let disk = RamDisk::new(64);
    let fs = FileSystem::format_with(Arc::new(disk.clone()), 32, small_cache(4)).unwrap();
    let file = resolve(&fs, "/big", OpenFlags::CREATE, None).unwrap();
    for block in 0..20 {
        fs.write(&file, block * BLOCK_SIZE, &block_pattern(block)).unwrap();
    }

    // The first block was pushed out long ago, so the raw disk already has it.
    let first = fs.get_inode(file.ino()).unwrap().direct_ptrs[0];
    let mut raw = [0u8; BLOCK_SIZE];
    disk.read_block(first, &mut raw).unwrap();
    assert_eq!(&raw[..], &block_pattern(0)[..]);

    fs.vput(file).unwrap();
    fs.unmount(true).unwrap();
}

#[test]
fn test_sync_writes_dirty_frames() {
    let (disk, fs) = mkfs(64, 32);
    let file = resolve(&fs, "/f", OpenFlags::CREATE, None).unwrap();
    fs.write(&file, 0, b"persist me").unwrap();

    let block = fs.get_inode(file.ino()).unwrap().direct_ptrs[0];
    let mut raw = [0u8; BLOCK_SIZE];
    disk.read_block(block, &mut raw).unwrap();
    assert_ne!(&raw[..10], b"persist me");

    fs.sync().unwrap();
    disk.read_block(block, &mut raw).unwrap();
    assert_eq!(&raw[..10], b"persist me");

    fs.vput(file).unwrap();
    fs.unmount(true).unwrap();
}

#[test]
fn test_page_ops() {
    let (disk, fs) = mkfs(64, 32);
    let file = resolve(&fs, "/paged", OpenFlags::CREATE, None).unwrap();
    fs.write(&file, 2 * BLOCK_SIZE, b"end").unwrap();
    assert_eq!(fs.stat(&file).unwrap().blocks, 1);

    let mut page = [0xffu8; BLOCK_SIZE];
    fs.fill_page(&file, 0, &mut page).unwrap();
    assert!(page.iter().all(|&b| b == 0));
    assert_eq!(fs.flush_page(&file, 0, &page), Err(Error::InvalidArgument));

    fs.mark_page_dirty(&file, 0).unwrap();
    assert_eq!(fs.stat(&file).unwrap().blocks, 2);

    page.fill(0xab);
    fs.flush_page(&file, 0, &page).unwrap();
    let block = fs.get_inode(file.ino()).unwrap().direct_ptrs[0];
    let mut raw = [0u8; BLOCK_SIZE];
    disk.read_block(block, &mut raw).unwrap();
    assert!(raw.iter().all(|&b| b == 0xab));

    let mut buf = vec![0u8; BLOCK_SIZE];
    assert_eq!(fs.read(&file, 0, &mut buf).unwrap(), BLOCK_SIZE);
    assert!(buf.iter().all(|&b| b == 0xab));

    let mut again = [0u8; BLOCK_SIZE];
    fs.fill_page(&file, 2 * BLOCK_SIZE + 1, &mut again).unwrap();
    assert_eq!(&again[..3], b"end");

    fs.vput(file).unwrap();
    fs.unmount(true).unwrap();
}
