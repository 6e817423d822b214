//! The filesystem adapter: vnode lifecycle and the vnode operations the VFS calls.
//!
//! Every resident vnode holds one extra link on its inode, taken in `vget` when the vnode is
//! materialized and dropped in `vput` when the last reference goes away. An inode whose link
//! count reaches zero at that point is freed.
//!
//! Vnode locks are taken parent before child and may be held while the vnode table is consulted.
//! The table lock itself only ever waits on the lock of a vnode nobody references any more. Below
//! the vnodes come the superblock, the cache frame table and the frame bytes, in that order.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use log::{debug, info, warn};
use spin::Mutex;

use crate::cache::PageCache;
use crate::config::*;
use crate::device::{parse_disk_name, DevId, DeviceRegistry};
use crate::directory::*;
use crate::file::{fread, fwrite};
use crate::freelist::{count_free_blocks, free_block};
use crate::inode::*;
use crate::superblock::{check_superblock, Volume};
use crate::vnode::{DeviceHandle, DirEnt, Stat, Vnode, VnodeKind, VnodeOps};
use crate::{BlockDevice, DirEntry, Error, FileType, Inode, Result, SuperBlock};

/// Knobs for `mount_with` and `format_with`.
#[derive(Clone)]
pub struct MountOptions {
    /// Frames the page cache keeps before it starts evicting.
    pub cache_frames: usize,
    /// Where device inodes find their drivers.
    pub devices: Option<Arc<dyn DeviceRegistry>>,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            cache_frames: DEFAULT_CACHE_FRAMES,
            devices: None,
        }
    }
}

/// Block and inode accounting for a mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total_blocks: u32,
    /// Superblock plus inode table.
    pub metadata_blocks: u32,
    pub free_blocks: u32,
    /// Blocks referenced by live inodes, indirect blocks included.
    pub used_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
}

pub struct FileSystem<D: BlockDevice + ?Sized> {
    volume: Volume<D>,
    vnodes: Mutex<BTreeMap<u32, Arc<Vnode>>>,
    root_ino: u32,
    devices: Option<Arc<dyn DeviceRegistry>>,
}

impl<D: BlockDevice + ?Sized> FileSystem<D> {
    /// Lays out a fresh filesystem with `num_inodes` inodes and mounts it.
    pub fn format(device: Arc<D>, num_inodes: u32) -> Result<Self> {
        Self::format_with(device, num_inodes, MountOptions::default())
    }

    pub fn format_with(device: Arc<D>, num_inodes: u32, options: MountOptions) -> Result<Self> {
        if num_inodes == 0 {
            return Err(Error::InvalidArgument);
        }
        let cache = PageCache::new(device, options.cache_frames);
        let volume = Volume::create(cache, SuperBlock::new(num_inodes))?;

        // Inode table: every inode free, chained in ascending order.
        for block_id in INODE_TABLE_START..volume.data_start() {
            volume.cache().get_zeroed(block_id)?;
        }
        for inode_id in 0..num_inodes {
            let next = if inode_id + 1 < num_inodes { inode_id + 1 } else { FREE_INODE_END };
            write_inode(&volume, &Inode::free(inode_id, next))?;
        }
        {
            let mut superblock = volume.lock_super();
            superblock.free_inode = 0;
            volume.dirty_super(&superblock);
        }

        // Freed in descending order so allocation hands out low blocks first.
        for block_id in (volume.data_start()..volume.num_blocks()).rev() {
            free_block(&volume, block_id)?;
        }

        let root_ino = alloc_inode(&volume, FileType::Directory, None)?;
        if root_ino != ROOT_INODE_ID {
            return Err(Error::Corrupt);
        }
        let mut root = get_inode(&volume, root_ino)?;
        dir_add_entry(&volume, &mut root, DOT_NAME, LinkTarget::Itself)?;
        dir_add_entry(&volume, &mut root, DOTDOT_NAME, LinkTarget::Itself)?;
        // ".." of the root is not a link from a parent.
        root.links_cnt -= 1;
        write_inode(&volume, &root)?;
        volume.sync()?;

        info!(
            "formatted {} blocks: {} inodes, data from block {}",
            volume.num_blocks(),
            num_inodes,
            volume.data_start()
        );
        Self::attach(volume, options.devices)
    }

    pub fn mount(device: Arc<D>) -> Result<Self> {
        Self::mount_with(device, MountOptions::default())
    }

    pub fn mount_with(device: Arc<D>, options: MountOptions) -> Result<Self> {
        let cache = PageCache::new(device, options.cache_frames);
        let volume = Volume::open(cache)?;
        info!(
            "mounted {} blocks, {} inodes",
            volume.num_blocks(),
            volume.num_inodes()
        );
        Self::attach(volume, options.devices)
    }

    /// Wraps a volume and takes the mount's hold on the root vnode.
    fn attach(volume: Volume<D>, devices: Option<Arc<dyn DeviceRegistry>>) -> Result<Self> {
        let root_ino = volume.superblock().root_inode;
        let fs = FileSystem {
            volume,
            vnodes: Mutex::new(BTreeMap::new()),
            root_ino,
            devices,
        };
        let root = fs.vget(root_ino)?;
        if !root.is_dir() {
            return Err(Error::Corrupt);
        }
        Ok(fs)
    }

    /// Drops the mount's root hold and writes everything back.
    /// With `check`, the link-count walk runs first; an inconsistent filesystem is still flushed
    /// but reported as `Corrupt`. Vnodes the caller still holds are released on disk and reported
    /// as `Busy`.
    pub fn unmount(self, check: bool) -> Result<()> {
        let mut consistent = true;
        if check {
            match self.check_refcounts() {
                Ok(true) => {}
                Ok(false) => consistent = false,
                Err(e) => {
                    warn!("link count walk failed: {}", e);
                    consistent = false;
                }
            }
        }
        if let Err(e) = check_superblock(&self.volume.superblock()) {
            warn!("superblock failed validation at unmount: {}", e);
            consistent = false;
        }

        let mut released = Ok(());
        let root = self.vnodes.lock().get(&self.root_ino).cloned();
        if let Some(root) = root {
            released = self.vput(root);
        }

        // Vnodes still held by callers give up their hold on disk; the handles become inert.
        let leaked: Vec<Arc<Vnode>> = core::mem::take(&mut *self.vnodes.lock()).into_values().collect();
        if !leaked.is_empty() {
            warn!("{} vnodes still referenced at unmount", leaked.len());
        }
        for vnode in leaked.iter() {
            let dropped = self.drop_hold(vnode);
            if released.is_ok() {
                released = dropped;
            }
        }

        let synced = self.volume.sync();
        info!("unmounted");
        released?;
        synced?;
        if !leaked.is_empty() {
            return Err(Error::Busy);
        }
        if consistent { Ok(()) } else { Err(Error::Corrupt) }
    }

    /// Writes back every dirty block.
    pub fn sync(&self) -> Result<()> {
        self.volume.sync()
    }

    pub fn superblock(&self) -> SuperBlock {
        self.volume.superblock()
    }

    pub fn root_ino(&self) -> u32 {
        self.root_ino
    }

    pub fn cache(&self) -> &PageCache<D> {
        self.volume.cache()
    }

    // ---- vnode lifecycle ----

    /// Returns the vnode for `ino`, materializing it from disk if it is not resident.
    pub fn vget(&self, ino: u32) -> Result<Arc<Vnode>> {
        let mut vnodes = self.vnodes.lock();
        if let Some(vnode) = vnodes.get(&ino) {
            vnode.refcount.fetch_add(1, Ordering::AcqRel);
            return Ok(Arc::clone(vnode));
        }

        let mut inode = get_inode(&self.volume, ino)?;
        let kind = VnodeKind::of(&inode)?;
        inode.links_cnt = inode.links_cnt.checked_add(1).ok_or(Error::Corrupt)?;
        write_inode(&self.volume, &inode)?;

        let vnode = Arc::new(Vnode::new(inode, kind, self.device_for(kind)));
        vnodes.insert(ino, Arc::clone(&vnode));
        debug!("[vget] materialized inode {} as {:?}", ino, kind);
        Ok(vnode)
    }

    /// Takes another reference on an already held vnode.
    pub fn vref(&self, vnode: &Arc<Vnode>) -> Arc<Vnode> {
        let _vnodes = self.vnodes.lock();
        vnode.refcount.fetch_add(1, Ordering::AcqRel);
        Arc::clone(vnode)
    }

    /// Releases a reference. The last release drops the vnode's hold on the inode and frees the
    /// inode if no directory entry names it any more.
    pub fn vput(&self, vnode: Arc<Vnode>) -> Result<()> {
        let mut vnodes = self.vnodes.lock();
        let prev = vnode.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "vput of released vnode {}", vnode.ino());
        if prev > 1 {
            return Ok(());
        }
        vnodes.remove(&vnode.ino());
        self.drop_hold(&vnode)
    }

    /// Takes the vnode's hold off its inode, freeing the inode if nothing else links it.
    fn drop_hold(&self, vnode: &Vnode) -> Result<()> {
        let mut inode = vnode.lock();
        inode.links_cnt = inode.links_cnt.saturating_sub(1);
        if inode.links_cnt == 0 {
            free_inode(&self.volume, &mut inode)
        } else {
            write_inode(&self.volume, &inode)
        }
    }

    pub fn root(&self) -> Result<Arc<Vnode>> {
        self.vget(self.root_ino)
    }

    /// Number of vnodes currently in the table.
    pub fn resident_vnodes(&self) -> usize {
        self.vnodes.lock().len()
    }

    /// Current copy of an inode: the resident vnode's if there is one, otherwise the table's.
    pub fn get_inode(&self, ino: u32) -> Result<Inode> {
        let resident = self.vnodes.lock().get(&ino).cloned();
        match resident {
            Some(vnode) => {
                let inode = *vnode.lock();
                Ok(inode)
            }
            None => get_inode(&self.volume, ino),
        }
    }

    fn device_for(&self, kind: VnodeKind) -> Option<DeviceHandle> {
        let devices = self.devices.as_ref()?;
        match kind {
            VnodeKind::CharDevice(id) => devices.char_device(id).map(DeviceHandle::Char),
            VnodeKind::BlockDevice(id) => devices.block_device(id).map(DeviceHandle::Block),
            _ => None,
        }
    }

    // ---- vnode operations ----

    pub fn read(&self, vnode: &Vnode, offset: usize, buf: &mut [u8]) -> Result<usize> {
        vnode.require(VnodeOps::READ)?;
        if let VnodeKind::CharDevice(_) = vnode.kind() {
            return vnode.char_device().ok_or(Error::NoDevice)?.read(offset, buf);
        }
        let inode = vnode.lock();
        fread(&self.volume, &inode, offset, buf)
    }

    pub fn write(&self, vnode: &Vnode, offset: usize, buf: &[u8]) -> Result<usize> {
        vnode.require(VnodeOps::WRITE)?;
        if let VnodeKind::CharDevice(_) = vnode.kind() {
            return vnode.char_device().ok_or(Error::NoDevice)?.write(offset, buf);
        }
        let mut inode = vnode.lock();
        fwrite(&self.volume, &mut inode, offset, buf)
    }

    /// Creates an empty regular file called `name` in `dir` and returns its vnode.
    pub fn create(&self, dir: &Vnode, name: &str) -> Result<Arc<Vnode>> {
        dir.require(VnodeOps::CREATE)?;
        let mut dir_inode = dir.lock();
        self.make_node(&mut dir_inode, name.as_bytes(), FileType::Data, None)
    }

    /// Creates a device special file. `ftype` must be one of the device types.
    pub fn mknod(&self, dir: &Vnode, name: &str, ftype: FileType, devid: DevId) -> Result<()> {
        dir.require(VnodeOps::MKNOD)?;
        if !ftype.is_device() {
            return Err(Error::InvalidArgument);
        }
        let mut dir_inode = dir.lock();
        let vnode = self.make_node(&mut dir_inode, name.as_bytes(), ftype, Some(devid))?;
        drop(dir_inode);
        self.vput(vnode)
    }

    /// Allocates an inode and links it into the locked directory.
    /// On a failed link the fresh vnode is released, which frees the inode again.
    fn make_node(
        &self,
        dir_inode: &mut Inode,
        name: &[u8],
        ftype: FileType,
        devid: Option<DevId>,
    ) -> Result<Arc<Vnode>> {
        validate_name(name)?;
        ensure_absent(&self.volume, dir_inode, name)?;

        let ino = alloc_inode(&self.volume, ftype, devid)?;
        let vnode = self.vget(ino)?;
        let linked = {
            let mut inode = vnode.lock();
            dir_add_entry(&self.volume, dir_inode, name, LinkTarget::Other(&mut *inode))
        };
        match linked {
            Ok(()) => Ok(vnode),
            Err(e) => {
                self.vput(vnode)?;
                Err(e)
            }
        }
    }

    pub fn lookup(&self, dir: &Vnode, name: &str) -> Result<Arc<Vnode>> {
        dir.require(VnodeOps::LOOKUP)?;
        let dir_inode = dir.lock();
        let ino = dir_lookup(&self.volume, &dir_inode, name.as_bytes())?;
        self.vget(ino)
    }

    /// Adds `name` in `dir` as another link to `target`. Directories cannot be linked.
    pub fn link(&self, target: &Vnode, dir: &Vnode, name: &str) -> Result<()> {
        dir.require(VnodeOps::LINK)?;
        if target.is_dir() {
            return Err(Error::IsDirectory);
        }
        let mut dir_inode = dir.lock();
        let mut target_inode = target.lock();
        dir_add_entry(&self.volume, &mut dir_inode, name.as_bytes(), LinkTarget::Other(&mut *target_inode))
    }

    /// Removes a non-directory entry. The inode goes away once nothing references it.
    pub fn unlink(&self, dir: &Vnode, name: &str) -> Result<()> {
        dir.require(VnodeOps::UNLINK)?;
        let mut dir_inode = dir.lock();
        let ino = dir_lookup(&self.volume, &dir_inode, name.as_bytes())?;
        let target = self.vget(ino)?;
        let removed = self.unlink_locked(&mut dir_inode, &target, name.as_bytes());
        drop(dir_inode);
        let released = self.vput(target);
        removed.and(released)
    }

    fn unlink_locked(&self, dir_inode: &mut Inode, target: &Vnode, name: &[u8]) -> Result<()> {
        if target.is_dir() {
            return Err(Error::IsDirectory);
        }
        dir_rm_entry(&self.volume, dir_inode, name)?;
        let mut inode = target.lock();
        inode.links_cnt = inode.links_cnt.saturating_sub(1);
        write_inode(&self.volume, &inode)
    }

    /// Creates an empty directory called `name` in `dir`.
    /// A failure part way through can leave the new inode or the parent with extra links; the
    /// link-count walk reports those.
    pub fn mkdir(&self, dir: &Vnode, name: &str) -> Result<()> {
        dir.require(VnodeOps::MKDIR)?;
        let name = name.as_bytes();
        validate_name(name)?;
        let mut dir_inode = dir.lock();
        ensure_absent(&self.volume, &dir_inode, name)?;

        let ino = alloc_inode(&self.volume, FileType::Directory, None)?;
        let child = self.vget(ino)?;
        let populated = self.populate_dir(&mut dir_inode, &child, name);
        drop(dir_inode);
        let released = self.vput(child);
        populated.and(released)
    }

    fn populate_dir(&self, dir_inode: &mut Inode, child: &Vnode, name: &[u8]) -> Result<()> {
        let mut child_inode = child.lock();
        dir_add_entry(&self.volume, &mut child_inode, DOT_NAME, LinkTarget::Itself)?;
        dir_add_entry(&self.volume, &mut child_inode, DOTDOT_NAME, LinkTarget::Other(&mut *dir_inode))?;
        dir_add_entry(&self.volume, dir_inode, name, LinkTarget::Other(&mut *child_inode))?;
        // "." does not count as a link.
        child_inode.links_cnt -= 1;
        write_inode(&self.volume, &child_inode)
    }

    /// Removes the empty directory `name` from `dir`.
    pub fn rmdir(&self, dir: &Vnode, name: &str) -> Result<()> {
        dir.require(VnodeOps::RMDIR)?;
        let name = name.as_bytes();
        if name == DOT_NAME {
            return Err(Error::InvalidArgument);
        }
        if name == DOTDOT_NAME {
            return Err(Error::DirectoryNotEmpty);
        }
        let mut dir_inode = dir.lock();
        let ino = dir_lookup(&self.volume, &dir_inode, name)?;
        let target = self.vget(ino)?;
        let removed = self.rmdir_locked(&mut dir_inode, &target, name);
        drop(dir_inode);
        let released = self.vput(target);
        removed.and(released)
    }

    fn rmdir_locked(&self, dir_inode: &mut Inode, target: &Vnode, name: &[u8]) -> Result<()> {
        if !target.is_dir() {
            return Err(Error::NotDirectory);
        }
        let mut inode = target.lock();
        if !dir_is_empty(&inode) {
            return Err(Error::DirectoryNotEmpty);
        }
        dir_rm_entry(&self.volume, dir_inode, name)?;
        inode.links_cnt = inode.links_cnt.saturating_sub(1);
        write_inode(&self.volume, &inode)?;
        // The child's ".." is gone with it.
        dir_inode.links_cnt = dir_inode.links_cnt.saturating_sub(1);
        write_inode(&self.volume, dir_inode)
    }

    /// Returns the entry at byte `offset`, or `None` at the end of the directory.
    /// The next entry lives at `offset + DIR_ENTRY_SIZE`.
    pub fn readdir(&self, dir: &Vnode, offset: usize) -> Result<Option<DirEnt>> {
        dir.require(VnodeOps::READDIR)?;
        if offset % DIR_ENTRY_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        let dir_inode = dir.lock();
        let entry = dir_entry_at(&self.volume, &dir_inode, offset)?;
        Ok(entry.map(|entry| to_dirent(&entry, offset)))
    }

    /// Every entry of `dir`, "." and ".." included.
    pub fn read_dir(&self, dir: &Vnode) -> Result<Vec<DirEnt>> {
        dir.require(VnodeOps::READDIR)?;
        let dir_inode = dir.lock();
        let entries = read_dir(&self.volume, &dir_inode)?;
        Ok(entries
            .iter()
            .enumerate()
            .map(|(i, entry)| to_dirent(entry, i * DIR_ENTRY_SIZE))
            .collect())
    }

    pub fn stat(&self, vnode: &Vnode) -> Result<Stat> {
        vnode.require(VnodeOps::STAT)?;
        let inode = vnode.lock();
        Ok(Stat {
            kind: vnode.kind(),
            ino: vnode.ino(),
            // The resident vnode's own hold is not a directory entry.
            nlink: u32::from(inode.links_cnt).saturating_sub(1),
            size: inode.size as usize,
            blksize: BLOCK_SIZE,
            blocks: inode_blocks(&self.volume, &inode)?,
        })
    }

    // ---- page operations ----

    /// Copies the block holding byte `offset` into `page`. Sparse blocks read as zeros.
    pub fn fill_page(&self, vnode: &Vnode, offset: usize, page: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        vnode.require(VnodeOps::FILL_PAGE)?;
        let inode = vnode.lock();
        let block_id = block_of(&self.volume, &inode, offset / BLOCK_SIZE)?;
        if block_id == 0 {
            page.fill(0);
            return Ok(());
        }
        let frame = self.volume.cache().get(block_id)?;
        page.copy_from_slice(&frame.data()[..]);
        Ok(())
    }

    /// Called before a page is modified: gives the block holding `offset` real storage.
    pub fn mark_page_dirty(&self, vnode: &Vnode, offset: usize) -> Result<()> {
        vnode.require(VnodeOps::DIRTY_PAGE)?;
        let mut inode = vnode.lock();
        let block_id = bmap(&self.volume, &mut inode, offset / BLOCK_SIZE, true)?;
        write_inode(&self.volume, &inode)?;
        let frame = self.volume.cache().get(block_id)?;
        self.volume.cache().dirty(&frame);
        Ok(())
    }

    /// Writes `page` to the block holding `offset`. The block must have been dirtied first.
    pub fn flush_page(&self, vnode: &Vnode, offset: usize, page: &[u8; BLOCK_SIZE]) -> Result<()> {
        vnode.require(VnodeOps::FLUSH_PAGE)?;
        let inode = vnode.lock();
        let block_id = block_of(&self.volume, &inode, offset / BLOCK_SIZE)?;
        if block_id == 0 {
            return Err(Error::InvalidArgument);
        }
        let frame = self.volume.cache().get(block_id)?;
        frame.data().copy_from_slice(page);
        self.volume.cache().dirty(&frame);
        self.volume.cache().flush_frame(&frame)
    }

    // ---- maintenance ----

    /// Walks the tree from the root and compares how often each inode is reached against its
    /// stored link count. Returns whether every reachable inode agrees.
    pub fn check_refcounts(&self) -> Result<bool> {
        let mut reached = vec![0u32; self.volume.num_inodes() as usize];
        let mut pending = vec![self.root_ino];

        while let Some(ino) = pending.pop() {
            let count = reached.get_mut(ino as usize).ok_or(Error::Corrupt)?;
            *count += 1;
            if *count > 1 {
                continue;
            }
            let vnode = self.vget(ino)?;
            let entries = if vnode.is_dir() { self.read_dir(&vnode) } else { Ok(Vec::new()) };
            self.vput(vnode)?;
            for entry in entries? {
                if entry.name.as_bytes() != DOT_NAME {
                    pending.push(entry.ino);
                }
            }
        }
        // The walk starts by reaching the root once without an entry.
        reached[self.root_ino as usize] -= 1;

        let mut consistent = true;
        for (ino, &count) in reached.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let vnode = self.vget(ino as u32)?;
            // A resident vnode holds exactly one link, whoever references it.
            let links = u32::from(vnode.lock().links_cnt).saturating_sub(1);
            self.vput(vnode)?;
            if count != links {
                warn!("inode {}: reached {} times, link count {}", ino, count, links);
                consistent = false;
            }
        }
        if consistent {
            info!("link counts consistent");
        }
        Ok(consistent)
    }

    pub fn usage(&self) -> Result<Usage> {
        let superblock = self.volume.superblock();
        let mut used_blocks = 0;
        for ino in 0..superblock.num_inodes {
            let inode = self.get_inode(ino)?;
            if inode.file_type()? != FileType::Free {
                used_blocks += inode_blocks(&self.volume, &inode)?;
            }
        }

        let mut free_inodes = 0;
        let mut next = superblock.free_inode;
        while next != FREE_INODE_END {
            free_inodes += 1;
            if free_inodes > superblock.num_inodes {
                return Err(Error::Corrupt);
            }
            next = get_inode(&self.volume, next)?.next_free;
        }

        Ok(Usage {
            total_blocks: self.volume.num_blocks(),
            metadata_blocks: self.volume.data_start(),
            free_blocks: count_free_blocks(&self.volume)?,
            used_blocks,
            total_inodes: superblock.num_inodes,
            free_inodes,
        })
    }
}

impl FileSystem<dyn BlockDevice> {
    /// Mounts the disk named like `disk0`, looked up in `devices`.
    pub fn mount_by_name(name: &str, devices: Arc<dyn DeviceRegistry>) -> Result<Self> {
        let id = parse_disk_name(name).ok_or(Error::InvalidArgument)?;
        let device = devices.block_device(id).ok_or(Error::NoDevice)?;
        Self::mount_with(device, MountOptions { devices: Some(devices), ..MountOptions::default() })
    }
}

fn to_dirent(entry: &DirEntry, offset: usize) -> DirEnt {
    DirEnt {
        ino: entry.inode_id,
        name: String::from_utf8_lossy(entry.name_bytes()).into_owned(),
        offset,
    }
}

fn ensure_absent<D: BlockDevice + ?Sized>(volume: &Volume<D>, dir_inode: &Inode, name: &[u8]) -> Result<()> {
    match dir_lookup(volume, dir_inode, name) {
        Ok(_) => Err(Error::AlreadyExists),
        Err(Error::NotFound) => Ok(()),
        Err(e) => Err(e),
    }
}
