//! In-memory vnodes.
//! A vnode wraps one inode number and a copy of the inode guarded by the per-vnode lock. Its
//! operation set is chosen from the inode type when the vnode is first materialized.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::{Mutex, MutexGuard};

use crate::device::{CharDevice, DevId};
use crate::{BlockDevice, Error, FileType, Inode, Result};

bitflags! {
    /// Operations a vnode supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VnodeOps: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const MKNOD = 1 << 3;
        const LOOKUP = 1 << 4;
        const LINK = 1 << 5;
        const UNLINK = 1 << 6;
        const MKDIR = 1 << 7;
        const RMDIR = 1 << 8;
        const READDIR = 1 << 9;
        const STAT = 1 << 10;
        const FILL_PAGE = 1 << 11;
        const DIRTY_PAGE = 1 << 12;
        const FLUSH_PAGE = 1 << 13;
    }
}

impl VnodeOps {
    const PAGE: Self = Self::FILL_PAGE.union(Self::DIRTY_PAGE).union(Self::FLUSH_PAGE);

    pub const DIRECTORY: Self = Self::CREATE
        .union(Self::MKNOD)
        .union(Self::LOOKUP)
        .union(Self::LINK)
        .union(Self::UNLINK)
        .union(Self::MKDIR)
        .union(Self::RMDIR)
        .union(Self::READDIR)
        .union(Self::STAT)
        .union(Self::PAGE);

    pub const REGULAR: Self = Self::READ.union(Self::WRITE).union(Self::STAT).union(Self::PAGE);

    pub const CHAR_DEVICE: Self = Self::READ.union(Self::WRITE).union(Self::STAT);

    pub const BLOCK_DEVICE: Self = Self::STAT;

    /// Operations that only make sense on a directory.
    const DIRECTORY_ONLY: Self = Self::CREATE
        .union(Self::MKNOD)
        .union(Self::LOOKUP)
        .union(Self::LINK)
        .union(Self::UNLINK)
        .union(Self::MKDIR)
        .union(Self::RMDIR)
        .union(Self::READDIR);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Regular,
    Directory,
    CharDevice(DevId),
    BlockDevice(DevId),
}

impl VnodeKind {
    /// Kind for a live inode; free inodes have no vnode.
    pub fn of(inode: &Inode) -> Result<Self> {
        match inode.file_type()? {
            FileType::Free => Err(Error::Corrupt),
            FileType::Data => Ok(VnodeKind::Regular),
            FileType::Directory => Ok(VnodeKind::Directory),
            FileType::CharDevice => Ok(VnodeKind::CharDevice(inode.devid())),
            FileType::BlockDevice => Ok(VnodeKind::BlockDevice(inode.devid())),
        }
    }

    pub fn ops(&self) -> VnodeOps {
        match self {
            VnodeKind::Regular => VnodeOps::REGULAR,
            VnodeKind::Directory => VnodeOps::DIRECTORY,
            VnodeKind::CharDevice(_) => VnodeOps::CHAR_DEVICE,
            VnodeKind::BlockDevice(_) => VnodeOps::BLOCK_DEVICE,
        }
    }
}

/// Driver handle resolved from a device inode's id.
#[derive(Clone)]
pub enum DeviceHandle {
    Char(Arc<dyn CharDevice>),
    Block(Arc<dyn BlockDevice>),
}

pub struct Vnode {
    ino: u32,
    kind: VnodeKind,
    ops: VnodeOps,
    pub(crate) refcount: AtomicUsize,
    inode: Mutex<Inode>,
    device: Option<DeviceHandle>,
}

impl Vnode {
    pub(crate) fn new(inode: Inode, kind: VnodeKind, device: Option<DeviceHandle>) -> Self {
        Vnode {
            ino: inode.id,
            kind,
            ops: kind.ops(),
            refcount: AtomicUsize::new(1),
            inode: Mutex::new(inode),
            device,
        }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn kind(&self) -> VnodeKind {
        self.kind
    }

    pub fn ops(&self) -> VnodeOps {
        self.ops
    }

    pub fn is_dir(&self) -> bool {
        self.kind == VnodeKind::Directory
    }

    /// Current byte length of the underlying inode.
    pub fn len(&self) -> usize {
        self.inode.lock().size as usize
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn devid(&self) -> Option<DevId> {
        match self.kind {
            VnodeKind::CharDevice(id) | VnodeKind::BlockDevice(id) => Some(id),
            _ => None,
        }
    }

    pub fn char_device(&self) -> Option<&Arc<dyn CharDevice>> {
        match &self.device {
            Some(DeviceHandle::Char(dev)) => Some(dev),
            _ => None,
        }
    }

    pub fn block_device(&self) -> Option<&Arc<dyn BlockDevice>> {
        match &self.device {
            Some(DeviceHandle::Block(dev)) => Some(dev),
            _ => None,
        }
    }

    /// Takes the per-vnode lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inode> {
        self.inode.lock()
    }

    /// Fails with the errno the VFS expects when `op` is missing from this vnode's set.
    pub(crate) fn require(&self, op: VnodeOps) -> Result<()> {
        if self.ops.contains(op) {
            return Ok(());
        }
        if VnodeOps::DIRECTORY_ONLY.contains(op) {
            Err(Error::NotDirectory)
        } else if self.is_dir() && (op == VnodeOps::READ || op == VnodeOps::WRITE) {
            Err(Error::IsDirectory)
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("ino", &self.ino)
            .field("kind", &self.kind)
            .field("refcount", &self.refcount())
            .field("device", &self.device.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: VnodeKind,
    pub ino: u32,
    /// Directory entries naming the inode.
    pub nlink: u32,
    pub size: usize,
    pub blksize: usize,
    /// Disk blocks held, indirect block included; sparse blocks are not counted.
    pub blocks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    pub ino: u32,
    pub name: String,
    /// Byte offset of the record inside the directory.
    pub offset: usize,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::FREE_INODE_END;

    #[test]
    fn test_ops_per_kind() {
        assert!(VnodeKind::Directory.ops().contains(VnodeOps::LOOKUP));
        assert!(!VnodeKind::Directory.ops().contains(VnodeOps::READ));
        assert!(VnodeKind::Regular.ops().contains(VnodeOps::WRITE));
        assert!(!VnodeKind::Regular.ops().contains(VnodeOps::MKDIR));
        assert_eq!(VnodeKind::BlockDevice(DevId::new(1, 0)).ops(), VnodeOps::STAT);
    }

    #[test]
    fn test_missing_op_errors() {
        let mut inode = Inode::free(4, FREE_INODE_END);
        inode.ftype = FileType::Data as u16;
        let file = Vnode::new(inode, VnodeKind::Regular, None);
        assert_eq!(file.require(VnodeOps::LOOKUP), Err(Error::NotDirectory));
        assert_eq!(file.require(VnodeOps::READ), Ok(()));

        inode.ftype = FileType::Directory as u16;
        let dir = Vnode::new(inode, VnodeKind::Directory, None);
        assert_eq!(dir.require(VnodeOps::WRITE), Err(Error::IsDirectory));

        let blk = Vnode::new(inode, VnodeKind::BlockDevice(DevId::new(1, 2)), None);
        assert_eq!(blk.require(VnodeOps::READ), Err(Error::InvalidArgument));
        assert_eq!(blk.devid(), Some(DevId::new(1, 2)));
    }

    #[test]
    fn test_free_inode_has_no_kind() {
        let inode = Inode::free(1, FREE_INODE_END);
        assert_eq!(VnodeKind::of(&inode), Err(Error::Corrupt));
    }
}
