//! Path resolution and the path-level operations built on it.
//! Paths are walked one component at a time through `lookup`; every vnode picked up
//! on the way is released before returning.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::config::MAX_FILE_NAME_LEN;
use crate::device::DevId;
use crate::fs::FileSystem;
use crate::vnode::{Stat, Vnode, VnodeOps};
use crate::{BlockDevice, Error, FileType, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Create a regular file if the last component is missing.
        const CREATE = 1 << 0;
        /// With `CREATE`, fail if the file already exists.
        const EXCL = 1 << 1;
    }
}

/// Non-empty components of `path`; repeated separators collapse.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn check_len(name: &str) -> Result<()> {
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// Releases `vnode` after `result` was computed with it, keeping the first error.
fn release<D: BlockDevice + ?Sized, T>(
    fs: &FileSystem<D>,
    vnode: Arc<Vnode>,
    result: Result<T>,
) -> Result<T> {
    let released = fs.vput(vnode);
    let value = result?;
    released.map(|_| value)
}

/// Looks `name` up in `dir`. "." is `dir` itself and needs no disk access; every other name goes
/// to the filesystem.
pub fn lookup<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    dir: &Arc<Vnode>,
    name: &str,
) -> Result<Arc<Vnode>> {
    dir.require(VnodeOps::LOOKUP)?;
    if name == "." {
        return Ok(fs.vref(dir));
    }
    fs.lookup(dir, name)
}

/// Walks to the directory containing the last component of `path`.
/// Absolute paths start at the root, relative ones at `base` (the root if `None`). A path made of
/// separators only names the start directory itself, returned with the basename ".".
pub fn resolve_parent<'p, D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &'p str,
    base: Option<&Arc<Vnode>>,
) -> Result<(Arc<Vnode>, &'p str)> {
    if path.is_empty() {
        return Err(Error::NotFound);
    }
    let mut dir = match base {
        Some(base) if !path.starts_with('/') => fs.vref(base),
        _ => fs.root()?,
    };

    let mut parts = components(path).peekable();
    let mut basename = ".";
    while let Some(name) = parts.next() {
        if let Err(e) = check_len(name) {
            return release(fs, dir, Err(e));
        }
        if parts.peek().is_none() {
            basename = name;
            break;
        }
        let next = lookup(fs, &dir, name);
        fs.vput(dir)?;
        dir = next?;
    }

    if !dir.is_dir() {
        return release(fs, dir, Err(Error::NotDirectory));
    }
    Ok((dir, basename))
}

/// Runs `op` on the parent directory of `path` and its basename.
fn with_parent<D: BlockDevice + ?Sized, T>(
    fs: &FileSystem<D>,
    path: &str,
    base: Option<&Arc<Vnode>>,
    op: impl FnOnce(&Arc<Vnode>, &str) -> Result<T>,
) -> Result<T> {
    let (dir, name) = resolve_parent(fs, path, base)?;
    let result = op(&dir, name);
    release(fs, dir, result)
}

/// Resolves `path` to a vnode, creating a regular file when `flags` asks for it.
pub fn resolve<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    flags: OpenFlags,
    base: Option<&Arc<Vnode>>,
) -> Result<Arc<Vnode>> {
    with_parent(fs, path, base, |dir, name| match lookup(fs, dir, name) {
        Ok(vnode) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) => {
            release(fs, vnode, Err(Error::AlreadyExists))
        }
        Ok(vnode) => Ok(vnode),
        Err(Error::NotFound) if flags.contains(OpenFlags::CREATE) => fs.create(dir, name),
        Err(e) => Err(e),
    })
}

pub fn mkdir<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    with_parent(fs, path, base, |dir, name| fs.mkdir(dir, name))
}

pub fn rmdir<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    with_parent(fs, path, base, |dir, name| fs.rmdir(dir, name))
}

pub fn unlink<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    with_parent(fs, path, base, |dir, name| fs.unlink(dir, name))
}

/// Makes `to` another name for the file at `from`.
pub fn link<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    from: &str,
    to: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    let target = resolve(fs, from, OpenFlags::empty(), base)?;
    let result = with_parent(fs, to, base, |dir, name| fs.link(&target, dir, name));
    release(fs, target, result)
}

/// Links `to` and then unlinks `from`. Directories cannot be renamed.
pub fn rename<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    from: &str,
    to: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    link(fs, from, to, base)?;
    unlink(fs, from, base)
}

pub fn mknod<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    ftype: FileType,
    devid: DevId,
    base: Option<&Arc<Vnode>>,
) -> Result<()> {
    with_parent(fs, path, base, |dir, name| fs.mknod(dir, name, ftype, devid))
}

pub fn stat<D: BlockDevice + ?Sized>(
    fs: &FileSystem<D>,
    path: &str,
    base: Option<&Arc<Vnode>>,
) -> Result<Stat> {
    let vnode = resolve(fs, path, OpenFlags::empty(), base)?;
    let result = fs.stat(&vnode);
    release(fs, vnode, result)
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_components() {
        assert_eq!(components("/a//b/c/").collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(components("a").collect::<Vec<_>>(), ["a"]);
        assert_eq!(components("///").count(), 0);
    }

    #[test]
    fn test_check_len() {
        assert_eq!(check_len("short"), Ok(()));
        let long = "x".repeat(MAX_FILE_NAME_LEN + 1);
        assert_eq!(check_len(&long), Err(Error::NameTooLong));
    }
}
