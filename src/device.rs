//! Device identifiers and the lookup capability used by device vnodes and `mount_by_name`.

use alloc::sync::Arc;
use core::fmt;

use crate::{BlockDevice, Result};

/// Major number under which disks are registered.
pub const DISK_MAJOR: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevId(u32);

impl DevId {
    pub const fn new(major: u8, minor: u8) -> Self {
        DevId(((major as u32) << 8) | minor as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        DevId(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn major(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn minor(&self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Byte-oriented device reached through a char-device vnode.
pub trait CharDevice: Send + Sync {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, offset: usize, buf: &[u8]) -> Result<usize>;
}

/// Resolves device ids to live driver handles.
pub trait DeviceRegistry: Send + Sync {
    fn block_device(&self, id: DevId) -> Option<Arc<dyn BlockDevice>>;

    fn char_device(&self, id: DevId) -> Option<Arc<dyn CharDevice>>;
}

/// Parses a disk name of the form `diskN` into its device id.
pub fn parse_disk_name(name: &str) -> Option<DevId> {
    let minor = name.strip_prefix("disk")?;
    if minor.is_empty() || !minor.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    minor.parse::<u8>().ok().map(|minor| DevId::new(DISK_MAJOR, minor))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_devid_parts() {
        let id = DevId::new(2, 7);
        assert_eq!(id.major(), 2);
        assert_eq!(id.minor(), 7);
        assert_eq!(DevId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_parse_disk_name() {
        assert_eq!(parse_disk_name("disk0"), Some(DevId::new(DISK_MAJOR, 0)));
        assert_eq!(parse_disk_name("disk12"), Some(DevId::new(DISK_MAJOR, 12)));
        assert_eq!(parse_disk_name("disk"), None);
        assert_eq!(parse_disk_name("disk-1"), None);
        assert_eq!(parse_disk_name("tty0"), None);
        assert_eq!(parse_disk_name("disk999"), None);
    }
}
