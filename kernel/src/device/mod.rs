// SPDX-License-Identifier: MPL-2.0

//! The character and block device registry.
//!
//! Drivers register an operation table under a major number; minors are
//! the driver's business. Device inodes carry the encoded id in their
//! `rdev` metadata field.

use crate::fs::utils::StatusFlags;
use crate::prelude::*;

/// A device id: major number addressing the driver, minor number
/// addressing the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl DeviceId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn as_encoded_u64(self) -> u64 {
        ((self.major as u64) << 32) | self.minor as u64
    }

    pub const fn from_encoded_u64(encoded: u64) -> Self {
        Self {
            major: (encoded >> 32) as u32,
            minor: encoded as u32,
        }
    }
}

/// The operation table of a character device driver.
pub trait CharDevice: Any + Send + Sync {
    fn open(&self, minor: u32) -> Result<()>;

    /// May block; never invoked under a spin lock.
    fn close(&self, minor: u32) -> Result<()>;

    fn read(&self, minor: u32, buf: &mut [u8], flags: StatusFlags) -> Result<usize>;

    fn write(&self, minor: u32, buf: &[u8]) -> Result<usize>;

    /// Informs the driver of a new file position. Most character devices
    /// ignore it.
    fn seek(&self, minor: u32, position: usize) -> Result<()> {
        let (_, _) = (minor, position);
        Ok(())
    }
}

/// The operation table of a block device driver.
pub trait BlockDevice: Any + Send + Sync {
    fn read_blocks(&self, minor: u32, block: u64, count: usize, buf: &mut [u8]) -> Result<()>;

    fn write_blocks(&self, minor: u32, block: u64, count: usize, buf: &[u8]) -> Result<()>;
}

struct CharRegistration {
    name: &'static str,
    ops: Arc<dyn CharDevice>,
}

struct BlockRegistration {
    name: &'static str,
    ops: Arc<dyn BlockDevice>,
}

static CHAR_DEVICES: SpinLock<BTreeMap<u32, CharRegistration>> = SpinLock::new(BTreeMap::new());
static BLOCK_DEVICES: SpinLock<BTreeMap<u32, BlockRegistration>> = SpinLock::new(BTreeMap::new());

/// Registers a character device driver under `major`.
pub fn register_char(major: u32, name: &'static str, ops: Arc<dyn CharDevice>) -> Result<()> {
    let mut devices = CHAR_DEVICES.lock();
    if devices.contains_key(&major) {
        return_errno_with_message!(Errno::EEXIST, "char major already registered");
    }
    devices.insert(major, CharRegistration { name, ops });
    Ok(())
}

/// Registers a block device driver under `major`.
pub fn register_block(major: u32, name: &'static str, ops: Arc<dyn BlockDevice>) -> Result<()> {
    let mut devices = BLOCK_DEVICES.lock();
    if devices.contains_key(&major) {
        return_errno_with_message!(Errno::EEXIST, "block major already registered");
    }
    devices.insert(major, BlockRegistration { name, ops });
    Ok(())
}

/// Returns the character driver registered under `major`.
pub fn char_device(major: u32) -> Result<Arc<dyn CharDevice>> {
    CHAR_DEVICES
        .lock()
        .get(&major)
        .map(|reg| reg.ops.clone())
        .ok_or(Error::with_message(Errno::ENODEV, "no such char device"))
}

/// Returns the block driver registered under `major`.
pub fn block_device(major: u32) -> Result<Arc<dyn BlockDevice>> {
    BLOCK_DEVICES
        .lock()
        .get(&major)
        .map(|reg| reg.ops.clone())
        .ok_or(Error::with_message(Errno::ENODEV, "no such block device"))
}

/// Looks a character driver up by its registered name.
pub fn char_device_by_name(name: &str) -> Option<(u32, Arc<dyn CharDevice>)> {
    CHAR_DEVICES
        .lock()
        .iter()
        .find(|(_, reg)| reg.name == name)
        .map(|(major, reg)| (*major, reg.ops.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_round_trips() {
        let id = DeviceId::new(4, 65);
        assert_eq!(DeviceId::from_encoded_u64(id.as_encoded_u64()), id);
    }
}
