// SPDX-License-Identifier: MPL-2.0

//! The file-system driver registry.
//!
//! Each driver registers a name, a probe predicate and a superblock
//! factory. Mount looks drivers up by name; probing asks each driver in
//! registration order whether it recognizes a device.

use crate::device::DeviceId;
use crate::fs::utils::FileSystem;
use crate::prelude::*;

/// One registered file-system driver.
pub trait FsType: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the driver recognizes the on-device format.
    fn can_mount(&self, device: DeviceId) -> bool;

    /// Builds a superblock for the given device. In-memory file systems
    /// accept `None`.
    fn create_fs(&self, device: Option<DeviceId>) -> Result<Arc<dyn FileSystem>>;
}

static FS_TYPES: SpinLock<Vec<Arc<dyn FsType>>> = SpinLock::new(Vec::new());

/// Registers a driver. A name can only be registered once.
pub fn register(fs_type: Arc<dyn FsType>) -> Result<()> {
    let mut types = FS_TYPES.lock();
    if types.iter().any(|t| t.name() == fs_type.name()) {
        return_errno_with_message!(Errno::EEXIST, "file-system name already registered");
    }
    types.push(fs_type);
    Ok(())
}

/// Looks a driver up by name.
pub fn lookup(name: &str) -> Result<Arc<dyn FsType>> {
    FS_TYPES
        .lock()
        .iter()
        .find(|t| t.name() == name)
        .cloned()
        .ok_or(Error::with_message(Errno::ENODEV, "unknown file system"))
}

/// Returns the first driver whose probe accepts the device.
pub fn probe(device: DeviceId) -> Option<Arc<dyn FsType>> {
    FS_TYPES
        .lock()
        .iter()
        .find(|t| t.can_mount(device))
        .cloned()
}
