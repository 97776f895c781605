// SPDX-License-Identifier: MPL-2.0

//! VFS types and the file-system driver contracts.

mod fs;
mod inode;

use core::time::Duration;

pub use fs::{FileSystem, SuperBlock};
pub use inode::Inode;

use crate::prelude::*;

pub const PATH_MAX: usize = 4096;
pub const NAME_MAX: usize = 255;

/// Wall-clock timestamp for inode times.
pub fn realtime_now() -> Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
}

/// The type of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,
    Dir,
    CharDevice,
    BlockDevice,
    NamedPipe,
    Socket,
}

impl InodeType {
    pub fn is_regular_file(&self) -> bool {
        *self == InodeType::File
    }

    pub fn is_directory(&self) -> bool {
        *self == InodeType::Dir
    }
}

bitflags! {
    /// The permission bits of an inode.
    pub struct InodeMode: u16 {
        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;
        const S_IRUSR = 0o0400;
        const S_IWUSR = 0o0200;
        const S_IXUSR = 0o0100;
        const S_IRGRP = 0o0040;
        const S_IWGRP = 0o0020;
        const S_IXGRP = 0o0010;
        const S_IROTH = 0o0004;
        const S_IWOTH = 0o0002;
        const S_IXOTH = 0o0001;
    }
}

impl InodeMode {
    pub fn is_readable(&self) -> bool {
        self.contains(InodeMode::S_IRUSR)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(InodeMode::S_IWUSR)
    }
}

/// The metadata of an inode.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub dev: u64,
    pub ino: u64,
    pub size: usize,
    pub blk_size: usize,
    pub blocks: usize,
    pub atime: Duration,
    pub mtime: Duration,
    pub ctime: Duration,
    pub type_: InodeType,
    pub mode: InodeMode,
    pub nlinks: usize,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
}

/// One directory entry, as the driver reports it.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub type_: InodeType,
    pub name: String,
}

/// The position a seek is relative to.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

/// The read/write mode of an open file.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read only.
    O_RDONLY = 0,
    /// Write only.
    O_WRONLY = 1,
    /// Read and write.
    O_RDWR = 2,
}

impl AccessMode {
    pub fn from_u32(flags: u32) -> Result<Self> {
        match flags & 0b11 {
            0 => Ok(AccessMode::O_RDONLY),
            1 => Ok(AccessMode::O_WRONLY),
            2 => Ok(AccessMode::O_RDWR),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid access mode"),
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::O_RDONLY | AccessMode::O_RDWR)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::O_WRONLY | AccessMode::O_RDWR)
    }
}

bitflags! {
    /// Flags that only matter while opening.
    pub struct CreationFlags: u32 {
        /// Create the file if it does not exist.
        const O_CREAT = 0o100;
        /// Fail if O_CREAT is set and the file exists.
        const O_EXCL = 0o200;
        /// Do not make the terminal the controlling terminal.
        const O_NOCTTY = 0o400;
        /// Truncate to zero length.
        const O_TRUNC = 0o1000;
        /// Fail unless the path names a directory.
        const O_DIRECTORY = 0o200000;
        /// Set the close-on-exec flag on the new descriptor.
        const O_CLOEXEC = 0o2000000;
    }
}

bitflags! {
    /// Flags that stay with the open file.
    pub struct StatusFlags: u32 {
        /// Every write lands at the end of the file.
        const O_APPEND = 0o2000;
        /// Replace blocking with the would-block error.
        const O_NONBLOCK = 0o4000;
    }
}

bitflags! {
    /// The flag bits of the driver `unlink` hook.
    pub struct UnlinkFlags: u32 {
        /// Remove even past the last hard link.
        const FORCE = 1 << 0;
        /// Do not truncate an unlinked directory.
        const KEEP_DIR = 1 << 1;
    }
}

bitflags! {
    /// Readiness bits reported by `FileLike::poll`.
    pub struct IoEvents: u32 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
    }
}

/// Terminal and file control requests routed through `ioctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCmd {
    /// Get the termios settings.
    TcGets,
    /// Set the termios settings.
    TcSets,
    /// Get the foreground process group.
    TiocGpgrp,
    /// Set the foreground process group.
    TiocSpgrp,
    /// Get the window size.
    TiocGwinsz,
    /// Set the window size.
    TiocSwinsz,
}
