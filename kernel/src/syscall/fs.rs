// SPDX-License-Identifier: MPL-2.0

//! File-system system calls.

use core::time::Duration;

use kestrel_frame::time::{ticks_to_duration, wait_ms};

use crate::device::DeviceId;
use crate::fs::file_handle::FileLike;
use crate::fs::file_table::{FdFlags, FileDesc};
use crate::fs::inode_handle::InodeHandle;
use crate::fs::path::{abs_path_of, mount, FsResolver};
use crate::fs::pipe;
use crate::fs::registry;
use crate::fs::utils::{
    CreationFlags, DirEntry, InodeMode, InodeType, IoEvents, Metadata, SeekFrom, StatusFlags,
    UnlinkFlags,
};
use crate::fs::vnode::Vnode;
use crate::prelude::*;

fn get_file(fd: FileDesc) -> Result<Arc<dyn FileLike>> {
    let current = current!();
    let file_table = current.file_table().lock();
    file_table.get_file(fd).cloned()
}

pub fn sys_open(path: &str, flags: u32, mode: u16) -> Result<FileDesc> {
    let current = current!();
    let masked_mode = InodeMode::from_bits_truncate(mode & !current.umask());
    let handle = current.fs().read().open(path, flags, masked_mode)?;

    let fd_flags = if CreationFlags::from_bits_truncate(flags).contains(CreationFlags::O_CLOEXEC) {
        FdFlags::CLOEXEC
    } else {
        FdFlags::empty()
    };
    let fd = current.file_table().lock().insert(handle, fd_flags);
    fd
}

/// The pseudo descriptor naming the current working directory.
pub const AT_FDCWD: FileDesc = -100;

pub fn sys_openat(dirfd: FileDesc, path: &str, flags: u32, mode: u16) -> Result<FileDesc> {
    if path.starts_with('/') || dirfd == AT_FDCWD {
        return sys_open(path, flags, mode);
    }

    let current = current!();
    let dir = {
        let file = get_file(dirfd)?;
        let handle = file
            .downcast_ref::<InodeHandle>()
            .ok_or(Error::with_message(Errno::ENOTDIR, "not a directory"))?;
        handle.vnode().clone()
    };
    if !dir.type_().is_directory() {
        return_errno_with_message!(Errno::ENOTDIR, "not a directory");
    }

    let masked_mode = InodeMode::from_bits_truncate(mode & !current.umask());
    let mut resolver = FsResolver::new();
    resolver.set_cwd(dir);
    let handle = resolver.open(path, flags, masked_mode)?;

    let fd_flags = if CreationFlags::from_bits_truncate(flags).contains(CreationFlags::O_CLOEXEC) {
        FdFlags::CLOEXEC
    } else {
        FdFlags::empty()
    };
    let fd = current.file_table().lock().insert(handle, fd_flags);
    fd
}

pub fn sys_close(fd: FileDesc) -> Result<()> {
    let current = current!();
    let file = {
        let mut file_table = current.file_table().lock();
        file_table.close_file(fd)
    }
    .ok_or(Error::with_message(Errno::EBADF, "no such descriptor"))?;
    // The refcount lock is gone; release hooks may block from here on.
    let _ = file.clean_for_close();
    Ok(())
}

pub fn sys_read(fd: FileDesc, buf: &mut [u8]) -> Result<usize> {
    let file = get_file(fd)?;
    super::with_restart(|| file.read(buf))
}

pub fn sys_write(fd: FileDesc, buf: &[u8]) -> Result<usize> {
    let file = get_file(fd)?;
    super::with_restart(|| file.write(buf))
}

pub fn sys_readdir(fd: FileDesc) -> Result<Option<DirEntry>> {
    let file = get_file(fd)?;
    let handle = file
        .downcast_ref::<InodeHandle>()
        .ok_or(Error::with_message(Errno::ENOTDIR, "not a directory"))?;
    handle.read_dir_entry()
}

pub fn sys_lseek(fd: FileDesc, pos: SeekFrom) -> Result<usize> {
    get_file(fd)?.seek(pos)
}

pub fn sys_ftruncate(fd: FileDesc, len: usize) -> Result<()> {
    get_file(fd)?.resize(len)
}

/// The fcntl requests the core supports.
#[derive(Debug, Clone, Copy)]
pub enum FcntlCmd {
    GetFd,
    SetFd(FdFlags),
    /// Duplicate into the lowest free descriptor at or above the minimum.
    DupFd(FileDesc),
    GetFl,
    SetFl(StatusFlags),
}

pub fn sys_fcntl(fd: FileDesc, cmd: FcntlCmd) -> Result<isize> {
    let current = current!();
    match cmd {
        FcntlCmd::GetFd => {
            let file_table = current.file_table().lock();
            Ok(file_table.get_entry(fd)?.flags().bits() as isize)
        }
        FcntlCmd::SetFd(flags) => {
            let mut file_table = current.file_table().lock();
            file_table.get_entry_mut(fd)?.set_flags(flags);
            Ok(0)
        }
        FcntlCmd::DupFd(min_fd) => {
            let mut file_table = current.file_table().lock();
            let new_fd = file_table.dup(fd, min_fd, FdFlags::empty())?;
            Ok(new_fd as isize)
        }
        FcntlCmd::GetFl => {
            let file = get_file(fd)?;
            Ok(file.status_flags().bits() as isize)
        }
        FcntlCmd::SetFl(flags) => {
            let file = get_file(fd)?;
            file.set_status_flags(flags)?;
            Ok(0)
        }
    }
}

pub fn sys_dup(fd: FileDesc) -> Result<FileDesc> {
    let current = current!();
    let mut file_table = current.file_table().lock();
    file_table.dup(fd, 0, FdFlags::empty())
}

pub fn sys_dup2(old_fd: FileDesc, new_fd: FileDesc) -> Result<FileDesc> {
    let current = current!();
    if old_fd == new_fd {
        let file_table = current.file_table().lock();
        file_table.get_file(old_fd)?;
        return Ok(new_fd);
    }
    let displaced = {
        let mut file_table = current.file_table().lock();
        let file = file_table.get_file(old_fd)?.clone();
        file_table.insert_at(new_fd, file, FdFlags::empty())
    };
    drop(displaced);
    Ok(new_fd)
}

pub fn sys_pipe() -> Result<(FileDesc, FileDesc)> {
    let current = current!();
    let (reader, writer) = pipe::new_pair();
    let mut file_table = current.file_table().lock();
    let read_fd = file_table.insert(reader, FdFlags::empty())?;
    let write_fd = match file_table.insert(writer, FdFlags::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            let half_open = file_table.close_file(read_fd);
            drop(file_table);
            drop(half_open);
            return Err(e);
        }
    };
    Ok((read_fd, write_fd))
}

pub fn sys_stat(path: &str) -> Result<Metadata> {
    let current = current!();
    let vnode = current.fs().read().lookup(path)?;
    Ok(vnode.metadata())
}

pub fn sys_fstat(fd: FileDesc) -> Result<Metadata> {
    get_file(fd)?.metadata()
}

pub fn sys_chmod(path: &str, mode: u16) -> Result<()> {
    let current = current!();
    let vnode = current.fs().read().lookup(path)?;
    let _guard = vnode.write_lock();
    vnode.inode().set_mode(InodeMode::from_bits_truncate(mode))
}

pub fn sys_utime(path: &str, atime: Duration, mtime: Duration) -> Result<()> {
    let current = current!();
    let vnode = current.fs().read().lookup(path)?;
    let _guard = vnode.write_lock();
    vnode.inode().set_times(atime, mtime)
}

pub fn sys_chdir(path: &str) -> Result<()> {
    let current = current!();
    let vnode = current.fs().read().lookup(path)?;
    if !vnode.type_().is_directory() {
        return_errno_with_message!(Errno::ENOTDIR, "not a directory");
    }
    current.fs().write().set_cwd(vnode);
    Ok(())
}

pub fn sys_fchdir(fd: FileDesc) -> Result<()> {
    let current = current!();
    let file = get_file(fd)?;
    let handle = file
        .downcast_ref::<InodeHandle>()
        .ok_or(Error::with_message(Errno::ENOTDIR, "not a directory"))?;
    let vnode = handle.vnode().clone();
    if !vnode.type_().is_directory() {
        return_errno_with_message!(Errno::ENOTDIR, "not a directory");
    }
    current.fs().write().set_cwd(vnode);
    Ok(())
}

pub fn sys_getcwd() -> Result<String> {
    let current = current!();
    let cwd = current.fs().read().cwd();
    abs_path_of(&cwd)
}

pub fn sys_umask(mask: u16) -> u16 {
    current!().set_umask(mask)
}

pub fn sys_mkdir(path: &str, mode: u16) -> Result<()> {
    let current = current!();
    let masked_mode = InodeMode::from_bits_truncate(mode & !current.umask());
    let fs = current.fs().read();
    let (dir, base_raw) = fs.lookup_dir_and_base(path)?;
    let base = base_raw.trim_end_matches('/');
    check_new_component(base)?;

    let _guard = dir.write_lock();
    if dir.lookup_unlocked(base).is_ok() {
        return_errno_with_message!(Errno::EEXIST, "directory exists");
    }
    dir.create_unlocked(base, InodeType::Dir, masked_mode)?;
    Ok(())
}

pub fn sys_mknod(path: &str, mode: u16, type_: InodeType, rdev: DeviceId) -> Result<()> {
    let current = current!();
    let masked_mode = InodeMode::from_bits_truncate(mode & !current.umask());
    let fs = current.fs().read();
    let (dir, base_raw) = fs.lookup_dir_and_base(path)?;
    let base = base_raw.trim_end_matches('/');
    check_new_component(base)?;

    let _guard = dir.write_lock();
    if dir.lookup_unlocked(base).is_ok() {
        return_errno_with_message!(Errno::EEXIST, "node exists");
    }
    dir.mknod_unlocked(base, masked_mode, type_, rdev.as_encoded_u64())?;
    Ok(())
}

pub fn sys_unlink(path: &str) -> Result<()> {
    let current = current!();
    let fs = current.fs().read();
    let (dir, base_raw) = fs.lookup_dir_and_base(path)?;
    let base = base_raw.trim_end_matches('/');
    check_removable_component(base)?;

    let _guard = dir.write_lock();
    let victim = dir.lookup_unlocked(base)?;
    if victim.type_().is_directory() {
        return_errno_with_message!(Errno::EISDIR, "cannot unlink a directory");
    }
    dir.unlink_unlocked(base, UnlinkFlags::empty())
}

pub fn sys_rmdir(path: &str) -> Result<()> {
    let current = current!();
    let fs = current.fs().read();
    let (dir, base_raw) = fs.lookup_dir_and_base(path)?;
    let base = base_raw.trim_end_matches('/');
    check_removable_component(base)?;

    let _guard = dir.write_lock();
    let victim = dir.lookup_unlocked(base)?;
    if !victim.type_().is_directory() {
        return_errno_with_message!(Errno::ENOTDIR, "not a directory");
    }
    if victim.is_mount_point() {
        return_errno_with_message!(Errno::EBUSY, "a file system is mounted here");
    }
    dir.unlink_unlocked(base, UnlinkFlags::empty())
}

pub fn sys_link(old_path: &str, new_path: &str) -> Result<()> {
    let current = current!();
    let fs = current.fs().read();
    let target = fs.lookup(old_path)?;
    if target.type_().is_directory() {
        return_errno_with_message!(Errno::EPERM, "cannot hard-link a directory");
    }
    let (dir, base_raw) = fs.lookup_dir_and_base(new_path)?;
    let base = base_raw.trim_end_matches('/');
    check_new_component(base)?;
    if target.dev() != dir.dev() {
        return_errno_with_message!(Errno::EXDEV, "link crosses devices");
    }

    let _guard = dir.write_lock();
    if dir.lookup_unlocked(base).is_ok() {
        return_errno_with_message!(Errno::EEXIST, "entry exists");
    }
    dir.link_unlocked(&target, base)
}

/// Rename, composed from link and unlink: the new name is linked first,
/// the old name is unlinked last. A moved directory keeps its contents
/// (the unlink carries the keep-directory flag).
pub fn sys_rename(old_path: &str, new_path: &str) -> Result<()> {
    let current = current!();
    let fs = current.fs().read();
    let (old_dir, old_base_raw) = fs.lookup_dir_and_base(old_path)?;
    let (new_dir, new_base_raw) = fs.lookup_dir_and_base(new_path)?;
    let old_base = old_base_raw.trim_end_matches('/');
    let new_base = new_base_raw.trim_end_matches('/');
    check_removable_component(old_base)?;
    check_new_component(new_base)?;
    if old_dir.dev() != new_dir.dev() {
        return_errno_with_message!(Errno::EXDEV, "rename crosses devices");
    }

    // Parent locks in a stable order so concurrent renames cannot
    // deadlock.
    let same_dir = Arc::ptr_eq(&old_dir, &new_dir);
    let (_guard_a, _guard_b);
    if same_dir {
        _guard_a = old_dir.write_lock();
        _guard_b = None;
    } else if old_dir.ino() < new_dir.ino() {
        _guard_a = old_dir.write_lock();
        _guard_b = Some(new_dir.write_lock());
    } else {
        _guard_a = new_dir.write_lock();
        _guard_b = Some(old_dir.write_lock());
    }

    let victim = old_dir.lookup_unlocked(old_base)?;
    if victim.is_mount_point() {
        return_errno_with_message!(Errno::EBUSY, "a file system is mounted here");
    }
    if Arc::ptr_eq(&victim, &new_dir) {
        return_errno_with_message!(Errno::EINVAL, "cannot move a directory into itself");
    }

    match new_dir.lookup_unlocked(new_base) {
        Ok(existing) => {
            if Arc::ptr_eq(&existing, &victim) {
                return Ok(());
            }
            if existing.type_().is_directory() && !victim.type_().is_directory() {
                return_errno_with_message!(Errno::EISDIR, "target is a directory");
            }
            if !existing.type_().is_directory() && victim.type_().is_directory() {
                return_errno_with_message!(Errno::ENOTDIR, "target is not a directory");
            }
            new_dir.unlink_unlocked(new_base, UnlinkFlags::empty())?;
        }
        Err(e) if e.error() == Errno::ENOENT => {}
        Err(e) => return Err(e),
    }

    new_dir.link_unlocked(&victim, new_base)?;
    let unlink_flags = if victim.type_().is_directory() {
        UnlinkFlags::KEEP_DIR
    } else {
        UnlinkFlags::empty()
    };
    old_dir.unlink_unlocked(old_base, unlink_flags)
}

pub fn sys_mount(fs_name: &str, device: Option<DeviceId>, target: &str) -> Result<()> {
    let current = current!();
    let fs_type = registry::lookup(fs_name)?;
    if let Some(device) = device {
        if !fs_type.can_mount(device) {
            return_errno_with_message!(Errno::EINVAL, "driver rejects the device");
        }
    }
    let fs = fs_type.create_fs(device)?;
    let mount_on = current.fs().read().lookup(target)?;
    mount::mount(fs, &mount_on)
}

pub fn sys_umount(target: &str) -> Result<()> {
    let current = current!();
    // Resolution crosses the mount, so the result is the mounted root.
    let root = current.fs().read().lookup(target)?;
    mount::unmount(&root)
}

pub fn sys_sync() -> Result<()> {
    // Volatile file systems have nothing to write back; drivers with
    // dirty state flush through their superblock hook.
    Ok(())
}

/// A tick-granular readiness poll over two descriptor sets.
///
/// Returns the ready subsets. A `None` timeout waits indefinitely.
pub fn sys_select(
    read_fds: &[FileDesc],
    write_fds: &[FileDesc],
    timeout_ticks: Option<u64>,
) -> Result<(Vec<FileDesc>, Vec<FileDesc>)> {
    let current = current!();
    let deadline = timeout_ticks.map(|ticks| std::time::Instant::now() + ticks_to_duration(ticks));

    let resolve = |fds: &[FileDesc]| -> Result<Vec<(FileDesc, Arc<dyn FileLike>)>> {
        let file_table = current.file_table().lock();
        fds.iter()
            .map(|&fd| Ok((fd, file_table.get_file(fd)?.clone())))
            .collect()
    };
    let readers = resolve(read_fds)?;
    let writers = resolve(write_fds)?;

    loop {
        let ready_r: Vec<FileDesc> = readers
            .iter()
            .filter(|(_, f)| f.poll(IoEvents::IN).contains(IoEvents::IN))
            .map(|(fd, _)| *fd)
            .collect();
        let ready_w: Vec<FileDesc> = writers
            .iter()
            .filter(|(_, f)| f.poll(IoEvents::OUT).contains(IoEvents::OUT))
            .map(|(fd, _)| *fd)
            .collect();
        if !ready_r.is_empty() || !ready_w.is_empty() {
            return Ok((ready_r, ready_w));
        }
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                return Ok((Vec::new(), Vec::new()));
            }
        }
        if current.has_pending() {
            return_errno_with_message!(Errno::ERESTARTSYS, "select paused by a signal");
        }
        wait_ms(1000 / kestrel_frame::time::TICK_HZ);
    }
}

/// Resolves a path for callers outside the system-call layer.
pub fn lookup(path: &str) -> Result<Arc<Vnode>> {
    current!().fs().read().lookup(path)
}

fn check_new_component(base: &str) -> Result<()> {
    if base.is_empty() || base == "." || base == ".." {
        return_errno_with_message!(Errno::EINVAL, "invalid last path component");
    }
    Ok(())
}

fn check_removable_component(base: &str) -> Result<()> {
    if base.is_empty() || base == "." || base == ".." {
        return_errno_with_message!(Errno::EINVAL, "invalid last path component");
    }
    Ok(())
}
