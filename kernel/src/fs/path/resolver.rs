// SPDX-License-Identifier: MPL-2.0

//! Per-process file-system state and path resolution.

use super::super::inode_handle::InodeHandle;
use super::super::utils::{
    AccessMode, CreationFlags, InodeMode, InodeType, StatusFlags, PATH_MAX,
};
use super::super::vnode::Vnode;
use super::mount::{self, MountEntry};
use crate::prelude::*;

/// The file-system state of a process: the current working directory.
/// `None` means the root directory.
#[derive(Debug, Default)]
pub struct FsResolver {
    cwd: Option<Arc<Vnode>>,
}

impl Clone for FsResolver {
    fn clone(&self) -> Self {
        Self {
            cwd: self.cwd.clone(),
        }
    }
}

impl FsResolver {
    pub fn new() -> Self {
        Self { cwd: None }
    }

    /// The current working directory.
    pub fn cwd(&self) -> Arc<Vnode> {
        self.cwd.clone().unwrap_or_else(mount::root_vnode)
    }

    pub fn set_cwd(&mut self, dir: Arc<Vnode>) {
        self.cwd = Some(dir);
    }

    /// Resolves `path` to a vnode, following mounts and cross-mount `..`.
    ///
    /// The mount-graph read lock is held for the entire walk, so the
    /// result is atomic with respect to mount and unmount.
    pub fn lookup(&self, path: &str) -> Result<Arc<Vnode>> {
        let entries = mount::read();
        self.walk(&entries, path)
    }

    /// Resolves the parent directory of `path` and returns it with the
    /// last component. The component keeps a trailing slash if the caller
    /// wrote one; stripping it is the caller's explicit choice.
    pub fn lookup_dir_and_base(&self, path: &str) -> Result<(Arc<Vnode>, String)> {
        let (dir_path, base) = split_path(path);
        let entries = mount::read();
        let dir = self.walk(&entries, dir_path)?;
        Ok((dir, String::from(base)))
    }

    fn walk(&self, entries: &[MountEntry], path: &str) -> Result<Arc<Vnode>> {
        if path.is_empty() {
            return_errno_with_message!(Errno::ENOENT, "path is an empty string");
        }
        if path.len() > PATH_MAX {
            return_errno_with_message!(Errno::ENAMETOOLONG, "path is too long");
        }

        let must_be_dir = path.ends_with('/');
        let (mut cur, relative) = if let Some(relative) = path.strip_prefix('/') {
            (mount::root_vnode(), relative)
        } else {
            (self.cwd(), path)
        };

        for name in relative.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if name == ".." {
                // `..` on the root of a mounted file system continues on
                // the inode the file system is mounted on.
                if let Some(mounted_on) = mount::cross_up(entries, &cur) {
                    cur = mounted_on;
                }
                cur = cur.lookup("..")?;
                cur = mount::cross_down(entries, cur);
            } else {
                let next = cur.lookup(name)?;
                cur = mount::cross_down(entries, next);
            }
        }

        if must_be_dir && !cur.type_().is_directory() {
            return_errno_with_message!(Errno::ENOTDIR, "trailing slash on a non-directory");
        }
        Ok(cur)
    }

    /// Opens `path` per the open-flag ladder: the parent directory and
    /// the last component are resolved under the parent's write lock, so
    /// existence checks and creation are one atomic step.
    pub fn open(&self, path: &str, flags: u32, mode: InodeMode) -> Result<Arc<InodeHandle>> {
        let creation_flags = CreationFlags::from_bits_truncate(flags);
        let status_flags = StatusFlags::from_bits_truncate(flags);
        let access_mode = AccessMode::from_u32(flags)?;

        let (dir, base_raw) = self.lookup_dir_and_base(path)?;
        let trailing_slash = base_raw.ends_with('/');
        let base = base_raw.trim_end_matches('/');
        let base = if base.is_empty() { "." } else { base };

        let vnode = {
            let guard = dir.write_lock();
            match dir.lookup_unlocked(base) {
                Ok(vnode) => {
                    if creation_flags.contains(CreationFlags::O_CREAT)
                        && creation_flags.contains(CreationFlags::O_EXCL)
                    {
                        return_errno_with_message!(Errno::EEXIST, "file exists");
                    }
                    drop(guard);
                    let entries = mount::read();
                    mount::cross_down(&entries, vnode)
                }
                Err(e)
                    if e.error() == Errno::ENOENT
                        && creation_flags.contains(CreationFlags::O_CREAT) =>
                {
                    if trailing_slash {
                        return_errno_with_message!(Errno::EISDIR, "path refers to a directory");
                    }
                    let vnode = dir.create_unlocked(base, InodeType::File, mode)?;
                    drop(guard);
                    vnode
                }
                Err(e) => return Err(e),
            }
        };

        let type_ = vnode.type_();
        if (trailing_slash || creation_flags.contains(CreationFlags::O_DIRECTORY))
            && !type_.is_directory()
        {
            return_errno_with_message!(Errno::ENOTDIR, "not a directory");
        }
        if type_.is_directory() && access_mode.is_writable() {
            return_errno_with_message!(Errno::EISDIR, "cannot open a directory for writing");
        }

        if creation_flags.contains(CreationFlags::O_TRUNC)
            && type_.is_regular_file()
            && access_mode.is_writable()
        {
            let _guard = vnode.write_lock();
            vnode.inode().resize(0)?;
        }

        InodeHandle::new(vnode, access_mode, status_flags, creation_flags)
    }
}

/// Returns the absolute path of a directory vnode.
///
/// Walks upward via `..`, at each step scanning the parent for the name
/// of the child, with the mirror of the downward cross-mount transitions.
/// The scratch buffers are scoped here, so every exit path frees them.
pub fn abs_path_of(vnode: &Arc<Vnode>) -> Result<String> {
    let entries = mount::read();
    let root = mount::root_vnode();

    let mut components: Vec<String> = Vec::new();
    let mut cur = vnode.clone();
    loop {
        if Arc::ptr_eq(&cur, &root) {
            break;
        }
        // A mounted root is named by the inode it is mounted on.
        if let Some(mounted_on) = mount::cross_up(&entries, &cur) {
            cur = mounted_on;
            continue;
        }
        let parent = cur.lookup("..")?;
        if Arc::ptr_eq(&parent, &cur) {
            // A detached file-system root.
            break;
        }
        components.push(parent.name_of_child(cur.ino())?);
        cur = parent;
    }

    if components.is_empty() {
        return Ok(String::from("/"));
    }
    let mut path = String::new();
    for component in components.iter().rev() {
        path.push('/');
        path.push_str(component);
    }
    Ok(path)
}

/// Splits a path into `(dir_path, base_name)`.
///
/// The base keeps its trailing slash, e.g. `"/dir/file/"` splits into
/// `("/dir", "file/")`.
pub fn split_path(path: &str) -> (&str, &str) {
    let base = path
        .split_inclusive('/')
        .filter(|&component| component != "/")
        .last()
        .unwrap_or(".");

    let mut split = path.trim_end_matches('/').rsplitn(2, '/');
    let dir_path = if split.next().unwrap_or_default().is_empty() {
        "/"
    } else {
        let dir = split.next().unwrap_or(".").trim_end_matches('/');
        if dir.is_empty() {
            "/"
        } else {
            dir
        }
    };

    (dir_path, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_keeps_trailing_slash() {
        assert_eq!(split_path("/dir/file"), ("/dir", "file"));
        assert_eq!(split_path("/dir/file/"), ("/dir", "file/"));
        assert_eq!(split_path("file"), (".", "file"));
        assert_eq!(split_path("/file"), ("/", "file"));
        assert_eq!(split_path("/"), ("/", "."));
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
    }
}

#[cfg(test)]
mod vfs_tests {
    use super::super::mount;
    use super::*;
    use crate::fs::ramfs::RamFs;
    use crate::fs::utils::FileSystem;
    use crate::fs::utils::InodeType;

    fn setup() -> FsResolver {
        let _ = mount::init_rootfs(RamFs::new());
        FsResolver::new()
    }

    fn mkdir(fsr: &FsResolver, path: &str) -> Arc<Vnode> {
        let (dir, base_raw) = fsr.lookup_dir_and_base(path).unwrap();
        let base = base_raw.trim_end_matches('/').to_string();
        let _guard = dir.write_lock();
        dir.create_unlocked(&base, InodeType::Dir, InodeMode::from_bits_truncate(0o755))
            .unwrap()
    }

    #[test]
    fn path_round_trips_through_its_name() {
        let fsr = setup();
        mkdir(&fsr, "/rt_a");
        let b = mkdir(&fsr, "/rt_a/rt_b");

        assert!(Arc::ptr_eq(&fsr.lookup("/rt_a/rt_b").unwrap(), &b));
        let abs = abs_path_of(&b).unwrap();
        assert_eq!(abs, "/rt_a/rt_b");
        assert!(Arc::ptr_eq(&fsr.lookup(&abs).unwrap(), &b));

        // `.`, `..` and trailing slashes resolve to the same vnode.
        assert!(Arc::ptr_eq(&fsr.lookup("/rt_a/rt_b/").unwrap(), &b));
        assert!(Arc::ptr_eq(&fsr.lookup("/rt_a/./rt_b/../rt_b").unwrap(), &b));
    }

    #[test]
    fn trailing_slash_requires_a_directory() {
        let fsr = setup();
        let flags = 2 | CreationFlags::O_CREAT.bits(); // O_RDWR | O_CREAT
        fsr.open("/rt_file", flags, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        assert_eq!(
            fsr.lookup("/rt_file/").unwrap_err().error(),
            Errno::ENOTDIR
        );
    }

    #[test]
    fn relative_paths_start_at_the_cwd() {
        let mut fsr = setup();
        mkdir(&fsr, "/rel_base");
        let sub = mkdir(&fsr, "/rel_base/sub");
        fsr.set_cwd(fsr.lookup("/rel_base").unwrap());
        assert!(Arc::ptr_eq(&fsr.lookup("sub").unwrap(), &sub));
        assert!(Arc::ptr_eq(&fsr.lookup("..").unwrap(), &mount::root_vnode()));
    }

    #[test]
    fn mounts_cross_down_and_back_up() {
        let fsr = setup();
        let mount_on = mkdir(&fsr, "/mnt_t");
        let fs2 = RamFs::new();
        mount::mount(fs2.clone(), &mount_on).unwrap();

        // The mount point now resolves to the mounted root.
        let mounted_root = fsr.lookup("/mnt_t").unwrap();
        assert_eq!(mounted_root.dev(), fs2.device_id());
        assert!(mount_on.is_mount_point());

        let sub = mkdir(&fsr, "/mnt_t/sub");
        assert_eq!(sub.dev(), fs2.device_id());

        // `..` from the mounted root lands on the mounted-on parent.
        let back = fsr.lookup("/mnt_t/sub/../..").unwrap();
        assert!(Arc::ptr_eq(&back, &mount::root_vnode()));

        // The upward walk mirrors the crossing.
        assert_eq!(abs_path_of(&sub).unwrap(), "/mnt_t/sub");

        drop(sub);
        drop(back);
        mount::unmount(&mounted_root).unwrap();
        assert!(!mount_on.is_mount_point());
        let plain = fsr.lookup("/mnt_t").unwrap();
        assert!(Arc::ptr_eq(&plain, &mount_on));
    }

    #[test]
    fn unmount_with_open_files_is_busy() {
        let fsr = setup();
        let mount_on = mkdir(&fsr, "/mnt_busy");
        mount::mount(RamFs::new(), &mount_on).unwrap();
        let mounted_root = fsr.lookup("/mnt_busy").unwrap();

        let flags = 2 | CreationFlags::O_CREAT.bits();
        let handle = fsr
            .open("/mnt_busy/x", flags, InodeMode::from_bits_truncate(0o644))
            .unwrap();
        assert_eq!(
            mount::unmount(&mounted_root).unwrap_err().error(),
            Errno::EBUSY
        );

        drop(handle);
        mount::unmount(&mounted_root).unwrap();
    }

    #[test]
    fn unmount_of_a_non_root_is_rejected() {
        let fsr = setup();
        let dir = mkdir(&fsr, "/not_mounted");
        assert_eq!(mount::unmount(&dir).unwrap_err().error(), Errno::EINVAL);
    }
}
