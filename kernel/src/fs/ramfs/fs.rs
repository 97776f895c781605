// SPDX-License-Identifier: MPL-2.0

use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use super::{BLOCK_SIZE, RAMFS_MAGIC, ROOT_INO};
use crate::device::DeviceId;
use crate::fs::registry::FsType;
use crate::fs::utils::{
    realtime_now, DirEntry, FileSystem, Inode, InodeMode, InodeType, Metadata, SuperBlock,
    UnlinkFlags, NAME_MAX,
};
use crate::prelude::*;

// In-memory file systems fabricate device ids from this pool.
static NEXT_ANON_DEV: AtomicU64 = AtomicU64::new(0x100);

pub struct RamFs {
    sb: SuperBlock,
    dev: u64,
    root: Arc<RamInode>,
    inode_allocator: AtomicU64,
    // All live inodes by number, for `get_inode`.
    inodes: SpinLock<HashMap<u64, Weak<RamInode>>>,
    this: Weak<RamFs>,
}

impl RamFs {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_fs: &Weak<RamFs>| {
            let root = Arc::new_cyclic(|weak_root| RamInode {
                node: RwMutex::new(Node::new_dir(
                    InodeMode::from_bits_truncate(0o755),
                    weak_root.clone(),
                    weak_root.clone(),
                )),
                ino: ROOT_INO,
                typ: InodeType::Dir,
                fs: weak_fs.clone(),
            });
            let inodes = HashMap::from([(ROOT_INO, Arc::downgrade(&root))]);
            Self {
                sb: SuperBlock::new(RAMFS_MAGIC, BLOCK_SIZE, NAME_MAX),
                dev: NEXT_ANON_DEV.fetch_add(1, Ordering::Relaxed),
                root,
                inode_allocator: AtomicU64::new(ROOT_INO + 1),
                inodes: SpinLock::new(inodes),
                this: weak_fs.clone(),
            }
        })
    }

    fn alloc_ino(&self) -> u64 {
        self.inode_allocator.fetch_add(1, Ordering::SeqCst)
    }

    fn new_inode(&self, typ: InodeType, node: Node) -> Arc<RamInode> {
        let ino = self.alloc_ino();
        let inode = Arc::new(RamInode {
            node: RwMutex::new(node),
            ino,
            typ,
            fs: self.this.clone(),
        });
        self.inodes.lock().insert(ino, Arc::downgrade(&inode));
        inode
    }
}

impl FileSystem for RamFs {
    fn root_inode(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }

    fn get_inode(&self, ino: u64) -> Result<Arc<dyn Inode>> {
        self.inodes
            .lock()
            .get(&ino)
            .and_then(Weak::upgrade)
            .map(|inode| inode as Arc<dyn Inode>)
            .ok_or(Error::with_message(Errno::ENOENT, "no such inode"))
    }

    fn device_id(&self) -> u64 {
        self.dev
    }

    fn sb(&self) -> SuperBlock {
        self.sb.clone()
    }

    fn sync(&self) -> Result<()> {
        // Nothing is ever dirty on the device side.
        Ok(())
    }
}

/// The registry entry for ramfs.
pub struct RamFsType;

impl FsType for RamFsType {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn can_mount(&self, _device: DeviceId) -> bool {
        // There is no on-device format to recognize.
        false
    }

    fn create_fs(&self, _device: Option<DeviceId>) -> Result<Arc<dyn FileSystem>> {
        Ok(RamFs::new())
    }
}

struct RamInode {
    node: RwMutex<Node>,
    ino: u64,
    typ: InodeType,
    fs: Weak<RamFs>,
}

struct Node {
    inner: Inner,
    meta: InodeMeta,
}

struct InodeMeta {
    mode: InodeMode,
    nlinks: usize,
    atime: Duration,
    mtime: Duration,
    ctime: Duration,
    rdev: u64,
}

impl InodeMeta {
    fn new(mode: InodeMode, nlinks: usize) -> Self {
        let now = realtime_now();
        Self {
            mode,
            nlinks,
            atime: now,
            mtime: now,
            ctime: now,
            rdev: 0,
        }
    }
}

enum Inner {
    Dir(DirChildren),
    File(Vec<u8>),
    Device,
}

/// Directory contents. `.` and `..` are implicit entries 0 and 1.
struct DirChildren {
    this: Weak<RamInode>,
    parent: Weak<RamInode>,
    children: Vec<(String, Arc<RamInode>)>,
}

impl Node {
    fn new_dir(mode: InodeMode, this: Weak<RamInode>, parent: Weak<RamInode>) -> Self {
        Self {
            inner: Inner::Dir(DirChildren {
                this,
                parent,
                children: Vec::new(),
            }),
            // `.` and the parent's entry.
            meta: InodeMeta::new(mode, 2),
        }
    }

    fn new_file(mode: InodeMode) -> Self {
        Self {
            inner: Inner::File(Vec::new()),
            meta: InodeMeta::new(mode, 1),
        }
    }

    fn new_device(mode: InodeMode, rdev: u64) -> Self {
        let mut node = Self {
            inner: Inner::Device,
            meta: InodeMeta::new(mode, 1),
        };
        node.meta.rdev = rdev;
        node
    }

    fn as_dir(&self) -> Result<&DirChildren> {
        match &self.inner {
            Inner::Dir(dir) => Ok(dir),
            _ => return_errno_with_message!(Errno::ENOTDIR, "not a directory"),
        }
    }

    fn as_dir_mut(&mut self) -> Result<&mut DirChildren> {
        match &mut self.inner {
            Inner::Dir(dir) => Ok(dir),
            _ => return_errno_with_message!(Errno::ENOTDIR, "not a directory"),
        }
    }

    fn size(&self) -> usize {
        match &self.inner {
            Inner::File(data) => data.len(),
            Inner::Dir(dir) => dir.children.len() + 2,
            Inner::Device => 0,
        }
    }
}

impl RamInode {
    fn fs_strong(&self) -> Arc<RamFs> {
        self.fs.upgrade().expect("ramfs outlives its inodes")
    }

    fn check_new_name(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return_errno_with_message!(Errno::EINVAL, "invalid entry name");
        }
        if name.len() > NAME_MAX {
            return_errno_with_message!(Errno::ENAMETOOLONG, "entry name too long");
        }
        Ok(())
    }
}

impl Inode for RamInode {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn type_(&self) -> InodeType {
        self.typ
    }

    fn metadata(&self) -> Metadata {
        let node = self.node.read();
        Metadata {
            dev: self.fs_strong().dev,
            ino: self.ino,
            size: node.size(),
            blk_size: BLOCK_SIZE,
            blocks: node.size().div_ceil(BLOCK_SIZE),
            atime: node.meta.atime,
            mtime: node.meta.mtime,
            ctime: node.meta.ctime,
            type_: self.typ,
            mode: node.meta.mode,
            nlinks: node.meta.nlinks,
            uid: 0,
            gid: 0,
            rdev: node.meta.rdev,
        }
    }

    fn fs(&self) -> Weak<dyn FileSystem> {
        self.fs.clone()
    }

    fn set_mode(&self, mode: InodeMode) -> Result<()> {
        let mut node = self.node.write();
        node.meta.mode = mode;
        node.meta.ctime = realtime_now();
        Ok(())
    }

    fn set_times(&self, atime: Duration, mtime: Duration) -> Result<()> {
        let mut node = self.node.write();
        node.meta.atime = atime;
        node.meta.mtime = mtime;
        node.meta.ctime = realtime_now();
        Ok(())
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        let mut node = self.node.write();
        match &mut node.inner {
            Inner::File(data) => {
                data.resize(new_size, 0);
                node.meta.mtime = realtime_now();
                Ok(())
            }
            _ => return_errno_with_message!(Errno::EISDIR, "cannot resize a non-file"),
        }
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let node = self.node.read();
        match &node.inner {
            Inner::File(data) => {
                if offset >= data.len() {
                    return Ok(0);
                }
                let read_len = buf.len().min(data.len() - offset);
                buf[..read_len].copy_from_slice(&data[offset..offset + read_len]);
                Ok(read_len)
            }
            _ => return_errno_with_message!(Errno::EISDIR, "cannot read a non-file"),
        }
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut node = self.node.write();
        match &mut node.inner {
            Inner::File(data) => {
                let end = offset
                    .checked_add(buf.len())
                    .ok_or(Error::with_message(Errno::EFBIG, "file offset overflow"))?;
                if end > data.len() {
                    data.resize(end, 0);
                }
                data[offset..end].copy_from_slice(buf);
                node.meta.mtime = realtime_now();
                Ok(buf.len())
            }
            _ => return_errno_with_message!(Errno::EISDIR, "cannot write a non-file"),
        }
    }

    fn entry_at(&self, idx: usize) -> Result<Option<DirEntry>> {
        let node = self.node.read();
        let dir = node.as_dir()?;
        let entry = match idx {
            0 => dir.this.upgrade().map(|this| DirEntry {
                ino: this.ino,
                type_: InodeType::Dir,
                name: String::from("."),
            }),
            1 => dir.parent.upgrade().map(|parent| DirEntry {
                ino: parent.ino,
                type_: InodeType::Dir,
                name: String::from(".."),
            }),
            _ => dir.children.get(idx - 2).map(|(name, inode)| DirEntry {
                ino: inode.ino,
                type_: inode.typ,
                name: name.clone(),
            }),
        };
        Ok(entry)
    }

    fn create(&self, name: &str, type_: InodeType, mode: InodeMode) -> Result<Arc<dyn Inode>> {
        Self::check_new_name(name)?;
        let fs = self.fs_strong();
        let mut node = self.node.write();
        let this_weak = node.as_dir()?.this.clone();
        if node
            .as_dir()?
            .children
            .iter()
            .any(|(child_name, _)| child_name == name)
        {
            return_errno_with_message!(Errno::EEXIST, "entry exists");
        }

        let new_inode = match type_ {
            InodeType::File => fs.new_inode(InodeType::File, Node::new_file(mode)),
            InodeType::Dir => {
                let inode = Arc::new_cyclic(|weak_self: &Weak<RamInode>| RamInode {
                    node: RwMutex::new(Node::new_dir(mode, weak_self.clone(), this_weak)),
                    ino: fs.alloc_ino(),
                    typ: InodeType::Dir,
                    fs: self.fs.clone(),
                });
                fs.inodes.lock().insert(inode.ino, Arc::downgrade(&inode));
                // The child's `..` entry.
                node.meta.nlinks += 1;
                inode
            }
            _ => return_errno_with_message!(Errno::EINVAL, "create supports files and directories"),
        };
        let dir = node.as_dir_mut()?;
        dir.children.push((String::from(name), new_inode.clone()));
        node.meta.mtime = realtime_now();
        Ok(new_inode)
    }

    fn mknod(
        &self,
        name: &str,
        mode: InodeMode,
        type_: InodeType,
        rdev: u64,
    ) -> Result<Arc<dyn Inode>> {
        Self::check_new_name(name)?;
        if !matches!(type_, InodeType::CharDevice | InodeType::BlockDevice) {
            return_errno_with_message!(Errno::EINVAL, "mknod creates device nodes");
        }
        let fs = self.fs_strong();
        let mut node = self.node.write();
        if node
            .as_dir()?
            .children
            .iter()
            .any(|(child_name, _)| child_name == name)
        {
            return_errno_with_message!(Errno::EEXIST, "entry exists");
        }
        let new_inode = fs.new_inode(type_, Node::new_device(mode, rdev));
        let dir = node.as_dir_mut()?;
        dir.children.push((String::from(name), new_inode.clone()));
        node.meta.mtime = realtime_now();
        Ok(new_inode)
    }

    fn link(&self, inode: &Arc<dyn Inode>, name: &str) -> Result<()> {
        Self::check_new_name(name)?;
        let target_ref = inode
            .downcast_ref::<RamInode>()
            .ok_or(Error::with_message(Errno::EXDEV, "cross-device link"))?;
        if !Weak::ptr_eq(&target_ref.fs, &self.fs) {
            return_errno_with_message!(Errno::EXDEV, "cross-device link");
        }
        let target = self
            .fs_strong()
            .inodes
            .lock()
            .get(&target_ref.ino)
            .and_then(Weak::upgrade)
            .ok_or(Error::with_message(Errno::ENOENT, "no such inode"))?;

        let mut node = self.node.write();
        let this_weak = node.as_dir()?.this.clone();
        if node
            .as_dir()?
            .children
            .iter()
            .any(|(child_name, _)| child_name == name)
        {
            return_errno_with_message!(Errno::EEXIST, "entry exists");
        }
        let target_is_dir = target.typ == InodeType::Dir;
        {
            let mut target_node = target.node.write();
            target_node.meta.nlinks += 1;
            target_node.meta.ctime = realtime_now();
            if target_is_dir {
                // A directory is only ever linked to move it: it follows
                // its new parent.
                target_node.as_dir_mut()?.parent = this_weak;
            }
        }
        if target_is_dir {
            // The moved directory's `..` entry.
            node.meta.nlinks += 1;
        }
        let dir = node.as_dir_mut()?;
        dir.children.push((String::from(name), target));
        node.meta.mtime = realtime_now();
        Ok(())
    }

    fn unlink(&self, name: &str, flags: UnlinkFlags) -> Result<()> {
        if name == "." || name == ".." {
            return_errno_with_message!(Errno::EINVAL, "cannot unlink `.` or `..`");
        }
        let mut node = self.node.write();
        let dir = node.as_dir_mut()?;
        let idx = dir
            .children
            .iter()
            .position(|(child_name, _)| child_name == name)
            .ok_or(Error::with_message(Errno::ENOENT, "no such entry"))?;

        let victim = dir.children[idx].1.clone();
        let victim_is_dir = victim.typ == InodeType::Dir;
        if victim_is_dir {
            let mut victim_node = victim.node.write();
            if !flags.contains(UnlinkFlags::FORCE)
                && !flags.contains(UnlinkFlags::KEEP_DIR)
                && !victim_node.as_dir()?.children.is_empty()
            {
                return_errno_with_message!(Errno::ENOTEMPTY, "directory not empty");
            }
            if !flags.contains(UnlinkFlags::KEEP_DIR) {
                // Truncate the unlinked directory.
                victim_node.as_dir_mut()?.children.clear();
            }
        }

        let (_, victim) = dir.children.remove(idx);
        {
            let mut victim_node = victim.node.write();
            victim_node.meta.nlinks = victim_node.meta.nlinks.saturating_sub(1);
        }
        if victim_is_dir {
            // The directory's `..` entry no longer counts against this
            // directory, whether it was truncated or moved away.
            node.meta.nlinks = node.meta.nlinks.saturating_sub(1);
        }
        node.meta.mtime = realtime_now();
        Ok(())
    }
}
