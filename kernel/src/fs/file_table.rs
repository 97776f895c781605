// SPDX-License-Identifier: MPL-2.0

//! The per-process descriptor table.

use super::file_handle::FileLike;
use crate::prelude::*;
use crate::util::slot_vec::SlotVec;

pub type FileDesc = i32;

/// The most descriptors one process may hold.
pub const OPEN_MAX: usize = 256;

/// The descriptor table: an index-stable array of slots, each weakly
/// naming an open file plus the per-descriptor flags. Guarded by the
/// owning process's spin lock; release hooks of closed files run only
/// after that lock is dropped.
pub struct FileTable {
    table: SlotVec<FileTableEntry>,
}

pub struct FileTableEntry {
    file: Arc<dyn FileLike>,
    flags: FdFlags,
}

bitflags! {
    pub struct FdFlags: u8 {
        /// Close on exec.
        const CLOEXEC = 1;
    }
}

impl FileTableEntry {
    pub fn new(file: Arc<dyn FileLike>, flags: FdFlags) -> Self {
        Self { file, flags }
    }

    pub fn file(&self) -> &Arc<dyn FileLike> {
        &self.file
    }

    pub fn flags(&self) -> FdFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: FdFlags) {
        self.flags = flags;
    }
}

impl Clone for FileTableEntry {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            flags: self.flags,
        }
    }
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            table: SlotVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Stores `file` in the lowest free slot and returns its index.
    pub fn insert(&mut self, file: Arc<dyn FileLike>, flags: FdFlags) -> Result<FileDesc> {
        if self.table.len() >= OPEN_MAX {
            return_errno_with_message!(Errno::EMFILE, "too many open files");
        }
        Ok(self.table.put(FileTableEntry::new(file, flags)) as FileDesc)
    }

    /// Duplicates `fd` into the lowest free slot at or above `new_fd`.
    /// The new descriptor names the same open file; its flags start over.
    pub fn dup(&mut self, fd: FileDesc, new_fd: FileDesc, flags: FdFlags) -> Result<FileDesc> {
        let file = self.get_file(fd)?.clone();
        if new_fd < 0 {
            return_errno_with_message!(Errno::EINVAL, "invalid descriptor number");
        }
        if self.table.len() >= OPEN_MAX {
            return_errno_with_message!(Errno::EMFILE, "too many open files");
        }

        let min_free_fd = {
            let new_fd = new_fd as usize;
            if self.table.get(new_fd).is_none() {
                new_fd
            } else {
                (new_fd + 1..)
                    .find(|&idx| self.table.get(idx).is_none())
                    .expect("an unbounded range always holds a free slot")
            }
        };
        self.table
            .put_at(min_free_fd, FileTableEntry::new(file, flags));
        Ok(min_free_fd as FileDesc)
    }

    /// Stores `file` exactly at `fd`, returning the displaced open file.
    /// The caller drops the displaced file after releasing the table lock.
    pub fn insert_at(
        &mut self,
        fd: FileDesc,
        file: Arc<dyn FileLike>,
        flags: FdFlags,
    ) -> Option<Arc<dyn FileLike>> {
        self.table
            .put_at(fd as usize, FileTableEntry::new(file, flags))
            .map(|entry| entry.file)
    }

    /// Empties the slot at `fd`. The caller drops the returned file after
    /// releasing the table lock, since release hooks may block.
    pub fn close_file(&mut self, fd: FileDesc) -> Option<Arc<dyn FileLike>> {
        self.table.remove(fd as usize).map(|entry| entry.file)
    }

    pub fn close_all(&mut self) -> Vec<Arc<dyn FileLike>> {
        self.close_files(|_, _| true)
    }

    /// The exec sweep: closes every close-on-exec slot and every slot
    /// whose open file names a directory.
    pub fn close_files_on_exec(&mut self) -> Vec<Arc<dyn FileLike>> {
        self.close_files(|_, entry| {
            entry.flags.contains(FdFlags::CLOEXEC)
                || entry
                    .file
                    .metadata()
                    .is_ok_and(|m| m.type_.is_directory())
        })
    }

    fn close_files<F>(&mut self, should_close: F) -> Vec<Arc<dyn FileLike>>
    where
        F: Fn(FileDesc, &FileTableEntry) -> bool,
    {
        let closed_fds: Vec<FileDesc> = self
            .table
            .idxes_and_items()
            .filter_map(|(idx, entry)| {
                should_close(idx as FileDesc, entry).then_some(idx as FileDesc)
            })
            .collect();

        closed_fds
            .iter()
            .map(|&fd| {
                self.table
                    .remove(fd as usize)
                    .expect("the slot was occupied a moment ago")
                    .file
            })
            .collect()
    }

    pub fn get_file(&self, fd: FileDesc) -> Result<&Arc<dyn FileLike>> {
        if fd < 0 {
            return_errno_with_message!(Errno::EBADF, "invalid descriptor number");
        }
        self.table
            .get(fd as usize)
            .map(FileTableEntry::file)
            .ok_or(Error::with_message(Errno::EBADF, "no such descriptor"))
    }

    pub fn get_entry(&self, fd: FileDesc) -> Result<&FileTableEntry> {
        if fd < 0 {
            return_errno_with_message!(Errno::EBADF, "invalid descriptor number");
        }
        self.table
            .get(fd as usize)
            .ok_or(Error::with_message(Errno::EBADF, "no such descriptor"))
    }

    pub fn get_entry_mut(&mut self, fd: FileDesc) -> Result<&mut FileTableEntry> {
        if fd < 0 {
            return_errno_with_message!(Errno::EBADF, "invalid descriptor number");
        }
        self.table
            .get_mut(fd as usize)
            .ok_or(Error::with_message(Errno::EBADF, "no such descriptor"))
    }

    pub fn fds_and_files(&self) -> impl Iterator<Item = (FileDesc, &'_ Arc<dyn FileLike>)> {
        self.table
            .idxes_and_items()
            .map(|(idx, entry)| (idx as FileDesc, &entry.file))
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FileTable {
    // The fork copy: slot-for-slot, sharing every open file.
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::utils::{realtime_now, InodeMode, InodeType, Metadata};

    struct DummyFile(InodeType);

    impl FileLike for DummyFile {
        fn metadata(&self) -> Result<Metadata> {
            let now = realtime_now();
            Ok(Metadata {
                dev: 0,
                ino: 0,
                size: 0,
                blk_size: 0,
                blocks: 0,
                atime: now,
                mtime: now,
                ctime: now,
                type_: self.0,
                mode: InodeMode::from_bits_truncate(0o644),
                nlinks: 1,
                uid: 0,
                gid: 0,
                rdev: 0,
            })
        }
    }

    fn dummy(type_: InodeType) -> Arc<dyn FileLike> {
        Arc::new(DummyFile(type_))
    }

    #[test]
    fn dup_shares_the_open_file_and_close_releases_it() {
        let mut table = FileTable::new();
        let file = dummy(InodeType::File);
        let fd = table.insert(file.clone(), FdFlags::empty()).unwrap();
        assert_eq!(Arc::strong_count(&file), 2);

        let dup_fd = table.dup(fd, 0, FdFlags::empty()).unwrap();
        assert_ne!(dup_fd, fd);
        assert_eq!(Arc::strong_count(&file), 3);
        assert!(Arc::ptr_eq(
            table.get_file(fd).unwrap(),
            table.get_file(dup_fd).unwrap()
        ));

        drop(table.close_file(dup_fd));
        assert_eq!(Arc::strong_count(&file), 2);
        drop(table.close_file(fd));
        assert_eq!(Arc::strong_count(&file), 1);
        assert!(table.get_file(fd).is_err());
    }

    #[test]
    fn exec_sweep_closes_cloexec_and_directory_slots() {
        let mut table = FileTable::new();
        let keep = table.insert(dummy(InodeType::File), FdFlags::empty()).unwrap();
        let cloexec = table
            .insert(dummy(InodeType::File), FdFlags::CLOEXEC)
            .unwrap();
        let dir = table.insert(dummy(InodeType::Dir), FdFlags::empty()).unwrap();

        let closed = table.close_files_on_exec();
        assert_eq!(closed.len(), 2);
        assert!(table.get_file(keep).is_ok());
        assert!(table.get_file(cloexec).is_err());
        assert!(table.get_file(dir).is_err());
    }

    #[test]
    fn fork_copy_shares_every_open_file() {
        let mut table = FileTable::new();
        let file = dummy(InodeType::File);
        let fd = table.insert(file.clone(), FdFlags::empty()).unwrap();

        let mut child = table.clone();
        assert_eq!(Arc::strong_count(&file), 3);

        // Closing in the child leaves the parent's slot alone.
        drop(child.close_file(fd));
        assert!(table.get_file(fd).is_ok());
        assert_eq!(Arc::strong_count(&file), 2);
    }

    #[test]
    fn dup_lands_on_the_lowest_free_slot() {
        let mut table = FileTable::new();
        let a = table.insert(dummy(InodeType::File), FdFlags::empty()).unwrap();
        let b = table.insert(dummy(InodeType::File), FdFlags::empty()).unwrap();
        let _c = table.insert(dummy(InodeType::File), FdFlags::empty()).unwrap();
        assert_eq!((a, b), (0, 1));

        drop(table.close_file(b));
        assert_eq!(table.dup(a, 0, FdFlags::empty()).unwrap(), b);
        assert_eq!(table.dup(a, 2, FdFlags::empty()).unwrap(), 3);
    }
}
