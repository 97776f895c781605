// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios over the system-call surface.

use std::sync::{Arc, Once};

use kestrel_kernel::device::DeviceId;
use kestrel_kernel::fs::path::mount;
use kestrel_kernel::fs::ramfs::{RamFs, RamFsType};
use kestrel_kernel::fs::registry;
use kestrel_kernel::fs::utils::{CreationFlags, InodeType, SeekFrom, StatusFlags};
use kestrel_kernel::process::signal::{SigAction, SIGPIPE, SIGTERM, SIGTTIN};
use kestrel_kernel::process::{self, Process};
use kestrel_kernel::syscall::fs::*;
use kestrel_kernel::syscall::tty::{sys_isatty, sys_tcgetpgrp, sys_tcsetpgrp};
use kestrel_kernel::tty::{self, TtyDriver};
use kestrel_kernel::{Errno, Error};

const O_RDWR: u32 = 2;
const O_RDONLY: u32 = 0;

struct QuietScreen;

impl TtyDriver for QuietScreen {
    fn output(&self, _bytes: &[u8]) {}
}

static SETUP: Once = Once::new();

fn setup() {
    SETUP.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        mount::init_rootfs(RamFs::new()).expect("root file system");
        registry::register(Arc::new(RamFsType)).expect("ramfs driver");
        tty::init(Arc::new(QuietScreen));
        sys_mkdir("/dev", 0o755).expect("/dev");
        sys_mknod(
            "/dev/tty0",
            0o666,
            InodeType::CharDevice,
            DeviceId::new(tty::TTY_MAJOR, 0),
        )
        .expect("/dev/tty0");
    });
}

#[test]
fn scenario_a_write_seek_read() {
    setup();
    sys_mkdir("/a", 0o755).unwrap();
    let fd = sys_open("/a/b", O_RDWR | CreationFlags::O_CREAT.bits(), 0o644).unwrap();
    assert_eq!(sys_write(fd, b"Hello").unwrap(), 5);
    assert_eq!(sys_lseek(fd, SeekFrom::Start(0)).unwrap(), 0);

    let mut buf = [0u8; 5];
    assert_eq!(sys_read(fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"Hello");
    sys_close(fd).unwrap();
}

#[test]
fn scenario_c_unmount_is_busy_while_files_are_open() {
    setup();
    sys_mkdir("/tmp_c", 0o777).unwrap();
    let root_dev = sys_stat("/").unwrap().dev;
    sys_mount("ramfs", None, "/tmp_c").unwrap();
    assert_ne!(sys_stat("/tmp_c").unwrap().dev, root_dev);

    let fd = sys_open("/tmp_c/x", O_RDWR | CreationFlags::O_CREAT.bits(), 0o644).unwrap();
    assert_eq!(sys_umount("/tmp_c").unwrap_err(), Error::new(Errno::EBUSY));

    sys_close(fd).unwrap();
    sys_umount("/tmp_c").unwrap();
    assert_eq!(sys_stat("/tmp_c").unwrap().dev, root_dev);
}

#[test]
fn scenario_d_pipe_round_trip_and_hangup() {
    setup();
    let (read_fd, write_fd) = sys_pipe().unwrap();

    let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(sys_write(write_fd, &data).unwrap(), 1024);

    let mut out = vec![0u8; 1024];
    assert_eq!(sys_read(read_fd, &mut out[..512]).unwrap(), 512);
    assert_eq!(sys_read(read_fd, &mut out[512..]).unwrap(), 512);
    assert_eq!(out, data);

    sys_close(write_fd).unwrap();
    let mut tail = [0u8; 16];
    assert_eq!(sys_read(read_fd, &mut tail).unwrap(), 0);
    sys_close(read_fd).unwrap();
}

#[test]
fn broken_pipe_write_raises_the_signal() {
    setup();
    let writer_process = process::current().fork();
    let result = Process::spawn_kthread(&writer_process, || {
        let (read_fd, write_fd) = sys_pipe().unwrap();
        sys_close(read_fd).unwrap();
        sys_write(write_fd, b"x")
    })
    .join()
    .unwrap();
    assert_eq!(result.unwrap_err(), Error::new(Errno::EPIPE));
    assert!(writer_process.pending_signals().contains(SIGPIPE));
}

#[test]
fn scenario_e_background_terminal_read() {
    setup();
    let console_fd = sys_open("/dev/tty0", O_RDONLY, 0).unwrap();
    assert!(sys_isatty(console_fd).unwrap());
    sys_tcsetpgrp(console_fd, 1).unwrap();
    assert_eq!(sys_tcgetpgrp(console_fd).unwrap(), 1);

    let background = process::current().fork();
    background.set_pgid(2);
    let result = Process::spawn_kthread(&background, || {
        // Opening the terminal attaches it as the controlling terminal.
        let fd = sys_open("/dev/tty0", O_RDONLY, 0).unwrap();
        let mut buf = [0u8; 8];
        sys_read(fd, &mut buf)
    })
    .join()
    .unwrap();

    // The pause surfaced as EINTR (default disposition, no restart) and
    // the terminal-input signal went to the caller's group.
    assert_eq!(result.unwrap_err(), Error::new(Errno::EINTR));
    assert!(background.pending_signals().contains(SIGTTIN));
    sys_close(console_fd).unwrap();
}

#[test]
fn scenario_f_child_close_leaves_parent_descriptor_open() {
    setup();
    let fd = sys_open(
        "/scenario_f",
        O_RDWR | CreationFlags::O_CREAT.bits(),
        0o644,
    )
    .unwrap();
    assert_eq!(sys_write(fd, b"shared").unwrap(), 6);

    let parent = process::current();
    let child = parent.fork();
    Process::spawn_kthread(&child, move || {
        sys_close(fd).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(sys_lseek(fd, SeekFrom::Start(0)).unwrap(), 0);
    let mut buf = [0u8; 6];
    assert_eq!(sys_read(fd, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"shared");
    sys_close(fd).unwrap();
}

#[test]
fn exec_closes_cloexec_and_directory_descriptors() {
    setup();
    sys_mkdir("/exec_d", 0o755).unwrap();
    let process = process::current().fork();
    let (kept, cloexec, dir) = Process::spawn_kthread(&process, || {
        let kept = sys_open(
            "/exec_kept",
            O_RDWR | CreationFlags::O_CREAT.bits(),
            0o644,
        )
        .unwrap();
        let cloexec = sys_open(
            "/exec_gone",
            O_RDWR | CreationFlags::O_CREAT.bits() | CreationFlags::O_CLOEXEC.bits(),
            0o644,
        )
        .unwrap();
        let dir = sys_open("/exec_d", O_RDONLY, 0).unwrap();
        (kept, cloexec, dir)
    })
    .join()
    .unwrap();

    process.exec();
    let table = process.file_table().lock();
    assert!(table.get_file(kept).is_ok());
    assert!(table.get_file(cloexec).is_err());
    assert!(table.get_file(dir).is_err());
}

#[test]
fn interrupted_read_surfaces_eintr() {
    setup();
    let process = process::current().fork();
    process.set_disposition(SIGTERM, SigAction::Handler { restart: false });

    let reader = {
        let process = process.clone();
        Process::spawn_kthread(&process, || {
            let (read_fd, _write_fd) = sys_pipe().unwrap();
            let mut buf = [0u8; 8];
            sys_read(read_fd, &mut buf)
        })
    };
    std::thread::sleep(core::time::Duration::from_millis(30));
    process.post_signal(SIGTERM);
    assert_eq!(reader.join().unwrap().unwrap_err(), Error::new(Errno::EINTR));
}

#[test]
fn directory_calls_round_trip() {
    setup();
    sys_mkdir("/walk", 0o755).unwrap();
    sys_mkdir("/walk/in", 0o755).unwrap();

    let process = process::current().fork();
    Process::spawn_kthread(&process, || {
        sys_chdir("/walk/in").unwrap();
        assert_eq!(sys_getcwd().unwrap(), "/walk/in");

        let fd = sys_open("here", O_RDWR | CreationFlags::O_CREAT.bits(), 0o600).unwrap();
        sys_close(fd).unwrap();
        assert!(sys_stat("/walk/in/here").is_ok());

        sys_rename("/walk/in/here", "/walk/there").unwrap();
        assert_eq!(
            sys_stat("/walk/in/here").unwrap_err(),
            Error::new(Errno::ENOENT)
        );
        assert_eq!(sys_stat("/walk/there").unwrap().nlinks, 1);

        sys_link("/walk/there", "/walk/again").unwrap();
        assert_eq!(sys_stat("/walk/there").unwrap().nlinks, 2);
        sys_unlink("/walk/again").unwrap();
        assert_eq!(sys_stat("/walk/there").unwrap().nlinks, 1);
    })
    .join()
    .unwrap();
}

#[test]
fn readdir_lists_what_was_created() {
    setup();
    sys_mkdir("/list", 0o755).unwrap();
    for name in ["p", "q", "r"] {
        let fd = sys_open(
            &format!("/list/{name}"),
            O_RDWR | CreationFlags::O_CREAT.bits(),
            0o644,
        )
        .unwrap();
        sys_close(fd).unwrap();
    }

    let fd = sys_open("/list", O_RDONLY, 0).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = sys_readdir(fd).unwrap() {
        names.push(entry.name);
    }
    sys_close(fd).unwrap();
    for expected in [".", "..", "p", "q", "r"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
}

#[test]
fn select_reports_pipe_readiness() {
    setup();
    let (read_fd, write_fd) = sys_pipe().unwrap();

    // Nothing to read yet; the write side is ready.
    let (r, w) = sys_select(&[read_fd], &[write_fd], Some(1)).unwrap();
    assert!(r.is_empty());
    assert_eq!(w, vec![write_fd]);

    assert_eq!(sys_write(write_fd, b"now").unwrap(), 3);
    let (r, _w) = sys_select(&[read_fd], &[], Some(100)).unwrap();
    assert_eq!(r, vec![read_fd]);

    sys_close(read_fd).unwrap();
    sys_close(write_fd).unwrap();
}

#[test]
fn nonblocking_status_flag_round_trips_through_fcntl() {
    setup();
    let (read_fd, write_fd) = sys_pipe().unwrap();
    sys_fcntl(read_fd, FcntlCmd::SetFl(StatusFlags::O_NONBLOCK)).unwrap();
    let bits = sys_fcntl(read_fd, FcntlCmd::GetFl).unwrap();
    assert_eq!(bits as u32, StatusFlags::O_NONBLOCK.bits());

    let mut buf = [0u8; 4];
    assert_eq!(
        sys_read(read_fd, &mut buf).unwrap_err(),
        Error::new(Errno::EAGAIN)
    );
    sys_close(read_fd).unwrap();
    sys_close(write_fd).unwrap();
}

#[test]
fn umask_masks_creation_modes() {
    setup();
    let process = process::current().fork();
    Process::spawn_kthread(&process, || {
        let old = sys_umask(0o077);
        let fd = sys_open(
            "/masked",
            O_RDWR | CreationFlags::O_CREAT.bits(),
            0o666,
        )
        .unwrap();
        sys_close(fd).unwrap();
        let mode = sys_stat("/masked").unwrap().mode;
        assert_eq!(mode.bits() & 0o077, 0);
        sys_umask(old);
    })
    .join()
    .unwrap();
}

#[test]
fn openat_resolves_relative_to_the_descriptor() {
    setup();
    sys_mkdir("/at_base", 0o755).unwrap();
    let dirfd = sys_open("/at_base", O_RDONLY, 0).unwrap();

    let fd = sys_openat(
        dirfd,
        "leaf",
        O_RDWR | CreationFlags::O_CREAT.bits(),
        0o644,
    )
    .unwrap();
    assert_eq!(sys_write(fd, b"at").unwrap(), 2);
    sys_close(fd).unwrap();
    assert_eq!(sys_stat("/at_base/leaf").unwrap().size, 2);

    let fd = sys_openat(AT_FDCWD, "/at_base/leaf", O_RDONLY, 0).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(sys_read(fd, &mut buf).unwrap(), 2);
    assert_eq!(&buf, b"at");
    sys_close(fd).unwrap();
    sys_close(dirfd).unwrap();
}
