// SPDX-License-Identifier: MPL-2.0

//! Terminal system calls.

use crate::fs::file_table::FileDesc;
use crate::fs::utils::IoctlCmd;
use crate::prelude::*;
use crate::process::Pgid;
use crate::tty::termio::{KernelTermios, WinSize};
use crate::tty::Tty;

fn tty_of_fd(fd: FileDesc) -> Result<Arc<Tty>> {
    let current = current!();
    let file = {
        let file_table = current.file_table().lock();
        file_table.get_file(fd)?.clone()
    };
    file.as_tty()
        .ok_or(Error::with_message(Errno::ENOTTY, "not a terminal"))
}

pub fn sys_isatty(fd: FileDesc) -> Result<bool> {
    Ok(tty_of_fd(fd).is_ok())
}

pub fn sys_tcgetattr(fd: FileDesc) -> Result<KernelTermios> {
    Ok(tty_of_fd(fd)?.termios())
}

pub fn sys_tcsetattr(fd: FileDesc, termios: KernelTermios) -> Result<()> {
    tty_of_fd(fd)?.set_termios(termios);
    Ok(())
}

pub fn sys_tcgetpgrp(fd: FileDesc) -> Result<Pgid> {
    tty_of_fd(fd)?
        .fg_pgid()
        .ok_or(Error::with_message(Errno::ENOTTY, "no foreground group"))
}

pub fn sys_tcsetpgrp(fd: FileDesc, pgid: Pgid) -> Result<()> {
    tty_of_fd(fd)?.set_fg_pgid(pgid);
    Ok(())
}

pub fn sys_getwinsize(fd: FileDesc) -> Result<WinSize> {
    Ok(tty_of_fd(fd)?.window_size())
}

pub fn sys_setwinsize(fd: FileDesc, winsize: WinSize) -> Result<()> {
    tty_of_fd(fd)?.set_window_size(winsize);
    Ok(())
}

pub fn sys_ioctl(fd: FileDesc, cmd: IoctlCmd, arg: usize) -> Result<i32> {
    let current = current!();
    let file = {
        let file_table = current.file_table().lock();
        file_table.get_file(fd)?.clone()
    };
    file.ioctl(cmd, arg)
}
