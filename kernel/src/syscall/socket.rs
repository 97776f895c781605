// SPDX-License-Identifier: MPL-2.0

//! Socket system calls, dispatched through the provider seam.

use crate::fs::file_table::{FdFlags, FileDesc};
use crate::net::{self, SockAddr, Socket, SocketFile};
use crate::prelude::*;

fn get_socket(fd: FileDesc) -> Result<Arc<dyn Socket>> {
    let current = current!();
    let file = {
        let file_table = current.file_table().lock();
        file_table.get_file(fd)?.clone()
    };
    file.as_socket()
        .ok_or(Error::with_message(Errno::ENOTSOCK, "not a socket"))
}

fn install(socket: Arc<dyn Socket>) -> Result<FileDesc> {
    let current = current!();
    let file = SocketFile::new(socket);
    let fd = current.file_table().lock().insert(file, FdFlags::empty());
    fd
}

pub fn sys_socket(domain: i32, type_: i32, protocol: i32) -> Result<FileDesc> {
    let socket = net::create_socket(domain, type_, protocol)?;
    install(socket)
}

pub fn sys_bind(fd: FileDesc, addr: SockAddr) -> Result<()> {
    get_socket(fd)?.bind(addr)
}

pub fn sys_listen(fd: FileDesc, backlog: usize) -> Result<()> {
    get_socket(fd)?.listen(backlog)
}

pub fn sys_accept(fd: FileDesc) -> Result<FileDesc> {
    let accepted = super::with_restart(|| get_socket(fd)?.accept())?;
    install(accepted)
}

pub fn sys_connect(fd: FileDesc, addr: SockAddr) -> Result<()> {
    let socket = get_socket(fd)?;
    super::with_restart(|| socket.connect(addr.clone()))
}

pub fn sys_send(fd: FileDesc, buf: &[u8], flags: i32) -> Result<usize> {
    let socket = get_socket(fd)?;
    super::with_restart(|| socket.send(buf, flags))
}

pub fn sys_sendto(fd: FileDesc, buf: &[u8], flags: i32, addr: SockAddr) -> Result<usize> {
    let socket = get_socket(fd)?;
    super::with_restart(|| socket.sendto(buf, flags, addr.clone()))
}

pub fn sys_recv(fd: FileDesc, buf: &mut [u8], flags: i32) -> Result<usize> {
    let socket = get_socket(fd)?;
    super::with_restart(|| socket.recv(buf, flags))
}

pub fn sys_recvfrom(fd: FileDesc, buf: &mut [u8], flags: i32) -> Result<(usize, SockAddr)> {
    let socket = get_socket(fd)?;
    super::with_restart(|| socket.recvfrom(buf, flags))
}

pub fn sys_setsockopt(fd: FileDesc, level: i32, name: i32, value: &[u8]) -> Result<()> {
    get_socket(fd)?.setsockopt(level, name, value)
}

pub fn sys_getsockaddr(fd: FileDesc) -> Result<SockAddr> {
    get_socket(fd)?.sockaddr()
}
