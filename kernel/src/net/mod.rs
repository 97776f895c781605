// SPDX-License-Identifier: MPL-2.0

//! The socket seam.
//!
//! The network stack is an external collaborator: protocol families
//! register a [`SocketProvider`] and the socket system calls dispatch
//! through it. With no provider registered for a family, socket creation
//! fails with `EAFNOSUPPORT`. A socket is carried by an open file and is
//! never seekable.

use crate::fs::file_handle::FileLike;
use crate::fs::utils::{AccessMode, IoEvents};
use crate::prelude::*;

/// A protocol-independent socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockAddr {
    pub family: i32,
    pub data: Vec<u8>,
}

/// The operations of a socket endpoint.
pub trait Socket: FileLike {
    fn bind(&self, addr: SockAddr) -> Result<()>;

    fn listen(&self, backlog: usize) -> Result<()>;

    fn accept(&self) -> Result<Arc<dyn Socket>>;

    fn connect(&self, addr: SockAddr) -> Result<()>;

    fn send(&self, buf: &[u8], flags: i32) -> Result<usize>;

    fn sendto(&self, buf: &[u8], flags: i32, addr: SockAddr) -> Result<usize>;

    fn recv(&self, buf: &mut [u8], flags: i32) -> Result<usize>;

    fn recvfrom(&self, buf: &mut [u8], flags: i32) -> Result<(usize, SockAddr)>;

    fn setsockopt(&self, level: i32, name: i32, value: &[u8]) -> Result<()>;

    /// The local address of the socket.
    fn sockaddr(&self) -> Result<SockAddr>;
}

/// A factory for one protocol family.
pub trait SocketProvider: Send + Sync {
    fn create(&self, domain: i32, type_: i32, protocol: i32) -> Result<Arc<dyn Socket>>;
}

static PROVIDERS: SpinLock<BTreeMap<i32, Arc<dyn SocketProvider>>> =
    SpinLock::new(BTreeMap::new());

/// Registers the provider of a protocol family.
pub fn register_provider(domain: i32, provider: Arc<dyn SocketProvider>) -> Result<()> {
    let mut providers = PROVIDERS.lock();
    if providers.contains_key(&domain) {
        return_errno_with_message!(Errno::EEXIST, "protocol family already registered");
    }
    providers.insert(domain, provider);
    Ok(())
}

/// Creates a socket through the registered provider of `domain`.
pub fn create_socket(domain: i32, type_: i32, protocol: i32) -> Result<Arc<dyn Socket>> {
    let provider = PROVIDERS
        .lock()
        .get(&domain)
        .cloned()
        .ok_or(Error::with_message(
            Errno::EAFNOSUPPORT,
            "no provider for this protocol family",
        ))?;
    provider.create(domain, type_, protocol)
}

/// The open-file wrapper around a socket endpoint.
pub struct SocketFile {
    socket: Arc<dyn Socket>,
}

impl SocketFile {
    pub fn new(socket: Arc<dyn Socket>) -> Arc<Self> {
        Arc::new(Self { socket })
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }
}

impl FileLike for SocketFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.socket.recv(buf, 0)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.socket.send(buf, 0)
    }

    fn poll(&self, mask: IoEvents) -> IoEvents {
        self.socket.poll(mask)
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDWR
    }

    fn as_socket(self: Arc<Self>) -> Option<Arc<dyn Socket>> {
        Some(self.socket.clone())
    }
}
