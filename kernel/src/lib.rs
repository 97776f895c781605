// SPDX-License-Identifier: MPL-2.0

//! The OS personality of the kestrel kernel.
//!
//! Built on the `kestrel-frame` substrate, this crate implements the
//! POSIX-shaped core: the virtual file system (inodes behind a driver
//! contract, mount graph, path resolution, per-process descriptor
//! tables), pipes, the character/block device registry, the terminal
//! line discipline with job control, a minimal process and signal model,
//! and the system-call surface over all of it.

pub mod device;
pub mod error;
pub mod fs;
pub mod net;
pub mod process;
pub mod syscall;
pub mod tty;
pub mod util;

pub(crate) mod prelude;

pub use error::{Errno, Error};
