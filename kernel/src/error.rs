// SPDX-License-Identifier: MPL-2.0

#![allow(dead_code)]

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,    /* Operation not permitted */
    ENOENT = 2,   /* No such file or directory */
    ESRCH = 3,    /* No such process */
    EINTR = 4,    /* Interrupted system call */
    EIO = 5,      /* I/O error */
    ENXIO = 6,    /* No such device or address */
    EBADF = 9,    /* Bad file number */
    EAGAIN = 11,  /* Try again */
    ENOMEM = 12,  /* Out of memory */
    EACCES = 13,  /* Permission denied */
    EFAULT = 14,  /* Bad address */
    EBUSY = 16,   /* Device or resource busy */
    EEXIST = 17,  /* File exists */
    EXDEV = 18,   /* Cross-device link */
    ENODEV = 19,  /* No such device */
    ENOTDIR = 20, /* Not a directory */
    EISDIR = 21,  /* Is a directory */
    EINVAL = 22,  /* Invalid argument */
    ENFILE = 23,  /* File table overflow */
    EMFILE = 24,  /* Too many open files */
    ENOTTY = 25,  /* Not a typewriter */
    EFBIG = 27,   /* File too large */
    ENOSPC = 28,  /* No space left on device */
    ESPIPE = 29,  /* Illegal seek */
    EROFS = 30,   /* Read-only file system */
    EMLINK = 31,  /* Too many links */
    EPIPE = 32,   /* Broken pipe */
    ERANGE = 34,  /* Math result not representable */

    ENAMETOOLONG = 36, /* File name too long */
    ENOTEMPTY = 39,    /* Directory not empty */
    EOVERFLOW = 75,    /* Value too large for defined data type */

    ENOTSOCK = 88,        /* Socket operation on non-socket */
    EOPNOTSUPP = 95,      /* Operation not supported on transport endpoint */
    EAFNOSUPPORT = 97,    /* Address family not supported by protocol */
    ETIMEDOUT = 110,      /* Connection timed out */

    /// The call was paused by a signal and the system-call layer decides
    /// whether to restart it. Never escapes to user space.
    ERESTARTSYS = 512,
}

/// Error used in this crate.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.errno == other.errno
    }
}

impl Eq for Error {}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<kestrel_frame::Error> for Error {
    fn from(frame_error: kestrel_frame::Error) -> Self {
        match frame_error {
            kestrel_frame::Error::Interrupted => Error::new(Errno::EINTR),
            kestrel_frame::Error::TimedOut => Error::new(Errno::ETIMEDOUT),
            kestrel_frame::Error::WouldBlock => Error::new(Errno::EAGAIN),
            kestrel_frame::Error::InvalidArgs => Error::new(Errno::EINVAL),
            kestrel_frame::Error::NotFound => Error::new(Errno::ENOENT),
            kestrel_frame::Error::NoMemory => Error::new(Errno::ENOMEM),
        }
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_: core::str::Utf8Error) -> Self {
        Error::with_message(Errno::EINVAL, "invalid utf-8 string")
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
