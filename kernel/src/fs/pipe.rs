// SPDX-License-Identifier: MPL-2.0

//! Pipes.
//!
//! A pipe is a fixed-capacity byte ring with separate reader and writer
//! reference counts, a spin lock, and two wait queues: one posted when
//! bytes are written (readers wait there) and one posted when bytes are
//! read or a side hangs up (writers wait there). The two endpoint types
//! are open files; the pipe dies when the last endpoint of both sides is
//! dropped.

use std::sync::atomic::{AtomicU32, Ordering};

use super::file_handle::FileLike;
use super::utils::{AccessMode, InodeMode, InodeType, IoEvents, Metadata, StatusFlags};
use crate::prelude::*;
use crate::process::signal::{self, SIGPIPE};
use crate::util::ring_buffer::RingBuffer;

pub const PIPE_BUF_SIZE: usize = 4096;

struct PipeState {
    ring: RingBuffer,
    readers: usize,
    writers: usize,
}

pub struct Pipe {
    state: SpinLock<PipeState>,
    /// Readers wait here; the write path posts it.
    bytes_written: WaitQueue,
    /// Writers wait here; the read path and reader hangup post it.
    bytes_read: WaitQueue,
}

/// Creates a connected reader/writer endpoint pair.
pub fn new_pair() -> (Arc<PipeReader>, Arc<PipeWriter>) {
    let pipe = Arc::new(Pipe {
        state: SpinLock::new(PipeState {
            ring: RingBuffer::new(PIPE_BUF_SIZE),
            readers: 1,
            writers: 1,
        }),
        bytes_written: WaitQueue::new(),
        bytes_read: WaitQueue::new(),
    });
    (
        Arc::new(PipeReader {
            pipe: pipe.clone(),
            status_flags: AtomicU32::new(0),
        }),
        Arc::new(PipeWriter {
            pipe,
            status_flags: AtomicU32::new(0),
        }),
    )
}

impl Pipe {
    /// One read attempt. `None` means "empty but writers remain": block.
    fn try_read(&self, buf: &mut [u8]) -> Option<Result<usize>> {
        let mut state = self.state.lock();
        if !state.ring.is_empty() {
            let read_len = state.ring.pop_slice(buf);
            drop(state);
            self.bytes_read.wake_all();
            return Some(Ok(read_len));
        }
        if state.writers == 0 {
            // End of stream.
            return Some(Ok(0));
        }
        None
    }

    /// One write attempt. `None` means "full but readers remain": block.
    fn try_write(&self, buf: &[u8]) -> Option<Result<usize>> {
        let mut state = self.state.lock();
        if state.readers == 0 {
            drop(state);
            current!().post_signal(SIGPIPE);
            return Some(Err(Error::with_message(
                Errno::EPIPE,
                "no reader is left on the pipe",
            )));
        }
        if !state.ring.is_full() {
            let written_len = state.ring.push_slice(buf);
            drop(state);
            self.bytes_written.wake_all();
            return Some(Ok(written_len));
        }
        None
    }

    fn read(&self, buf: &mut [u8], nonblocking: bool) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if nonblocking {
            return self
                .try_read(buf)
                .unwrap_or(Err(Error::with_message(Errno::EAGAIN, "the pipe is empty")));
        }
        signal::wait_until_interruptible(&self.bytes_written, || self.try_read(buf))?
    }

    fn write(&self, buf: &[u8], nonblocking: bool) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if nonblocking {
            return self
                .try_write(buf)
                .unwrap_or(Err(Error::with_message(Errno::EAGAIN, "the pipe is full")));
        }
        signal::wait_until_interruptible(&self.bytes_read, || self.try_write(buf))?
    }

    fn drop_reader(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            drop(state);
            // Writers must see the broken pipe.
            self.bytes_read.wake_all();
        }
    }

    fn drop_writer(&self) {
        let mut state = self.state.lock();
        state.writers -= 1;
        if state.writers == 0 {
            drop(state);
            // Readers must see the end of stream.
            self.bytes_written.wake_all();
        }
    }

    fn synthetic_metadata(mode: InodeMode) -> Metadata {
        Metadata {
            dev: 0,
            ino: 0,
            size: 0,
            blk_size: PIPE_BUF_SIZE,
            blocks: 0,
            atime: Default::default(),
            mtime: Default::default(),
            ctime: Default::default(),
            type_: InodeType::NamedPipe,
            mode,
            nlinks: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
        }
    }
}

/// The reading end of a pipe.
pub struct PipeReader {
    pipe: Arc<Pipe>,
    status_flags: AtomicU32,
}

impl FileLike for PipeReader {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let nonblocking = self.status_flags().contains(StatusFlags::O_NONBLOCK);
        self.pipe.read(buf, nonblocking)
    }

    fn poll(&self, mask: IoEvents) -> IoEvents {
        let state = self.pipe.state.lock();
        let mut events = IoEvents::empty();
        if !state.ring.is_empty() || state.writers == 0 {
            events |= IoEvents::IN;
        }
        events & mask
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(Pipe::synthetic_metadata(InodeMode::S_IRUSR))
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_RDONLY
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.pipe.drop_reader();
    }
}

/// The writing end of a pipe.
pub struct PipeWriter {
    pipe: Arc<Pipe>,
    status_flags: AtomicU32,
}

impl FileLike for PipeWriter {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let nonblocking = self.status_flags().contains(StatusFlags::O_NONBLOCK);
        self.pipe.write(buf, nonblocking)
    }

    fn poll(&self, mask: IoEvents) -> IoEvents {
        let state = self.pipe.state.lock();
        let mut events = IoEvents::empty();
        if !state.ring.is_full() || state.readers == 0 {
            events |= IoEvents::OUT;
        }
        events & mask
    }

    fn metadata(&self) -> Result<Metadata> {
        Ok(Pipe::synthetic_metadata(InodeMode::S_IWUSR))
    }

    fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status_flags.load(Ordering::Relaxed))
    }

    fn set_status_flags(&self, new_flags: StatusFlags) -> Result<()> {
        self.status_flags.store(new_flags.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::O_WRONLY
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.pipe.drop_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;

    #[test]
    fn bytes_round_trip_in_order() {
        let (reader, writer) = new_pair();
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(writer.write(&data).unwrap(), 256);

        let mut out = vec![0u8; 256];
        assert_eq!(reader.read(&mut out[..128]).unwrap(), 128);
        let n = reader.read(&mut out[128..]).unwrap();
        assert_eq!(n, 128);
        assert_eq!(out, data);
    }

    #[test]
    fn read_blocks_until_write() {
        let (reader, writer) = new_pair();
        let reader_thread = Process::spawn_kthread(&current!(), move || {
            let mut buf = [0u8; 4];
            let n = reader.read(&mut buf).unwrap();
            (n, buf)
        });
        std::thread::sleep(core::time::Duration::from_millis(20));
        writer.write(b"ping").unwrap();
        let (n, buf) = reader_thread.join().unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn read_after_writer_hangup_returns_zero() {
        let (reader, writer) = new_pair();
        writer.write(b"tail").unwrap();
        drop(writer);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_without_reader_breaks_pipe() {
        let (reader, writer) = new_pair();
        drop(reader);

        // The signal must land on the writing process.
        let writer_process = current!().fork();
        let result = Process::spawn_kthread(&writer_process, move || writer.write(b"x"))
            .join()
            .unwrap();
        assert_eq!(result.unwrap_err().error(), Errno::EPIPE);
        assert!(writer_process.pending_signals().contains(SIGPIPE));
    }

    #[test]
    fn nonblocking_read_and_write() {
        let (reader, writer) = new_pair();
        reader
            .set_status_flags(StatusFlags::O_NONBLOCK)
            .unwrap();
        writer
            .set_status_flags(StatusFlags::O_NONBLOCK)
            .unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap_err().error(), Errno::EAGAIN);

        let chunk = [7u8; 1024];
        let mut total = 0;
        loop {
            match writer.write(&chunk) {
                Ok(n) => total += n,
                Err(e) => {
                    assert_eq!(e.error(), Errno::EAGAIN);
                    break;
                }
            }
        }
        assert_eq!(total, PIPE_BUF_SIZE);
    }
}
