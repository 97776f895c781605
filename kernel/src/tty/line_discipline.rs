// SPDX-License-Identifier: MPL-2.0

//! The terminal line discipline.
//!
//! Input bytes run through a state machine: input-flag mapping, job
//! control keys, canonical line editing, and echoing. Completed input
//! (whole lines in canonical mode, threshold batches otherwise) moves to
//! the read buffer and posts the data-available semaphore that blocked
//! readers wait on. At most one reader is inside the read critical
//! region at a time, gated by the "available" mutex.
//!
//! An end-of-file key commits the staged line without the marker and
//! records the position as a boundary: the read that drains up to a
//! boundary stops there, and the read that starts on one consumes it and
//! returns zero bytes.

use kestrel_frame::time::TICK_HZ;

use super::termio::{KernelTermios, WinSize, CC_C_CHAR};
use crate::fs::utils::StatusFlags;
use crate::prelude::*;
use crate::process::signal::{self, SigNum, SIGINT, SIGQUIT, SIGTSTP};
use crate::util::ring_buffer::RingBuffer;

/// The read-buffer bound.
const BUFFER_CAPACITY: usize = 4096;

/// The line-buffer bound: bytes typed past it are dropped.
pub const MAX_INPUT: usize = 255;

pub type LdiscSignalSender = Arc<dyn Fn(SigNum) + Send + Sync + 'static>;

struct LdiscState {
    /// Bytes staged while in canonical mode.
    line: Vec<u8>,
    /// Bytes visible to readers.
    read_buffer: RingBuffer,
    /// Stream offsets of end-of-file boundaries.
    eof_marks: VecDeque<u64>,
    produced: u64,
    consumed: u64,
    /// Whether `data_available` currently holds a post.
    posted: bool,
}

impl LdiscState {
    fn readable(&self) -> bool {
        !self.read_buffer.is_empty() || !self.eof_marks.is_empty()
    }

    fn push_read_byte(&mut self, byte: u8) {
        if self.read_buffer.push(byte) {
            self.produced += 1;
        }
    }
}

pub struct LineDiscipline {
    state: SpinLock<LdiscState>,
    termios: SpinLock<KernelTermios>,
    winsize: SpinLock<WinSize>,
    /// Admits one reader into the read critical region.
    available: Mutex<()>,
    /// Posted by the input path when the read buffer turns readable.
    data_available: Semaphore,
    /// Posts job-control signals to the foreground process group.
    send_signal: LdiscSignalSender,
}

impl LineDiscipline {
    pub fn new(send_signal: LdiscSignalSender) -> Self {
        Self {
            state: SpinLock::new(LdiscState {
                line: Vec::new(),
                read_buffer: RingBuffer::new(BUFFER_CAPACITY),
                eof_marks: VecDeque::new(),
                produced: 0,
                consumed: 0,
                posted: false,
            }),
            termios: SpinLock::new(KernelTermios::default()),
            winsize: SpinLock::new(WinSize::default()),
            available: Mutex::new(()),
            data_available: Semaphore::new(0),
            send_signal,
        }
    }

    /// Feeds one input byte through the discipline. `echo` renders to the
    /// terminal; it is called with no lock held.
    pub fn push_char(&self, ch: u8, echo: &mut dyn FnMut(&[u8])) {
        let termios = *self.termios.lock();

        // Input-flag mapping.
        let ch = if termios.contains_istrip() { ch & 0x7f } else { ch };
        let ch = match ch {
            b'\r' if termios.contains_igncr() => return,
            b'\r' if termios.contains_icrnl() => b'\n',
            b'\n' if termios.contains_inlcr() => b'\r',
            _ => ch,
        };

        if termios.contains_isig() {
            let signal = match ch {
                ch if ch == termios.special_char(CC_C_CHAR::VINTR) => Some(SIGINT),
                ch if ch == termios.special_char(CC_C_CHAR::VQUIT) => Some(SIGQUIT),
                ch if ch == termios.special_char(CC_C_CHAR::VSUSP) => Some(SIGTSTP),
                _ => None,
            };
            if let Some(signal) = signal {
                if !termios.contains_noflsh() {
                    self.state.lock().line.clear();
                }
                (self.send_signal)(signal);
                return;
            }
        }

        if !termios.is_canonical_mode() {
            let threshold = (termios.special_char(CC_C_CHAR::VMIN) as usize).max(1);
            let mut state = self.state.lock();
            state.push_read_byte(ch);
            if state.read_buffer.len() >= threshold {
                self.post_locked(&mut state);
            }
            drop(state);
            self.echo(ch, &termios, echo);
            return;
        }

        // Canonical mode.
        if ch == termios.special_char(CC_C_CHAR::VERASE) {
            let erased = self.state.lock().line.pop().is_some();
            if erased && termios.contains_echo_erase() {
                echo(b"\x08 \x08");
            }
            return;
        }
        if ch == termios.special_char(CC_C_CHAR::VKILL) {
            let killed = {
                let mut state = self.state.lock();
                let killed = state.line.len();
                state.line.clear();
                killed
            };
            if termios.contains_echo_kill() {
                for _ in 0..killed {
                    echo(b"\x08 \x08");
                }
            }
            return;
        }
        if is_line_terminator(ch, &termios) {
            let is_eof = ch == termios.special_char(CC_C_CHAR::VEOF);
            let mut state = self.state.lock();
            if !is_eof {
                // The terminating newline is part of the line; the
                // end-of-file marker never is.
                state.line.push(ch);
            }
            let line = core::mem::take(&mut state.line);
            for byte in line {
                state.push_read_byte(byte);
            }
            if is_eof {
                let boundary = state.produced;
                state.eof_marks.push_back(boundary);
            }
            self.post_locked(&mut state);
            drop(state);
            if !is_eof {
                self.echo(ch, &termios, echo);
            }
            return;
        }

        {
            let mut state = self.state.lock();
            if state.line.len() < MAX_INPUT {
                state.line.push(ch);
            }
            // Dropped on overflow.
        }
        self.echo(ch, &termios, echo);
    }

    fn post_locked(&self, state: &mut LdiscState) {
        if !state.posted && state.readable() {
            state.posted = true;
            self.data_available.up();
        }
    }

    fn echo(&self, ch: u8, termios: &KernelTermios, echo: &mut dyn FnMut(&[u8])) {
        if termios.contain_echo() {
            match ch {
                b'\n' => echo(b"\n"),
                b'\r' => echo(b"\r\n"),
                ch if is_printable_char(ch) => echo(&[ch]),
                ch if is_ctrl_char(ch) && termios.contains_echo_ctl() => {
                    echo(&[b'^', ch + 0x40]);
                }
                _ => {}
            }
        } else if termios.contains_echo_nl() && ch == b'\n' {
            // A bare newline echoes even when general echo is off.
            echo(b"\n");
        }
    }

    /// Reads buffered input. `bg_check` runs before and after the
    /// blocking wait; a background caller is paused or refused there.
    pub fn read(
        &self,
        buf: &mut [u8],
        flags: StatusFlags,
        bg_check: &dyn Fn() -> Result<()>,
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Only one reader may wait in the critical region.
        let _available = self.available.lock();
        bg_check()?;

        let termios = *self.termios.lock();
        let vtime = termios.special_char(CC_C_CHAR::VTIME);
        if flags.contains(StatusFlags::O_NONBLOCK) {
            if self.data_available.try_down().is_err() {
                return_errno_with_message!(Errno::EAGAIN, "no terminal input buffered");
            }
        } else if !termios.is_canonical_mode() && vtime > 0 {
            // VTIME counts deciseconds.
            let ticks = vtime as u64 * (TICK_HZ / 10);
            if self.data_available.down_timed(ticks).is_err() {
                return Ok(0);
            }
        } else if let Err(e) = signal::down_intr(&self.data_available) {
            return Err(e);
        }

        if let Err(e) = bg_check() {
            // The consumed post goes back: this reader takes nothing.
            let mut state = self.state.lock();
            if state.readable() {
                self.data_available.up();
            } else {
                state.posted = false;
            }
            return Err(e);
        }

        let mut state = self.state.lock();
        let read_len = Self::copy_locked(&mut state, buf, &termios);
        // Let the next reader proceed immediately if data remains.
        if state.readable() {
            self.data_available.up();
        } else {
            state.posted = false;
        }
        Ok(read_len)
    }

    fn copy_locked(state: &mut LdiscState, buf: &mut [u8], termios: &KernelTermios) -> usize {
        let mark = state.eof_marks.front().copied();
        if mark == Some(state.consumed) {
            // A read that starts on the boundary is the end-of-file read.
            state.eof_marks.pop_front();
            return 0;
        }

        let mut read_len = 0;
        while read_len < buf.len() {
            if mark == Some(state.consumed) {
                // Stop short of the boundary; the next read consumes it.
                break;
            }
            let Some(byte) = state.read_buffer.pop() else {
                break;
            };
            state.consumed += 1;
            buf[read_len] = byte;
            read_len += 1;
            if termios.is_canonical_mode() && is_copy_terminator(byte, termios) {
                break;
            }
        }
        read_len
    }

    /// Whether buffered input is available right now.
    pub fn is_readable(&self) -> bool {
        self.state.lock().readable()
    }

    pub fn buffer_len(&self) -> usize {
        self.state.lock().read_buffer.len()
    }

    /// The number of bytes staged in the current line. Diagnostic.
    pub fn line_len(&self) -> usize {
        self.state.lock().line.len()
    }

    pub fn drain_input(&self) {
        let mut state = self.state.lock();
        state.line.clear();
        let drained = state.read_buffer.len() as u64;
        state.read_buffer.clear();
        state.consumed += drained;
        state.eof_marks.clear();
    }

    pub fn termios(&self) -> KernelTermios {
        *self.termios.lock()
    }

    pub fn set_termios(&self, termios: KernelTermios) {
        *self.termios.lock() = termios;
    }

    pub fn window_size(&self) -> WinSize {
        *self.winsize.lock()
    }

    pub fn set_window_size(&self, winsize: WinSize) {
        *self.winsize.lock() = winsize;
    }
}

fn is_line_terminator(ch: u8, termios: &KernelTermios) -> bool {
    if ch == b'\n'
        || ch == termios.special_char(CC_C_CHAR::VEOF)
        || ch == termios.special_char(CC_C_CHAR::VEOL)
    {
        return true;
    }
    if termios.contains_iexten() && ch == termios.special_char(CC_C_CHAR::VEOL2) {
        return true;
    }
    false
}

/// Line terminators as they appear in the read buffer: the end-of-file
/// marker never lands there.
fn is_copy_terminator(ch: u8, termios: &KernelTermios) -> bool {
    if ch == b'\n' || ch == termios.special_char(CC_C_CHAR::VEOL) {
        return true;
    }
    if termios.contains_iexten() && ch == termios.special_char(CC_C_CHAR::VEOL2) {
        return true;
    }
    false
}

fn is_printable_char(ch: u8) -> bool {
    (0x20..0x7f).contains(&ch)
}

fn is_ctrl_char(ch: u8) -> bool {
    if ch == b'\r' || ch == b'\n' {
        return false;
    }
    ch < 0x20
}
