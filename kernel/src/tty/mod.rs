// SPDX-License-Identifier: MPL-2.0

//! Terminals.
//!
//! A [`Tty`] owns a line discipline, an output driver for echoes and
//! writes, and the foreground process group. Terminals register as
//! character devices under major 4; the first open without `O_NOCTTY` by
//! a process with no controlling terminal attaches it.

mod line_discipline;
pub mod termio;

use std::io::Write as _;

pub use line_discipline::{LineDiscipline, MAX_INPUT};
use spin::Once;

use self::termio::{KernelTermios, WinSize};
use crate::device::{self, CharDevice, DeviceId};
use crate::fs::utils::{IoEvents, IoctlCmd, StatusFlags};
use crate::prelude::*;
use crate::process::signal::SIGTTIN;
use crate::process::{self, Pgid};

pub const TTY_MAJOR: u32 = 4;

/// The output sink of a terminal.
pub trait TtyDriver: Send + Sync {
    fn output(&self, bytes: &[u8]);
}

/// The console: bytes go to the screen.
pub struct ConsoleDriver;

impl TtyDriver for ConsoleDriver {
    fn output(&self, bytes: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }
}

pub struct Tty {
    index: u32,
    ldisc: LineDiscipline,
    driver: Arc<dyn TtyDriver>,
    /// Foreground-group updates are serialized by this lock.
    fg_pgid: SpinLock<Option<Pgid>>,
    this: Weak<Tty>,
}

impl Tty {
    pub fn new(index: u32, driver: Arc<dyn TtyDriver>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Tty>| {
            let weak = this.clone();
            let send_signal: line_discipline::LdiscSignalSender = Arc::new(move |sig| {
                let Some(tty) = weak.upgrade() else {
                    return;
                };
                if let Some(fg_pgid) = *tty.fg_pgid.lock() {
                    process::kill_group(fg_pgid, sig);
                };
            });
            Tty {
                index,
                ldisc: LineDiscipline::new(send_signal),
                driver,
                fg_pgid: SpinLock::new(None),
                this: this.clone(),
            }
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Feeds input bytes (from the keyboard ISR path) to the discipline.
    pub fn push_input(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.ldisc
                .push_char(byte, &mut |echoed| self.driver.output(echoed));
        }
    }

    pub fn read(&self, buf: &mut [u8], flags: StatusFlags) -> Result<usize> {
        self.ldisc.read(buf, flags, &|| self.check_background_read())
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let termios = self.ldisc.termios();
        if termios.output_nl_to_crnl() {
            let mut out = Vec::with_capacity(buf.len());
            for &byte in buf {
                if byte == b'\n' {
                    out.push(b'\r');
                }
                out.push(byte);
            }
            self.driver.output(&out);
        } else {
            self.driver.output(buf);
        }
        Ok(buf.len())
    }

    /// The background-read check: a process whose group is not the
    /// foreground group is paused with the terminal-input signal, or
    /// refused outright when it would never see the signal.
    fn check_background_read(&self) -> Result<()> {
        let current = current!();
        let Some(ctty) = current.ctty() else {
            return Ok(());
        };
        if !Weak::ptr_eq(&ctty.this, &self.this) {
            return Ok(());
        }
        let Some(fg_pgid) = *self.fg_pgid.lock() else {
            return Ok(());
        };
        if fg_pgid == current.pgid() {
            return Ok(());
        }

        if current.is_signal_blocked_or_ignored(SIGTTIN) {
            return_errno_with_message!(Errno::EIO, "background read with terminal-input blocked");
        }
        process::kill_group(current.pgid(), SIGTTIN);
        return_errno_with_message!(Errno::ERESTARTSYS, "background read paused")
    }

    pub fn fg_pgid(&self) -> Option<Pgid> {
        *self.fg_pgid.lock()
    }

    pub fn set_fg_pgid(&self, pgid: Pgid) {
        *self.fg_pgid.lock() = Some(pgid);
    }

    pub fn termios(&self) -> KernelTermios {
        self.ldisc.termios()
    }

    pub fn set_termios(&self, termios: KernelTermios) {
        self.ldisc.set_termios(termios);
    }

    pub fn window_size(&self) -> WinSize {
        self.ldisc.window_size()
    }

    pub fn set_window_size(&self, winsize: WinSize) {
        self.ldisc.set_window_size(winsize);
    }

    pub fn ioctl(&self, cmd: IoctlCmd, arg: usize) -> Result<i32> {
        match cmd {
            IoctlCmd::TiocGpgrp => Ok(self.fg_pgid().unwrap_or(0) as i32),
            IoctlCmd::TiocSpgrp => {
                self.set_fg_pgid(arg as Pgid);
                Ok(0)
            }
            // The termios and window-size requests carry structures; the
            // typed system-call entries serve them.
            _ => return_errno_with_message!(Errno::EINVAL, "unsupported terminal request"),
        }
    }

    pub fn poll(&self, mask: IoEvents) -> IoEvents {
        let mut events = IoEvents::OUT;
        if self.ldisc.is_readable() {
            events |= IoEvents::IN;
        }
        events & mask
    }

    #[cfg(test)]
    pub(crate) fn ldisc(&self) -> &LineDiscipline {
        &self.ldisc
    }
}

/// The terminal character-device table: minors to terminals.
struct TtyChar;

impl CharDevice for TtyChar {
    fn open(&self, minor: u32) -> Result<()> {
        get(minor).map(|_| ())
    }

    fn close(&self, _minor: u32) -> Result<()> {
        Ok(())
    }

    fn read(&self, minor: u32, buf: &mut [u8], flags: StatusFlags) -> Result<usize> {
        get(minor)?.read(buf, flags)
    }

    fn write(&self, minor: u32, buf: &[u8]) -> Result<usize> {
        get(minor)?.write(buf)
    }
}

static TTYS: Once<SpinLock<BTreeMap<u32, Arc<Tty>>>> = Once::new();
static CONSOLE: Once<Arc<Tty>> = Once::new();

fn ttys() -> &'static SpinLock<BTreeMap<u32, Arc<Tty>>> {
    TTYS.call_once(|| SpinLock::new(BTreeMap::new()))
}

/// Registers the terminal driver and creates the console terminal.
pub fn init(driver: Arc<dyn TtyDriver>) -> Arc<Tty> {
    let console = CONSOLE
        .call_once(|| {
            let console = Tty::new(0, driver);
            ttys().lock().insert(0, console.clone());
            if let Err(e) = device::register_char(TTY_MAJOR, "tty", Arc::new(TtyChar)) {
                warn!("tty: char major registration: {:?}", e);
            }
            console
        })
        .clone();
    console
}

/// Adds a terminal under a fresh minor and returns it.
pub fn add_tty(tty: Arc<Tty>) {
    ttys().lock().insert(tty.index, tty);
}

pub fn console() -> Option<Arc<Tty>> {
    CONSOLE.get().cloned()
}

fn get(minor: u32) -> Result<Arc<Tty>> {
    ttys()
        .lock()
        .get(&minor)
        .cloned()
        .ok_or(Error::with_message(Errno::ENXIO, "no such terminal"))
}

/// The terminal behind a device id, if the id names one.
pub fn tty_of(dev: DeviceId) -> Option<Arc<Tty>> {
    if dev.major != TTY_MAJOR {
        return None;
    }
    get(dev.minor).ok()
}

#[cfg(test)]
mod tests {
    use super::termio::{C_LFLAGS, CC_C_CHAR};
    use super::*;
    use crate::process::signal::{SigAction, SIGINT, SIGTTIN};
    use crate::process::Process;

    struct EchoSink(SpinLock<Vec<u8>>);

    impl EchoSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(SpinLock::new(Vec::new())))
        }

        fn take(&self) -> Vec<u8> {
            let mut bytes = self.0.lock();
            core::mem::take(&mut *bytes)
        }
    }

    impl TtyDriver for EchoSink {
        fn output(&self, bytes: &[u8]) {
            self.0.lock().extend_from_slice(bytes);
        }
    }

    fn test_tty() -> (Arc<Tty>, Arc<EchoSink>) {
        let sink = EchoSink::new();
        (Tty::new(99, sink.clone()), sink)
    }

    #[test]
    fn canonical_line_is_delivered_whole_and_in_pieces() {
        let (tty, _sink) = test_tty();

        tty.push_input(b"abc\n");
        let mut buf = [0u8; 5];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 4);
        assert_eq!(&buf[..4], b"abc\n");

        tty.push_input(b"abc\n");
        let mut buf = [0u8; 2];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 2);
        assert_eq!(&buf, b"c\n");
    }

    #[test]
    fn end_of_file_alone_reads_zero() {
        let (tty, _sink) = test_tty();
        let eof = tty.termios().special_char(CC_C_CHAR::VEOF);

        tty.push_input(&[eof]);
        let mut buf = [0u8; 5];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 0);
    }

    #[test]
    fn end_of_file_flushes_partial_line_then_reads_zero() {
        let (tty, _sink) = test_tty();
        let eof = tty.termios().special_char(CC_C_CHAR::VEOF);

        tty.push_input(b"abc");
        tty.push_input(&[eof]);
        let mut buf = [0u8; 5];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 0);
    }

    #[test]
    fn erase_drops_the_last_byte() {
        let (tty, sink) = test_tty();
        let erase = tty.termios().special_char(CC_C_CHAR::VERASE);

        tty.push_input(b"ad");
        tty.push_input(&[erase]);
        tty.push_input(b"bc\n");
        let mut buf = [0u8; 8];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 4);
        assert_eq!(&buf[..4], b"abc\n");
        // The visible erase went to the screen (ECHOE is on by default).
        assert!(sink
            .take()
            .windows(3)
            .any(|window| window == b"\x08 \x08"));
    }

    #[test]
    fn kill_empties_the_line() {
        let (tty, _sink) = test_tty();
        let kill = tty.termios().special_char(CC_C_CHAR::VKILL);

        tty.push_input(b"junk");
        tty.push_input(&[kill]);
        tty.push_input(b"ok\n");
        let mut buf = [0u8; 8];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 3);
        assert_eq!(&buf[..3], b"ok\n");
    }

    #[test]
    fn overlong_line_drops_excess_bytes() {
        let (tty, _sink) = test_tty();
        for _ in 0..(MAX_INPUT + 16) {
            tty.push_input(b"x");
        }
        tty.push_input(b"\n");
        let mut buf = [0u8; MAX_INPUT + 32];
        let n = tty.read(&mut buf, StatusFlags::empty()).unwrap();
        assert_eq!(n, MAX_INPUT + 1); // the line limit plus the newline
    }

    #[test]
    fn nonblocking_read_on_empty_terminal() {
        let (tty, _sink) = test_tty();
        let mut buf = [0u8; 4];
        assert_eq!(
            tty.read(&mut buf, StatusFlags::O_NONBLOCK)
                .unwrap_err()
                .error(),
            Errno::EAGAIN
        );
    }

    #[test]
    fn blocked_read_wakes_on_input() {
        let (tty, _sink) = test_tty();
        let reader = {
            let tty = tty.clone();
            Process::spawn_kthread(&current!(), move || {
                let mut buf = [0u8; 8];
                let n = tty.read(&mut buf, StatusFlags::empty()).unwrap();
                buf[..n].to_vec()
            })
        };
        std::thread::sleep(core::time::Duration::from_millis(20));
        tty.push_input(b"hi\n");
        assert_eq!(reader.join().unwrap(), b"hi\n");
    }

    #[test]
    fn interrupt_key_signals_foreground_group_and_flushes() {
        let (tty, _sink) = test_tty();
        let fg = current!().fork();
        fg.set_pgid(9001);
        tty.set_fg_pgid(9001);

        tty.push_input(b"ab");
        tty.push_input(&[0x03]); // ^C
        assert!(fg.pending_signals().contains(SIGINT));
        assert_eq!(tty.ldisc().line_len(), 0);

        tty.push_input(b"cd\n");
        let mut buf = [0u8; 8];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 3);
        assert_eq!(&buf[..3], b"cd\n");
    }

    #[test]
    fn no_flush_preserves_the_line_on_interrupt() {
        let (tty, _sink) = test_tty();
        let fg = current!().fork();
        fg.set_pgid(9002);
        tty.set_fg_pgid(9002);

        let mut termios = tty.termios();
        termios.set_lflags(termios.lflags() | C_LFLAGS::NOFLSH);
        tty.set_termios(termios);

        tty.push_input(b"ab");
        tty.push_input(&[0x03]);
        assert!(fg.pending_signals().contains(SIGINT));
        assert_eq!(tty.ldisc().line_len(), 2);

        tty.push_input(b"\n");
        let mut buf = [0u8; 8];
        assert_eq!(tty.read(&mut buf, StatusFlags::empty()).unwrap(), 3);
        assert_eq!(&buf[..3], b"ab\n");
    }

    #[test]
    fn background_read_is_paused_or_refused() {
        let (tty, _sink) = test_tty();
        tty.set_fg_pgid(7001);

        let bg = current!().fork();
        bg.set_pgid(7002);
        let result = {
            let tty = tty.clone();
            let bg = bg.clone();
            Process::spawn_kthread(&bg, move || {
                current!().set_ctty(tty.clone());
                let mut buf = [0u8; 4];
                tty.read(&mut buf, StatusFlags::empty())
            })
            .join()
            .unwrap()
        };
        assert_eq!(result.unwrap_err().error(), Errno::ERESTARTSYS);
        assert!(bg.pending_signals().contains(SIGTTIN));

        // With the signal ignored, the read is refused instead.
        let bg2 = current!().fork();
        bg2.set_pgid(7003);
        bg2.set_disposition(SIGTTIN, SigAction::Ignore);
        let result = {
            let tty = tty.clone();
            Process::spawn_kthread(&bg2, move || {
                current!().set_ctty(tty.clone());
                let mut buf = [0u8; 4];
                tty.read(&mut buf, StatusFlags::empty())
            })
            .join()
            .unwrap()
        };
        assert_eq!(result.unwrap_err().error(), Errno::EIO);
    }

    #[test]
    fn echo_newline_without_general_echo() {
        let (tty, sink) = test_tty();
        let mut termios = tty.termios();
        let lflags = (termios.lflags() - C_LFLAGS::ECHO) | C_LFLAGS::ECHONL;
        termios.set_lflags(lflags);
        tty.set_termios(termios);

        tty.push_input(b"a\n");
        assert_eq!(sink.take(), b"\n");
    }
}
