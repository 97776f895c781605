// SPDX-License-Identifier: MPL-2.0

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use crate::prelude::*;

const KERNEL_NCCS: usize = 19;

type CcT = u8;

bitflags! {
    pub struct C_IFLAGS: u32 {
        const IGNBRK  = 0x001;  /* Ignore break condition */
        const BRKINT  = 0x002;  /* Signal interrupt on break */
        const IGNPAR  = 0x004;  /* Ignore characters with parity errors */
        const PARMRK  = 0x008;  /* Mark parity and framing errors */
        const INPCK   = 0x010;  /* Enable input parity check */
        const ISTRIP  = 0x020;  /* Strip 8th bit off characters */
        const INLCR   = 0x040;  /* Map NL to CR on input */
        const IGNCR   = 0x080;  /* Ignore CR */
        const ICRNL   = 0x100;  /* Map CR to NL on input */
        const IXON    = 0x0400;
        const IXOFF   = 0x1000;
    }
}

impl Default for C_IFLAGS {
    fn default() -> Self {
        C_IFLAGS::ICRNL | C_IFLAGS::IXON
    }
}

bitflags! {
    pub struct C_OFLAGS: u32 {
        const OPOST  = 1 << 0;  /* Perform output processing */
        const OLCUC  = 1 << 1;
        const ONLCR  = 1 << 2;
        const OCRNL  = 1 << 3;
        const ONOCR  = 1 << 4;
        const ONLRET = 1 << 5;
    }
}

impl Default for C_OFLAGS {
    fn default() -> Self {
        C_OFLAGS::OPOST | C_OFLAGS::ONLCR
    }
}

#[derive(Debug, Clone, Copy)]
pub struct C_CFLAGS(u32);

const CREAD: u32 = 0x0000_0080;
const CBAUD_MASK: u32 = 0x0000_100f;
const CSIZE_MASK: u32 = 0x0000_0030;

impl Default for C_CFLAGS {
    fn default() -> Self {
        let cbaud = C_CFLAGS_BAUD::B38400 as u32;
        let csize = C_CFLAGS_CSIZE::CS8 as u32;
        Self(cbaud | csize | CREAD)
    }
}

impl C_CFLAGS {
    pub fn cbaud(&self) -> Result<C_CFLAGS_BAUD> {
        C_CFLAGS_BAUD::try_from(self.0 & CBAUD_MASK)
    }

    pub fn csize(&self) -> Result<C_CFLAGS_CSIZE> {
        C_CFLAGS_CSIZE::try_from(self.0 & CSIZE_MASK)
    }

    pub fn cread(&self) -> bool {
        self.0 & CREAD != 0
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C_CFLAGS_CSIZE {
    CS5 = 0x0000_0000,
    CS6 = 0x0000_0010,
    CS7 = 0x0000_0020,
    CS8 = 0x0000_0030,
}

impl TryFrom<u32> for C_CFLAGS_CSIZE {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x0000_0000 => Ok(Self::CS5),
            0x0000_0010 => Ok(Self::CS6),
            0x0000_0020 => Ok(Self::CS7),
            0x0000_0030 => Ok(Self::CS8),
            _ => return_errno_with_message!(Errno::EINVAL, "invalid character size"),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C_CFLAGS_BAUD {
    B0 = 0x00, /* hang up */
    B50 = 0x01,
    B75 = 0x02,
    B110 = 0x03,
    B134 = 0x04,
    B150 = 0x05,
    B200 = 0x06,
    B300 = 0x07,
    B600 = 0x08,
    B1200 = 0x09,
    B1800 = 0x0a,
    B2400 = 0x0b,
    B4800 = 0x0c,
    B9600 = 0x0d,
    B19200 = 0x0e,
    B38400 = 0x0f,
}

impl TryFrom<u32> for C_CFLAGS_BAUD {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        if value > 0x0f {
            return_errno_with_message!(Errno::EINVAL, "invalid baud rate");
        }
        // The discriminants are dense from 0.
        Ok(match value {
            0x00 => Self::B0,
            0x01 => Self::B50,
            0x02 => Self::B75,
            0x03 => Self::B110,
            0x04 => Self::B134,
            0x05 => Self::B150,
            0x06 => Self::B200,
            0x07 => Self::B300,
            0x08 => Self::B600,
            0x09 => Self::B1200,
            0x0a => Self::B1800,
            0x0b => Self::B2400,
            0x0c => Self::B4800,
            0x0d => Self::B9600,
            0x0e => Self::B19200,
            _ => Self::B38400,
        })
    }
}

bitflags! {
    pub struct C_LFLAGS: u32 {
        const ISIG    = 0x00001;
        const ICANON  = 0x00002;
        const ECHO    = 0x00008;
        const ECHOE   = 0x00010;
        const ECHOK   = 0x00020;
        const ECHONL  = 0x00040;
        const NOFLSH  = 0x00080;
        const TOSTOP  = 0x00100;
        const ECHOCTL = 0x00200;
        const IEXTEN  = 0x08000;
    }
}

impl Default for C_LFLAGS {
    fn default() -> Self {
        C_LFLAGS::ICANON
            | C_LFLAGS::ECHO
            | C_LFLAGS::ISIG
            | C_LFLAGS::ECHOE
            | C_LFLAGS::ECHOK
            | C_LFLAGS::ECHOCTL
            | C_LFLAGS::IEXTEN
    }
}

/* c_cc character indices */
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum CC_C_CHAR {
    VINTR = 0,
    VQUIT = 1,
    VERASE = 2,
    VKILL = 3,
    VEOF = 4,
    VTIME = 5,
    VMIN = 6,
    VSWTC = 7,
    VSTART = 8,
    VSTOP = 9,
    VSUSP = 10,
    VEOL = 11,
    VREPRINT = 12,
    VDISCARD = 13,
    VWERASE = 14,
    VLNEXT = 15,
    VEOL2 = 16,
}

impl CC_C_CHAR {
    pub fn default_char(&self) -> u8 {
        match self {
            CC_C_CHAR::VINTR => control_character('C'),
            CC_C_CHAR::VQUIT => control_character('\\'),
            CC_C_CHAR::VERASE => b'\x7f',
            CC_C_CHAR::VKILL => control_character('U'),
            CC_C_CHAR::VEOF => control_character('D'),
            CC_C_CHAR::VTIME => b'\0',
            CC_C_CHAR::VMIN => 1,
            CC_C_CHAR::VSWTC => b'\0',
            CC_C_CHAR::VSTART => control_character('Q'),
            CC_C_CHAR::VSTOP => control_character('S'),
            CC_C_CHAR::VSUSP => control_character('Z'),
            CC_C_CHAR::VEOL => b'\0',
            CC_C_CHAR::VREPRINT => control_character('R'),
            CC_C_CHAR::VDISCARD => control_character('O'),
            CC_C_CHAR::VWERASE => control_character('W'),
            CC_C_CHAR::VLNEXT => control_character('V'),
            CC_C_CHAR::VEOL2 => b'\0',
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KernelTermios {
    c_iflags: C_IFLAGS,
    c_oflags: C_OFLAGS,
    c_cflags: C_CFLAGS,
    c_lflags: C_LFLAGS,
    c_line: CcT,
    c_cc: [CcT; KERNEL_NCCS],
}

impl Default for KernelTermios {
    fn default() -> Self {
        let mut termios = Self {
            c_iflags: C_IFLAGS::default(),
            c_oflags: C_OFLAGS::default(),
            c_cflags: C_CFLAGS::default(),
            c_lflags: C_LFLAGS::default(),
            c_line: 0,
            c_cc: [0; KERNEL_NCCS],
        };
        for idx in 0..=CC_C_CHAR::VEOL2 as usize {
            let cc = match idx {
                0 => CC_C_CHAR::VINTR,
                1 => CC_C_CHAR::VQUIT,
                2 => CC_C_CHAR::VERASE,
                3 => CC_C_CHAR::VKILL,
                4 => CC_C_CHAR::VEOF,
                5 => CC_C_CHAR::VTIME,
                6 => CC_C_CHAR::VMIN,
                7 => CC_C_CHAR::VSWTC,
                8 => CC_C_CHAR::VSTART,
                9 => CC_C_CHAR::VSTOP,
                10 => CC_C_CHAR::VSUSP,
                11 => CC_C_CHAR::VEOL,
                12 => CC_C_CHAR::VREPRINT,
                13 => CC_C_CHAR::VDISCARD,
                14 => CC_C_CHAR::VWERASE,
                15 => CC_C_CHAR::VLNEXT,
                _ => CC_C_CHAR::VEOL2,
            };
            termios.c_cc[idx] = cc.default_char();
        }
        termios
    }
}

impl KernelTermios {
    pub fn special_char(&self, cc_c_char: CC_C_CHAR) -> u8 {
        self.c_cc[cc_c_char as usize]
    }

    pub fn set_special_char(&mut self, cc_c_char: CC_C_CHAR, value: u8) {
        self.c_cc[cc_c_char as usize] = value;
    }

    pub fn lflags(&self) -> C_LFLAGS {
        self.c_lflags
    }

    pub fn set_lflags(&mut self, lflags: C_LFLAGS) {
        self.c_lflags = lflags;
    }

    pub fn iflags(&self) -> C_IFLAGS {
        self.c_iflags
    }

    pub fn set_iflags(&mut self, iflags: C_IFLAGS) {
        self.c_iflags = iflags;
    }

    pub fn oflags(&self) -> C_OFLAGS {
        self.c_oflags
    }

    pub fn cflags(&self) -> C_CFLAGS {
        self.c_cflags
    }

    /// Canonical mode: input is handled by lines, not by characters.
    pub fn is_canonical_mode(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ICANON)
    }

    pub fn contains_icrnl(&self) -> bool {
        self.c_iflags.contains(C_IFLAGS::ICRNL)
    }

    pub fn contains_inlcr(&self) -> bool {
        self.c_iflags.contains(C_IFLAGS::INLCR)
    }

    pub fn contains_igncr(&self) -> bool {
        self.c_iflags.contains(C_IFLAGS::IGNCR)
    }

    pub fn contains_istrip(&self) -> bool {
        self.c_iflags.contains(C_IFLAGS::ISTRIP)
    }

    pub fn contains_isig(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ISIG)
    }

    pub fn contains_noflsh(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::NOFLSH)
    }

    pub fn contain_echo(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHO)
    }

    pub fn contains_echo_erase(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHOE)
    }

    pub fn contains_echo_kill(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHOK)
    }

    pub fn contains_echo_nl(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHONL)
    }

    pub fn contains_echo_ctl(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::ECHOCTL)
    }

    pub fn contains_iexten(&self) -> bool {
        self.c_lflags.contains(C_LFLAGS::IEXTEN)
    }

    pub fn output_nl_to_crnl(&self) -> bool {
        self.c_oflags.contains(C_OFLAGS::OPOST) && self.c_oflags.contains(C_OFLAGS::ONLCR)
    }
}

const fn control_character(c: char) -> u8 {
    debug_assert!(c as u8 >= b'A');
    c as u8 - b'A' + 1u8
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WinSize {
    pub ws_row: u16,
    pub ws_col: u16,
    pub ws_xpixel: u16,
    pub ws_ypixel: u16,
}
