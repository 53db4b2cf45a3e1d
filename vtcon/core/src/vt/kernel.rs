//! Linux kernel VT device.
//!
//! Binds the switch protocol to a real virtual terminal: allocate (or reuse)
//! a VT, put it into process switch mode so the kernel asks before switching
//! (SIGUSR1 to release, SIGUSR2 to acquire), flip it to graphics mode while
//! the session owns it, and undo all of that on restore. The VT ioctl
//! constants and structs come from `linux/vt.h` / `linux/kd.h`; libc does not
//! export them.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use super::{VtDevice, VtError};

const VT_OPENQRY: libc::c_ulong = 0x5600;
const VT_SETMODE: libc::c_ulong = 0x5602;
const VT_GETSTATE: libc::c_ulong = 0x5603;
const VT_RELDISP: libc::c_ulong = 0x5605;
const VT_ACTIVATE: libc::c_ulong = 0x5606;
const VT_WAITACTIVE: libc::c_ulong = 0x5607;

const VT_AUTO: libc::c_char = 0x00;
const VT_PROCESS: libc::c_char = 0x01;
const VT_ACKACQ: libc::c_ulong = 0x02;

const KDSETMODE: libc::c_ulong = 0x4B3A;
const KD_TEXT: libc::c_ulong = 0x00;
const KD_GRAPHICS: libc::c_ulong = 0x01;

#[repr(C)]
struct VtMode {
    mode: libc::c_char,
    waitv: libc::c_char,
    relsig: libc::c_short,
    acqsig: libc::c_short,
    frsig: libc::c_short,
}

#[repr(C)]
#[derive(Default)]
struct VtStat {
    v_active: libc::c_ushort,
    v_signal: libc::c_ushort,
    v_state: libc::c_ushort,
}

fn ioctl_arg(file: &File, name: &'static str, req: libc::c_ulong, arg: libc::c_ulong) -> Result<(), VtError> {
    // Safety: plain integer-argument VT ioctl on an open tty fd.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), req as _, arg) };
    if rc == -1 {
        Err(VtError::Ioctl {
            name,
            err: Errno::last(),
        })
    } else {
        Ok(())
    }
}

fn ioctl_ptr<T>(file: &File, name: &'static str, req: libc::c_ulong, arg: *mut T) -> Result<(), VtError> {
    // Safety: arg points at a live, correctly-typed kernel struct.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), req as _, arg) };
    if rc == -1 {
        Err(VtError::Ioctl {
            name,
            err: Errno::last(),
        })
    } else {
        Ok(())
    }
}

fn open_tty(path: &str) -> Result<File, VtError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(path)
        .map_err(VtError::Open)
}

/// A real Linux VT in process switch mode.
pub struct KernelVt {
    file: File,
    num: u16,
    previous: u16,
    restored: bool,
}

impl KernelVt {
    /// Open a VT and take ownership of its switching.
    ///
    /// With `requested` unset, asks the kernel for a free VT (`VT_OPENQRY`).
    /// Saves the currently-active VT so restore can switch back to it, then
    /// enters process switch mode and graphics mode.
    pub fn open(requested: Option<u16>) -> Result<Self, VtError> {
        let control = open_tty("/dev/tty0")?;

        let num = match requested {
            Some(num) => num,
            None => {
                let mut free: libc::c_int = -1;
                ioctl_ptr(&control, "VT_OPENQRY", VT_OPENQRY, &mut free)?;
                u16::try_from(free).map_err(|_| VtError::NoFreeVt)?
            }
        };

        let mut state = VtStat::default();
        ioctl_ptr(&control, "VT_GETSTATE", VT_GETSTATE, &mut state)?;
        let previous = state.v_active;
        drop(control);

        let file = open_tty(&format!("/dev/tty{num}"))?;

        let mode = VtMode {
            mode: VT_PROCESS,
            waitv: 0,
            relsig: Signal::SIGUSR1 as libc::c_short,
            acqsig: Signal::SIGUSR2 as libc::c_short,
            frsig: 0,
        };
        ioctl_ptr(&file, "VT_SETMODE", VT_SETMODE, &mode as *const _ as *mut VtMode)?;
        ioctl_arg(&file, "KDSETMODE", KDSETMODE, KD_GRAPHICS)?;

        info!(vt = num, previous = previous, "kernel VT opened");
        Ok(Self {
            file,
            num,
            previous,
            restored: false,
        })
    }

    /// The VT number this session owns.
    #[must_use]
    pub fn number(&self) -> u16 {
        self.num
    }
}

impl VtDevice for KernelVt {
    fn release_signal(&self) -> Signal {
        Signal::SIGUSR1
    }

    fn acquire_signal(&self) -> Signal {
        Signal::SIGUSR2
    }

    fn is_active(&self) -> Result<bool, VtError> {
        let mut state = VtStat::default();
        ioctl_ptr(&self.file, "VT_GETSTATE", VT_GETSTATE, &mut state)?;
        Ok(state.v_active == self.num)
    }

    fn activate(&mut self) -> Result<(), VtError> {
        ioctl_arg(&self.file, "VT_ACTIVATE", VT_ACTIVATE, libc::c_ulong::from(self.num))?;
        ioctl_arg(&self.file, "VT_WAITACTIVE", VT_WAITACTIVE, libc::c_ulong::from(self.num))
    }

    fn acknowledge_release(&mut self) -> Result<(), VtError> {
        debug!(vt = self.num, "releasing VT");
        ioctl_arg(&self.file, "VT_RELDISP", VT_RELDISP, 1)
    }

    fn acknowledge_acquire(&mut self) -> Result<(), VtError> {
        debug!(vt = self.num, "acquiring VT");
        ioctl_arg(&self.file, "VT_RELDISP", VT_RELDISP, VT_ACKACQ)
    }

    fn restore(&mut self) -> Result<(), VtError> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        ioctl_arg(&self.file, "KDSETMODE", KDSETMODE, KD_TEXT)?;
        let mode = VtMode {
            mode: VT_AUTO,
            waitv: 0,
            relsig: 0,
            acqsig: 0,
            frsig: 0,
        };
        ioctl_ptr(&self.file, "VT_SETMODE", VT_SETMODE, &mode as *const _ as *mut VtMode)?;
        // Hand the seat back to wherever the user came from. Not waiting
        // here: restore runs during teardown and must not hang.
        ioctl_arg(&self.file, "VT_ACTIVATE", VT_ACTIVATE, libc::c_ulong::from(self.previous))?;
        info!(vt = self.num, previous = self.previous, "kernel VT restored");
        Ok(())
    }
}

impl Drop for KernelVt {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!(error = %err, "cannot restore VT on drop");
        }
    }
}
