//! Platform TUN device handling.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::error::{Error, Result};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL).
pub const MAX_NAME_LEN: usize = 15;

/// An open TUN interface.
#[derive(Debug)]
pub struct TunDevice {
    /// Actual device name (may differ from requested).
    name: String,
    fd: OwnedFd,
}

impl TunDevice {
    /// Wrap an already-open TUN descriptor.
    pub fn from_fd(name: impl Into<String>, fd: OwnedFd) -> Self {
        Self {
            name: name.into(),
            fd,
        }
    }

    /// Get the actual device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up the device, keeping only its descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for TunDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Tun(format!(
            "interface name {name:?} is longer than {MAX_NAME_LEN} bytes"
        )));
    }
    if name.as_bytes().contains(&0) {
        return Err(Error::Tun("interface name contains a NUL byte".into()));
    }
    Ok(())
}

/// Open a TUN interface without packet information headers.
///
/// An empty `name` lets the kernel pick one; [`TunDevice::name`] reports the
/// result.
///
/// # Privileges
///
/// Requires `CAP_NET_ADMIN` or root.
#[cfg(target_os = "linux")]
pub fn open(name: &str) -> Result<TunDevice> {
    use std::fs::OpenOptions;
    use std::io;
    use std::os::unix::fs::OpenOptionsExt;

    check_name(name)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open("/dev/net/tun")
        .map_err(|e| Error::Tun(format!("failed to open /dev/net/tun: {e}")))?;

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };

    // Length checked above, so the terminator survives.
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

    const TUNSETIFF: libc::c_ulong = 0x400454ca;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut ifr) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        return Err(Error::Tun(format!("TUNSETIFF {name:?} failed: {err}")));
    }

    let actual = unsafe {
        std::ffi::CStr::from_ptr(ifr.ifr_name.as_ptr())
            .to_string_lossy()
            .into_owned()
    };

    tracing::info!(requested = %name, actual = %actual, "Opened TUN device");

    Ok(TunDevice {
        name: actual,
        fd: OwnedFd::from(file),
    })
}
