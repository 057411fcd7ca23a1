//! Process-wide resource tuning.
//!
//! Every subscriber holds one socket, so the open-file soft limit caps the
//! number of concurrent connections. The server raises it to the hard limit
//! once at startup.

use std::io;

/// Raise the `RLIMIT_NOFILE` soft limit to the hard limit and return the new
/// soft limit.
#[cfg(unix)]
pub fn raise_fd_limit() -> io::Result<u64> {
    let mut rlim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: `rlim` is a valid, exclusively borrowed rlimit struct.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return Err(io::Error::last_os_error());
    }

    if rlim.rlim_cur < rlim.rlim_max {
        rlim.rlim_cur = rlim.rlim_max;
        // SAFETY: same struct, read-only for the kernel.
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(rlim.rlim_cur as u64)
}

#[cfg(not(unix))]
pub fn raise_fd_limit() -> io::Result<u64> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "fd limit tuning is unix-only"))
}
