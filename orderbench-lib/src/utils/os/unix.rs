use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft limit of open file descriptors up to `target`,
/// capped by the hard limit. Every virtual user holds at least one socket.
pub fn raise_nofile(target: rlim_t) -> std::io::Result<()> {
    use std::{io, mem};

    // SAFETY: `lim` is a plain C struct which we fully initialise
    // through `getrlimit` before reading it.
    unsafe {
        let mut lim: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            return Err(io::Error::last_os_error());
        }

        let new_soft = target.min(lim.rlim_max);
        if lim.rlim_cur >= new_soft {
            tracing::debug!(
                current = lim.rlim_cur,
                requested = new_soft,
                "ulimit: current soft limit is sufficient",
            );
            return Ok(());
        }

        let previous_value = lim.rlim_cur;
        lim.rlim_cur = new_soft;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::info!(previous_value, new_soft, "ulimit: applied new soft limit");
    }

    Ok(())
}
