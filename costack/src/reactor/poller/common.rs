use std::os::fd::RawFd;

/// Handle that interrupts a blocked poll.
///
/// Wraps the write side of the poller's wake channel (an `eventfd` on
/// Linux, a pipe elsewhere). It may be used from any thread; this is how a
/// [`StopHandle`](crate::StopHandle) kills a pending wait.
pub(crate) struct Waker(pub(crate) RawFd);

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Returns the last OS error unless `rc` signals success.
pub(crate) fn check(rc: libc::c_int) -> std::io::Result<libc::c_int> {
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}
