//! epoll wait registry with an eventfd wake source.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

/// Token reserved for the wake source.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// `epoll_wait` timeout in whole milliseconds, rounded up so a short non-zero
/// timeout never turns into a busy poll.
fn timeout_millis(timeout: Duration) -> libc::c_int {
    timeout
        .as_nanos()
        .div_ceil(1_000_000)
        .min(libc::c_int::MAX as u128) as libc::c_int
}

/// eventfd that forces a blocked `epoll_wait` to return.
pub(crate) struct Waker {
    fd: OwnedFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        let fd = cvt(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Make the registry readable. Callable from any thread.
    pub(crate) fn wake(&self) {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN means the counter is already non-zero, which is just as good
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                log::warn!("Failed to signal wake descriptor: {}", err);
            }
        }
    }

    /// Reset the counter so the next wait blocks again.
    pub(crate) fn drain(&self) {
        let mut count: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&mut count as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}

/// Readiness registry over source descriptors plus the wake source.
pub(crate) struct WaitRegistry {
    epoll: OwnedFd,
    waker: Arc<Waker>,
}

impl WaitRegistry {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        let waker = Arc::new(Waker::new()?);

        let registry = Self { epoll, waker };
        registry.add(registry.waker.fd.as_raw_fd(), WAKE_TOKEN)?;
        Ok(registry)
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        cvt(unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) })?;
        Ok(())
    }

    pub(crate) fn remove(&self, fd: RawFd) -> io::Result<()> {
        cvt(unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        })?;
        Ok(())
    }

    /// Wait up to `timeout` for readiness. Returns the number of filled slots.
    pub(crate) fn wait(&self, ready: &mut [libc::epoll_event], timeout: Duration) -> io::Result<usize> {
        let timeout_ms = timeout_millis(timeout);
        let count = cvt(unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                ready.as_mut_ptr(),
                ready.len().min(libc::c_int::MAX as usize) as libc::c_int,
                timeout_ms,
            )
        })?;
        Ok(count as usize)
    }
}
