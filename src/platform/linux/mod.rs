//! Linux platform implementation.
//!
//! Two strategies share one session model:
//! - **Poll-multiplexed** over `/dev/input/event*` descriptors in an epoll
//!   registry (works on X11 and Wayland)
//! - **Context-driven** through the X11 RECORD extension
//!
//! ## Feature Flags
//!
//! - `evdev` (default): open real evdev devices for the poll backend
//! - `x11`: use XRecord for interception
//!
//! ## Permissions for evdev
//!
//! The evdev backend requires access to /dev/input devices:
//! ```bash
//! sudo usermod -aG input $USER
//! # Then log out and back in
//! ```

#[cfg_attr(not(feature = "x11"), allow(dead_code))]
mod context;
mod enumerate;
mod poll;
mod registry;

#[cfg(feature = "evdev")]
mod evdev;

#[cfg(feature = "x11")]
mod x11;

pub use enumerate::{enumerate, expand_pattern};
pub(crate) use poll::PollBackend;

#[cfg(feature = "evdev")]
pub use self::evdev::{EvdevDevice, EvdevProvider};

#[cfg(feature = "x11")]
pub(crate) use context::run_context;
#[cfg(feature = "x11")]
pub(crate) use self::x11::RecordSession;

use crate::config::HookConfig;
use crate::error::Result;
use crate::source::DeviceProvider;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

/// The provider the poll backend enumerates through.
pub(crate) fn provider_for(config: &HookConfig) -> Result<Arc<dyn DeviceProvider>> {
    if let Some(provider) = &config.provider {
        return Ok(provider.clone());
    }

    #[cfg(feature = "evdev")]
    {
        Ok(Arc::new(EvdevProvider::new(config.device_pattern.clone())))
    }

    #[cfg(not(feature = "evdev"))]
    {
        Err(crate::error::Error::FeatureUnavailable("evdev"))
    }
}

/// Put a descriptor into non-blocking mode.
#[cfg_attr(not(feature = "evdev"), allow(dead_code))]
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
