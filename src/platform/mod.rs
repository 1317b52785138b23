//! Platform-specific implementations.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

// Both interception facilities are Linux userland interfaces
#[cfg(not(target_os = "linux"))]
compile_error!("inputtap only supports Linux (evdev and X11/XRecord)");
