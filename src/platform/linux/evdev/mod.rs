//! evdev sources for the poll backend.
//!
//! Reads raw `input_event` records from `/dev/input/event*` nodes. Works on
//! both X11 and Wayland.
//!
//! ## Permissions
//!
//! To access input devices, the process must either:
//! - Run as root (not recommended)
//! - Run as a user in the `input` group (recommended)
//!
//! Mirroring additionally needs write access to `/dev/uinput`.

mod device;

pub use device::{EvdevDevice, EvdevProvider};
