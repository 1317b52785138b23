//! # inputtap
//!
//! A userland keyboard and mouse interception engine for Linux.
//!
//! inputtap opens the system's input sources, multiplexes them onto one
//! blocking reactor and relays every native record to a [`Translator`]. It
//! does not interpret the records: mapping native codes to keys, buttons and
//! positions is the translator's job.
//!
//! ## Features
//!
//! - Poll-multiplexed backend over `/dev/input/event*` (X11 and Wayland)
//! - Context-driven backend over the X11 RECORD extension (feature `x11`)
//! - Kernel queue overflow recovery with held-key reconciliation
//! - Start/stop lifecycle safe to drive from another thread
//! - Channel adapters for consumers that queue work
//!
//! ## Quick Start
//!
//! ```no_run
//! use inputtap::{EventKind, Hook, NativeEvent};
//! use std::sync::Arc;
//!
//! let hook = Arc::new(Hook::default());
//!
//! let stopper = hook.clone();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     let _ = stopper.stop();
//! });
//!
//! hook.start(|kind: EventKind, event: &NativeEvent| {
//!     if let NativeEvent::Evdev { source, record } = event {
//!         println!("{source}: {kind:?} code={} value={}", record.code, record.value);
//!     }
//! })
//! .expect("Failed to start hook");
//! ```
//!
//! ## Architecture
//!
//! A [`Hook`] owns the lifecycle. Each [`Hook::start`] opens one [`Session`],
//! which enumerates and classifies sources, registers them in an epoll
//! registry (or creates an XRecord context), and runs the reactor on the
//! calling thread until [`Hook::stop`] cancels its [`CancelToken`]. Only one
//! session can be open per process.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod hook;
pub mod session;
pub mod source;

mod platform;

// Re-exports
pub use cancel::CancelToken;
pub use config::{BackendKind, ContextMode, DEFAULT_DEVICE_PATTERN, DevicePattern, HookConfig};
pub use error::{Error, Result, Status};
pub use event::{
    EventKind, InputRecord, NativeEvent, RawEvent, SourceId, WireEvent, route_input, route_wire,
};
pub use hook::{Hook, HookState, Translator, listen};
pub use session::Session;
pub use source::{Capability, DeviceProvider, InputDevice, Mirror, SourceHandle};

pub use platform::{enumerate, expand_pattern};

#[cfg(all(target_os = "linux", feature = "evdev"))]
pub use platform::{EvdevDevice, EvdevProvider};
