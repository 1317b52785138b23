//! Channel-based event receiving for non-blocking event processing.
//!
//! Translators run on the reactor thread, so slow consumers should copy each
//! record onto a queue and return. This module provides translators that do
//! exactly that, plus helpers that run a [`Hook`] on a background thread.
//!
//! # Example (Sync)
//!
//! ```no_run
//! use inputtap::Hook;
//! use inputtap::channel::listen_channel;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (handle, rx) = listen_channel(Arc::new(Hook::default()), 100);
//!
//! while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
//!     println!("{:?}", event.kind);
//! }
//!
//! handle.stop().unwrap();
//! ```
//!
//! # Example (Async with Tokio)
//!
//! ```ignore
//! use inputtap::Hook;
//! use inputtap::channel::listen_async_channel;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (handle, mut rx) = listen_async_channel(Arc::new(Hook::default()), 100);
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event.kind);
//!     }
//! }
//! ```

use crate::error::{Error, Result};
use crate::event::{EventKind, NativeEvent, RawEvent};
use crate::hook::{Hook, Translator};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const STOP_RETRY: Duration = Duration::from_millis(5);

/// Translator that copies every record into a bounded channel.
///
/// When the channel is full the record is dropped rather than blocking the
/// reactor.
pub struct ChannelTranslator {
    sender: SyncSender<RawEvent>,
}

impl Translator for ChannelTranslator {
    fn on_event(&mut self, kind: EventKind, event: &NativeEvent) {
        if let Err(TrySendError::Full(dropped)) = self.sender.try_send(RawEvent::new(kind, *event)) {
            log::trace!("Channel full, dropping {:?}", dropped.kind);
        }
    }
}

/// Translator that copies every record into an unbounded channel.
pub struct UnboundedChannelTranslator {
    sender: Sender<RawEvent>,
}

impl Translator for UnboundedChannelTranslator {
    fn on_event(&mut self, kind: EventKind, event: &NativeEvent) {
        let _ = self.sender.send(RawEvent::new(kind, *event));
    }
}

/// Create a bounded translator/receiver pair.
pub fn channel(capacity: usize) -> (ChannelTranslator, Receiver<RawEvent>) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (ChannelTranslator { sender }, receiver)
}

/// Create an unbounded translator/receiver pair.
///
/// Use this if no record may be dropped, but watch memory usage if the
/// consumer is slow.
pub fn unbounded_channel() -> (UnboundedChannelTranslator, Receiver<RawEvent>) {
    let (sender, receiver) = mpsc::channel();
    (UnboundedChannelTranslator { sender }, receiver)
}

/// Handle to a hook running on a background thread.
///
/// The hook is stopped and the thread joined when this handle is dropped.
pub struct ChannelHookHandle {
    hook: Arc<Hook>,
    thread_handle: Option<JoinHandle<Result<()>>>,
}

impl ChannelHookHandle {
    fn spawn<T>(hook: Arc<Hook>, translator: T) -> Self
    where
        T: Translator + Send + 'static,
    {
        let runner = hook.clone();
        let thread_handle = thread::spawn(move || runner.start(translator));
        Self {
            hook,
            thread_handle: Some(thread_handle),
        }
    }

    pub fn hook(&self) -> &Arc<Hook> {
        &self.hook
    }

    /// Check if the hook is still running.
    pub fn is_running(&self) -> bool {
        self.hook.is_running()
    }

    /// Stop the hook and wait for the background thread to finish.
    ///
    /// Returns the error the hook failed with, if any.
    pub fn stop(mut self) -> Result<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<()> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };

        // the thread may not have reached Hook::start yet
        while !handle.is_finished() {
            match self.hook.stop() {
                Ok(()) => break,
                Err(Error::NotRunning) => thread::sleep(STOP_RETRY),
                Err(e) => return Err(e),
            }
        }

        handle
            .join()
            .map_err(|_| Error::Unknown("hook thread panicked".into()))?
    }
}

impl Drop for ChannelHookHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_inner() {
            log::debug!("Background hook ended with: {}", e);
        }
    }
}

/// Start `hook` on a background thread, relaying into a bounded channel.
///
/// # Arguments
///
/// * `capacity` - Maximum number of records to buffer. If the buffer is full,
///   new records are dropped to prevent blocking input.
pub fn listen_channel(hook: Arc<Hook>, capacity: usize) -> (ChannelHookHandle, Receiver<RawEvent>) {
    let (translator, receiver) = channel(capacity);
    (ChannelHookHandle::spawn(hook, translator), receiver)
}

/// Start `hook` on a background thread, relaying into an unbounded channel.
pub fn listen_unbounded_channel(hook: Arc<Hook>) -> (ChannelHookHandle, Receiver<RawEvent>) {
    let (translator, receiver) = unbounded_channel();
    (ChannelHookHandle::spawn(hook, translator), receiver)
}

// ============================================================================
// Tokio async support (behind feature flag)
// ============================================================================

#[cfg(feature = "tokio")]
pub use tokio_channel::*;

#[cfg(feature = "tokio")]
mod tokio_channel {
    use super::*;
    use tokio::sync::mpsc as tokio_mpsc;

    /// Translator that sends records to a tokio async channel.
    pub struct TokioChannelTranslator {
        sender: tokio_mpsc::Sender<RawEvent>,
    }

    impl Translator for TokioChannelTranslator {
        fn on_event(&mut self, kind: EventKind, event: &NativeEvent) {
            // try_send so the reactor thread never blocks
            let _ = self.sender.try_send(RawEvent::new(kind, *event));
        }
    }

    /// Create a translator/receiver pair over a bounded tokio channel.
    pub fn async_channel(capacity: usize) -> (TokioChannelTranslator, tokio_mpsc::Receiver<RawEvent>) {
        let (sender, receiver) = tokio_mpsc::channel(capacity);
        (TokioChannelTranslator { sender }, receiver)
    }

    /// Start `hook` on a background thread, relaying into a tokio channel.
    pub fn listen_async_channel(
        hook: Arc<Hook>,
        capacity: usize,
    ) -> (ChannelHookHandle, tokio_mpsc::Receiver<RawEvent>) {
        let (translator, receiver) = async_channel(capacity);
        (ChannelHookHandle::spawn(hook, translator), receiver)
    }
}
