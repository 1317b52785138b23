//! Context-driven interception: the XRecord callback categories and the
//! sync/async run loops, independent of Xlib itself.

use crate::cancel::CancelToken;
use crate::config::ContextMode;
use crate::error::Result;
use crate::event::{EventKind, NativeEvent, WireEvent, route_wire};
use crate::hook::{Translator, dispatch};
use std::time::Duration;

/// Category of one intercepted datum (`XRecordInterceptData::category`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordCategory {
    FromServer,
    FromClient,
    ClientStarted,
    ClientDied,
    StartOfData,
    EndOfData,
    Other(i32),
}

impl RecordCategory {
    pub(crate) fn from_raw(raw: i32) -> Self {
        match raw {
            0 => RecordCategory::FromServer,
            1 => RecordCategory::FromClient,
            2 => RecordCategory::ClientStarted,
            3 => RecordCategory::ClientDied,
            4 => RecordCategory::StartOfData,
            5 => RecordCategory::EndOfData,
            other => RecordCategory::Other(other),
        }
    }
}

/// Where intercepted data ends up: the translator of the running session.
pub(crate) struct Sink<'a> {
    translator: &'a mut dyn Translator,
    token: CancelToken,
}

impl<'a> Sink<'a> {
    pub(crate) fn new(translator: &'a mut dyn Translator, token: CancelToken) -> Self {
        Self { translator, token }
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Route one datum to the matching translator callback.
    pub(crate) fn deliver(&mut self, category: RecordCategory, datum: &[u8]) {
        match category {
            RecordCategory::StartOfData => {
                log::debug!("XRecord started delivering data");
                dispatch(self.translator, EventKind::SessionEnabled, &NativeEvent::Session);
            }
            RecordCategory::EndOfData => {
                log::debug!("XRecord stopped delivering data");
                dispatch(self.translator, EventKind::SessionDisabled, &NativeEvent::Session);
            }
            RecordCategory::FromServer => self.deliver_event(datum),
            other => log::warn!("Unhandled X11 hook category: {:?}", other),
        }
    }

    fn deliver_event(&mut self, datum: &[u8]) {
        let Some(event) = WireEvent::decode(datum) else {
            log::debug!("Ignoring short XRecord datum of {} bytes", datum.len());
            return;
        };

        match route_wire(&event) {
            Some(EventKind::MappingChanged) => {
                log::debug!("Keyboard mapping changed");
                self.translator.on_mapping_changed(&NativeEvent::X11(event));
            }
            Some(kind) => dispatch(self.translator, kind, &NativeEvent::X11(event)),
            None => log::debug!("Unhandled X11 event: {:#X}", event.kind),
        }
    }
}

/// A record context that can be enabled in either delivery mode.
pub(crate) trait InterceptContext {
    /// Enable and block, delivering through `sink` until disabled remotely.
    fn enable(&mut self, sink: &mut Sink<'_>) -> Result<()>;

    /// Enable without blocking; data arrives through `process_replies`.
    fn enable_async(&mut self, sink: &mut Sink<'_>) -> Result<()>;

    /// Deliver every pending datum to `sink`.
    fn process_replies(&mut self, sink: &mut Sink<'_>);

    /// Stop delivery. Pending data is still handed out by the next
    /// `process_replies`.
    fn disable(&mut self);
}

/// Drive `context` until `token` is cancelled.
pub(crate) fn run_context<C: InterceptContext>(
    context: &mut C,
    mode: ContextMode,
    interval: Duration,
    token: &CancelToken,
    translator: &mut dyn Translator,
) -> Result<()> {
    let mut sink = Sink::new(translator, token.clone());

    match mode {
        ContextMode::Sync => {
            if !token.is_running() {
                return Ok(());
            }
            context.enable(&mut sink)
        }
        ContextMode::Async => {
            context.enable_async(&mut sink)?;
            loop {
                context.process_replies(&mut sink);
                if !token.wait_timeout(interval) {
                    break;
                }
            }
            context.disable();
            // flush the end-of-data notification
            context.process_replies(&mut sink);
            Ok(())
        }
    }
}
