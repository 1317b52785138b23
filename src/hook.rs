//! Hook lifecycle and the Translator trait.

use crate::cancel::CancelToken;
use crate::config::HookConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, NativeEvent};
use crate::session::Session;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Receives every relayed record, already routed to the matching callback.
///
/// Every method has a default that funnels into [`Translator::on_event`], so
/// an implementation can either override the callbacks it cares about or
/// handle everything in one place.
///
/// Callbacks run on the thread that called [`Hook::start`]. Long work there
/// delays the native interception channel; copy the record onto your own
/// queue instead (see [`crate::channel`]).
pub trait Translator {
    /// Catch-all for callbacks that are not overridden.
    fn on_event(&mut self, _kind: EventKind, _event: &NativeEvent) {}

    fn on_session_enabled(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::SessionEnabled, event);
    }

    fn on_session_disabled(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::SessionDisabled, event);
    }

    fn on_key_down(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::KeyDown, event);
    }

    fn on_key_up(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::KeyUp, event);
    }

    fn on_button_down(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::ButtonDown, event);
    }

    fn on_button_up(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::ButtonUp, event);
    }

    fn on_motion(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::Motion, event);
    }

    fn on_wheel(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::Wheel, event);
    }

    /// The X server reported a keyboard or modifier mapping change.
    ///
    /// Translators that cache keyboard mapping state must re-derive it here.
    fn on_mapping_changed(&mut self, event: &NativeEvent) {
        self.on_event(EventKind::MappingChanged, event);
    }
}

/// Implement Translator for closures.
impl<F> Translator for F
where
    F: FnMut(EventKind, &NativeEvent),
{
    fn on_event(&mut self, kind: EventKind, event: &NativeEvent) {
        self(kind, event);
    }
}

/// Call exactly one translator callback for `kind`.
pub(crate) fn dispatch(translator: &mut dyn Translator, kind: EventKind, event: &NativeEvent) {
    match kind {
        EventKind::SessionEnabled => translator.on_session_enabled(event),
        EventKind::SessionDisabled => translator.on_session_disabled(event),
        EventKind::KeyDown => translator.on_key_down(event),
        EventKind::KeyUp => translator.on_key_up(event),
        EventKind::ButtonDown => translator.on_button_down(event),
        EventKind::ButtonUp => translator.on_button_up(event),
        EventKind::Motion => translator.on_motion(event),
        EventKind::Wheel => translator.on_wheel(event),
        EventKind::MappingChanged => translator.on_mapping_changed(event),
    }
}

/// Lifecycle state of a [`Hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Idle,
    Starting,
    Running,
    Stopping,
}

struct Control {
    state: HookState,
    token: Option<CancelToken>,
}

/// Puts a [`Hook`] back to `Idle` when [`Hook::start`] exits, even if a
/// translator panics.
struct ResetOnExit<'a> {
    hook: &'a Hook,
}

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        self.hook.reset();
    }
}

/// Input hook that relays keyboard and mouse records to a [`Translator`].
///
/// Share it behind an `Arc` to call [`Hook::stop`] from another thread while
/// [`Hook::start`] blocks.
pub struct Hook {
    config: HookConfig,
    control: Mutex<Control>,
}

impl Default for Hook {
    fn default() -> Self {
        Self::new(HookConfig::default())
    }
}

impl Hook {
    /// Create a new Hook instance.
    pub fn new(config: HookConfig) -> Self {
        Self {
            config,
            control: Mutex::new(Control {
                state: HookState::Idle,
                token: None,
            }),
        }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session and relay records until stopped (blocking).
    ///
    /// Runs the event phase on the calling thread. Returns once the session
    /// has been torn down, with every native resource released.
    pub fn start<T: Translator>(&self, mut translator: T) -> Result<()> {
        let token = {
            let mut control = self.control();
            if control.state != HookState::Idle {
                return Err(Error::AlreadyRunning);
            }
            let token = CancelToken::new();
            control.state = HookState::Starting;
            control.token = Some(token.clone());
            token
        };

        // declared before the session so it drops last, unwinding included
        let _idle = ResetOnExit { hook: self };

        let mut session = match Session::open_with_token(&self.config, token) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Failed to start hook: {}", e);
                return Err(e);
            }
        };

        {
            let mut control = self.control();
            if control.state == HookState::Starting {
                control.state = HookState::Running;
            }
        }
        log::info!(
            "Hook running with {:?} backend ({} sources)",
            session.backend_kind(),
            session.source_count()
        );

        let result = session.run(&mut translator);

        self.control().state = HookState::Stopping;
        session.close();

        log::debug!("Hook stopped: {:?}", result.as_ref().map_err(Error::status));
        result
    }

    fn reset(&self) {
        let mut control = self.control();
        control.state = HookState::Idle;
        control.token = None;
    }

    /// Ask a running hook to stop. Safe to call from any thread.
    ///
    /// Does not wait for [`Hook::start`] to return.
    pub fn stop(&self) -> Result<()> {
        let token = {
            let mut control = self.control();
            match control.state {
                HookState::Idle => return Err(Error::NotRunning),
                HookState::Stopping => return Ok(()),
                HookState::Starting | HookState::Running => {
                    control.state = HookState::Stopping;
                    control.token.clone()
                }
            }
        };

        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    pub fn state(&self) -> HookState {
        self.control().state
    }

    /// Check if the hook is currently running.
    pub fn is_running(&self) -> bool {
        self.state() == HookState::Running
    }
}

/// Convenience function to start relaying with the default configuration.
///
/// Blocks until the hook is stopped externally or an error occurs.
///
/// # Example
///
/// ```no_run
/// use inputtap::{listen, EventKind, NativeEvent};
///
/// listen(|kind: EventKind, event: &NativeEvent| {
///     if kind == EventKind::KeyDown {
///         println!("{:?}", event);
///     }
/// })
/// .expect("Failed to start hook");
/// ```
pub fn listen<T: Translator>(translator: T) -> Result<()> {
    Hook::default().start(translator)
}
