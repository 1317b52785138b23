//! The single active interception context.
//!
//! A [`Session`] owns the selected backend together with every native
//! resource it acquired: sources and wait registry for the poll-multiplexed
//! backend, display connections and record context for XRecord. Only one
//! session may be open per process.

use crate::cancel::CancelToken;
use crate::config::{BackendKind, ContextMode, HookConfig};
use crate::error::{Error, Result};
use crate::hook::Translator;
use crate::platform::{self, PollBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "x11")]
use crate::platform::RecordSession;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on the process-wide session slot, released on drop.
struct ActiveGuard(());

impl ActiveGuard {
    fn acquire() -> Result<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ActiveGuard(()))
            .map_err(|_| Error::AlreadyRunning)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Backend selected once when the session opens.
pub(crate) enum Backend {
    Poll(PollBackend),
    #[cfg(feature = "x11")]
    Context(RecordSession),
}

/// Live interception context bound to a set of sources.
pub struct Session {
    backend: Option<Backend>,
    kind: BackendKind,
    token: CancelToken,
    context_mode: ContextMode,
    async_interval: Duration,
    guard: Option<ActiveGuard>,
}

impl Session {
    /// Open a session with a fresh cancellation token.
    pub fn open(config: &HookConfig) -> Result<Self> {
        Self::open_with_token(config, CancelToken::new())
    }

    /// Open a session that stops when `token` is cancelled.
    ///
    /// On failure every resource acquired so far has been released.
    pub fn open_with_token(config: &HookConfig, token: CancelToken) -> Result<Self> {
        let guard = ActiveGuard::acquire()?;

        let (kind, backend) = match Self::select(config) {
            BackendKind::X11 => Self::open_context(config, &token)?,
            _ => (BackendKind::Evdev, Self::open_poll(config, &token)?),
        };

        Ok(Self {
            backend: Some(backend),
            kind,
            token,
            context_mode: config.context_mode,
            async_interval: config.async_interval,
            guard: Some(guard),
        })
    }

    fn select(config: &HookConfig) -> BackendKind {
        match config.backend {
            BackendKind::Auto => {
                let display = std::env::var_os("DISPLAY").is_some_and(|d| !d.is_empty());
                if cfg!(feature = "x11") && config.provider.is_none() && display {
                    BackendKind::X11
                } else {
                    BackendKind::Evdev
                }
            }
            kind => kind,
        }
    }

    fn open_poll(config: &HookConfig, token: &CancelToken) -> Result<Backend> {
        let provider = platform::provider_for(config)?;
        let sources = platform::enumerate(provider.as_ref(), config.mirror)?;
        let backend = PollBackend::open(sources, config.poll_timeout, token)?;
        Ok(Backend::Poll(backend))
    }

    #[cfg(feature = "x11")]
    fn open_context(config: &HookConfig, token: &CancelToken) -> Result<(BackendKind, Backend)> {
        match RecordSession::open(config.display.as_deref(), config.context_mode, token) {
            Ok(record) => Ok((BackendKind::X11, Backend::Context(record))),
            Err(e @ (Error::DisplayOpenFailed(_) | Error::FeatureUnavailable(_)))
                if config.backend == BackendKind::Auto =>
            {
                log::warn!("XRecord unavailable ({}), falling back to evdev", e);
                Ok((BackendKind::Evdev, Self::open_poll(config, token)?))
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(not(feature = "x11"))]
    fn open_context(_config: &HookConfig, _token: &CancelToken) -> Result<(BackendKind, Backend)> {
        Err(Error::FeatureUnavailable("XRecord"))
    }

    /// Run the reactor until the token is cancelled or the session fails.
    pub fn run(&mut self, translator: &mut dyn Translator) -> Result<()> {
        match self.backend.as_mut() {
            None => Err(Error::NotRunning),
            Some(Backend::Poll(poll)) => poll.run(&self.token, translator),
            #[cfg(feature = "x11")]
            Some(Backend::Context(record)) => platform::run_context(
                record,
                self.context_mode,
                self.async_interval,
                &self.token,
                translator,
            ),
        }
    }

    /// Release every native resource. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            self.token.clear_wakers();
            match backend {
                Backend::Poll(mut poll) => poll.close(),
                #[cfg(feature = "x11")]
                Backend::Context(mut record) => record.close(),
            }
            log::debug!("Session closed");
        }
        self.guard.take();
    }

    /// Token that stops this session's reactor when cancelled.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Number of live sources (poll-multiplexed backend only).
    pub fn source_count(&self) -> usize {
        match &self.backend {
            Some(Backend::Poll(poll)) => poll.source_count(),
            _ => 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
