//! Hook configuration.

use crate::source::DeviceProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default device namespace pattern for the evdev backend.
pub const DEFAULT_DEVICE_PATTERN: &str = "/dev/input/event*";

/// Which native interception facility to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BackendKind {
    /// Probe at session open: XRecord when a display is available, evdev otherwise.
    #[default]
    Auto,
    /// Poll-multiplexed `/dev/input` devices.
    Evdev,
    /// Context-driven XRecord interception.
    X11,
}

/// How the context-driven strategy waits for records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContextMode {
    /// The enable call blocks until the context is disabled from another connection.
    #[default]
    Sync,
    /// The enable call returns at once; the engine pumps replies on a timed wait.
    Async,
}

/// A `dir/prefix*` pattern over a device namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DevicePattern {
    pub dir: PathBuf,
    pub prefix: String,
}

impl DevicePattern {
    /// Parse a pattern such as `/dev/input/event*`.
    ///
    /// Only a trailing `*` is understood; anything else is matched literally.
    pub fn parse(pattern: &str) -> Self {
        let path = Path::new(pattern);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            dir,
            prefix: file.trim_end_matches('*').to_string(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix)
    }
}

impl Default for DevicePattern {
    fn default() -> Self {
        Self::parse(DEFAULT_DEVICE_PATTERN)
    }
}

impl fmt::Display for DevicePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}*", self.dir.display(), self.prefix)
    }
}

/// Configuration for a [`Hook`](crate::Hook).
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HookConfig {
    pub backend: BackendKind,
    pub device_pattern: DevicePattern,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub provider: Option<Arc<dyn DeviceProvider>>,
    pub poll_timeout: Duration,
    pub context_mode: ContextMode,
    pub async_interval: Duration,
    pub display: Option<String>,
    pub mirror: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            device_pattern: DevicePattern::default(),
            provider: None,
            poll_timeout: Duration::from_millis(100),
            context_mode: ContextMode::Sync,
            async_interval: Duration::from_millis(50),
            display: None,
            mirror: false,
        }
    }
}

impl HookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn device_pattern(mut self, pattern: &str) -> Self {
        self.device_pattern = DevicePattern::parse(pattern);
        self
    }

    /// Replace the evdev opener. Implies the poll-multiplexed backend under `Auto`.
    pub fn provider<P: DeviceProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode;
        self
    }

    pub fn async_interval(mut self, interval: Duration) -> Self {
        self.async_interval = interval;
        self
    }

    pub fn display(mut self, name: impl Into<String>) -> Self {
        self.display = Some(name.into());
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }
}

impl fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookConfig")
            .field("backend", &self.backend)
            .field("device_pattern", &self.device_pattern)
            .field("provider", &self.provider.is_some())
            .field("poll_timeout", &self.poll_timeout)
            .field("context_mode", &self.context_mode)
            .field("async_interval", &self.async_interval)
            .field("display", &self.display)
            .field("mirror", &self.mirror)
            .finish()
    }
}
