//! Input sources: the device abstraction the enumerator opens and the poll
//! reactor drains.

use crate::event::{InputRecord, SourceId, ev};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What a source can produce, from the feature bits it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Capability {
    Keyboard,
    Pointer,
    Unsupported,
}

impl Capability {
    /// Classify from reported features.
    ///
    /// A keyboard repeats and has Escape; a pointer moves relatively and has a
    /// left button. Keyboard wins when a device reports both.
    pub fn classify(has_repeat: bool, has_esc: bool, has_rel: bool, has_left: bool) -> Self {
        if has_repeat && has_esc {
            Capability::Keyboard
        } else if has_rel && has_left {
            Capability::Pointer
        } else {
            Capability::Unsupported
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Keyboard => "keyboard",
            Capability::Pointer => "pointing",
            Capability::Unsupported => "unsupported",
        })
    }
}

/// An open native input device.
///
/// Dropping the value must release every native resource it holds.
pub trait InputDevice: Send {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Descriptor to register with the wait registry. Must stay valid until drop.
    fn raw_fd(&self) -> RawFd;

    /// Classification from the device's reported features.
    fn capability(&self) -> Capability;

    /// Read the next queued record. `Ok(None)` means the queue is empty.
    fn read_record(&mut self) -> io::Result<Option<InputRecord>>;

    /// Kernel snapshot of currently held key codes, used to merge state after
    /// a queue overflow. Devices that cannot report it return `None`.
    fn key_state(&self) -> Option<BTreeSet<u16>> {
        None
    }

    /// Open the secondary handle used to re-emit relayed records.
    ///
    /// Devices without re-injection support return `Ok(None)`.
    fn open_mirror(&mut self) -> io::Result<Option<Box<dyn Mirror>>> {
        Ok(None)
    }
}

/// Secondary handle through which relayed records are re-emitted.
pub trait Mirror: Send {
    /// Re-emit one record. Frame markers flush buffered records.
    fn emit(&mut self, record: &InputRecord) -> io::Result<()>;
}

/// Supplies candidate sources and opens them.
///
/// The default provider expands the device pattern and opens evdev nodes.
pub trait DeviceProvider: Send + Sync {
    /// List candidate paths. Errors here abort enumeration.
    fn candidates(&self) -> crate::Result<Vec<PathBuf>>;

    /// Open one candidate.
    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>>;

    /// Label for diagnostics, e.g. the pattern being expanded.
    fn describe(&self) -> String {
        String::from("device provider")
    }
}

/// One open, classified source owned by the engine.
pub struct SourceHandle {
    id: SourceId,
    path: PathBuf,
    capability: Capability,
    // released before the device it mirrors
    mirror: Option<Box<dyn Mirror>>,
    device: Box<dyn InputDevice>,
    syncing: bool,
    held: BTreeSet<u16>,
}

impl SourceHandle {
    pub fn new(
        id: SourceId,
        path: PathBuf,
        capability: Capability,
        device: Box<dyn InputDevice>,
    ) -> Self {
        Self {
            id,
            path,
            capability,
            mirror: None,
            device,
            syncing: false,
            held: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn raw_fd(&self) -> RawFd {
        self.device.raw_fd()
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    pub(crate) fn set_mirror(&mut self, mirror: Box<dyn Mirror>) {
        self.mirror = Some(mirror);
    }

    pub(crate) fn device_mut(&mut self) -> &mut dyn InputDevice {
        self.device.as_mut()
    }

    pub(crate) fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
        self.device.read_record()
    }

    pub(crate) fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub(crate) fn set_syncing(&mut self, syncing: bool) {
        self.syncing = syncing;
    }

    /// Track a key record that is about to be forwarded.
    pub(crate) fn note_forwarded(&mut self, record: &InputRecord) {
        if record.kind != ev::EV_KEY {
            return;
        }
        if record.value == 0 {
            self.held.remove(&record.code);
        } else {
            self.held.insert(record.code);
        }
    }

    /// Records that bring the forwarded key state in line with the kernel.
    ///
    /// Keys we forwarded as held that are now up get a release, keys down in
    /// the kernel that we never forwarded get a press.
    pub(crate) fn reconcile(&self) -> Vec<InputRecord> {
        let Some(actual) = self.device.key_state() else {
            return Vec::new();
        };

        let released = self
            .held
            .difference(&actual)
            .map(|&code| InputRecord::new(ev::EV_KEY, code, 0));
        let pressed = actual
            .difference(&self.held)
            .map(|&code| InputRecord::new(ev::EV_KEY, code, 1));
        released.chain(pressed).collect()
    }

    /// Re-emit through the mirror, dropping the mirror on failure.
    pub(crate) fn mirror_record(&mut self, record: &InputRecord) {
        if let Some(mirror) = self.mirror.as_mut()
            && let Err(e) = mirror.emit(record)
        {
            log::warn!("Mirror for {} failed, disabling it: {}", self.path.display(), e);
            self.mirror = None;
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("name", &self.device.name())
            .field("capability", &self.capability)
            .field("fd", &self.device.raw_fd())
            .field("mirror", &self.mirror.is_some())
            .finish()
    }
}
