//! evdev device and provider.

use crate::config::DevicePattern;
use crate::event::{InputRecord, ev};
use crate::platform::linux::{expand_pattern, set_nonblocking};
use crate::source::{Capability, DeviceProvider, InputDevice, Mirror};
use evdev::raw_stream::RawDevice;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// One opened `/dev/input/event*` node, read without kernel-side syncing so
/// queue overflows reach the reactor.
pub struct EvdevDevice {
    device: RawDevice,
    name: String,
    capability: Capability,
    pending: VecDeque<InputRecord>,
}

impl EvdevDevice {
    /// Open a node in non-blocking mode and classify it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = RawDevice::open(path)?;
        set_nonblocking(device.as_raw_fd())?;

        let events = device.supported_events();
        let keys = device.supported_keys();
        let capability = Capability::classify(
            events.contains(EventType::REPEAT),
            keys.is_some_and(|k| k.contains(Key::KEY_ESC)),
            events.contains(EventType::RELATIVE),
            keys.is_some_and(|k| k.contains(Key::BTN_LEFT)),
        );

        let name = device.name().unwrap_or("unknown").to_string();
        Ok(Self {
            device,
            name,
            capability,
            pending: VecDeque::new(),
        })
    }

    fn refill(&mut self) -> io::Result<()> {
        let events = self.device.fetch_events()?;
        self.pending.extend(events.map(|event| InputRecord {
            kind: event.event_type().0,
            code: event.code(),
            value: event.value(),
            time: event.timestamp(),
        }));
        Ok(())
    }
}

impl InputDevice for EvdevDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
        if self.pending.is_empty() {
            match self.refill() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(self.pending.pop_front())
    }

    fn key_state(&self) -> Option<BTreeSet<u16>> {
        match self.device.get_key_state() {
            Ok(keys) => Some(keys.iter().map(|key| key.code()).collect()),
            Err(e) => {
                log::warn!("Failed to read key state of {}: {}", self.name, e);
                None
            }
        }
    }

    fn open_mirror(&mut self) -> io::Result<Option<Box<dyn Mirror>>> {
        let mirror_name = format!("{} (mirror)", self.name);
        let mut builder = VirtualDeviceBuilder::new()?.name(&mirror_name);
        if let Some(keys) = self.device.supported_keys() {
            builder = builder.with_keys(keys)?;
        }
        if let Some(axes) = self.device.supported_relative_axes() {
            builder = builder.with_relative_axes(axes)?;
        } else if self.capability == Capability::Pointer {
            let mut axes = AttributeSet::<RelativeAxisType>::new();
            axes.insert(RelativeAxisType::REL_X);
            axes.insert(RelativeAxisType::REL_Y);
            builder = builder.with_relative_axes(&axes)?;
        }
        let virtual_device = builder.build()?;

        // records now only reach other readers through the mirror
        self.device.grab()?;

        Ok(Some(Box::new(UinputMirror {
            device: virtual_device,
            frame: Vec::new(),
        })))
    }
}

/// Re-emits relayed records through a uinput device, one frame at a time.
struct UinputMirror {
    device: VirtualDevice,
    frame: Vec<InputEvent>,
}

impl Mirror for UinputMirror {
    fn emit(&mut self, record: &InputRecord) -> io::Result<()> {
        if record.kind == ev::EV_SYN {
            if record.code == ev::SYN_REPORT && !self.frame.is_empty() {
                // emit terminates the batch with its own SYN_REPORT
                let result = self.device.emit(&self.frame);
                self.frame.clear();
                result?;
            }
            return Ok(());
        }

        self.frame
            .push(InputEvent::new(EventType(record.kind), record.code, record.value));
        Ok(())
    }
}

/// Default provider: expands the device pattern and opens evdev nodes.
#[derive(Debug, Clone)]
pub struct EvdevProvider {
    pattern: DevicePattern,
}

impl EvdevProvider {
    pub fn new(pattern: DevicePattern) -> Self {
        Self { pattern }
    }
}

impl Default for EvdevProvider {
    fn default() -> Self {
        Self::new(DevicePattern::default())
    }
}

impl DeviceProvider for EvdevProvider {
    fn candidates(&self) -> crate::Result<Vec<PathBuf>> {
        expand_pattern(&self.pattern)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
        Ok(Box::new(EvdevDevice::open(path)?))
    }

    fn describe(&self) -> String {
        self.pattern.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_provider_reports_missing_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EvdevProvider::new(DevicePattern {
            dir: dir.path().to_path_buf(),
            prefix: "event".into(),
        });

        assert!(matches!(provider.candidates(), Err(Error::NoDevicesFound(_))));
        assert_eq!(provider.describe(), format!("{}/event*", dir.path().display()));
    }

    #[test]
    fn test_open_rejects_non_device_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event0");
        std::fs::write(&path, b"not a device").unwrap();

        let provider = EvdevProvider::new(DevicePattern {
            dir: dir.path().to_path_buf(),
            prefix: "event".into(),
        });
        assert_eq!(provider.candidates().unwrap(), vec![path.clone()]);
        assert!(provider.open(&path).is_err());
    }
}
