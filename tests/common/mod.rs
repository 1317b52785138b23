//! Simulated input sources backed by Unix socket pairs.
//!
//! Each source is a real descriptor in the real epoll registry. Records are
//! written by the test as 8-byte frames: type (u16), code (u16), value (i32),
//! native-endian.

#![allow(dead_code)]

use inputtap::{Capability, DeviceProvider, InputDevice, InputRecord};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::sleep;
use std::time::{Duration, Instant};

const FRAME_LEN: usize = 8;

/// The engine allows one session per process, so tests take turns.
pub fn serial() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn wait_for(what: &str, timeout: Duration, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return;
        }
        sleep(Duration::from_millis(5));
    }
    panic!("Timed out waiting for {what}");
}

pub fn encode(kind: u16, code: u16, value: i32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0..2].copy_from_slice(&kind.to_ne_bytes());
    frame[2..4].copy_from_slice(&code.to_ne_bytes());
    frame[4..8].copy_from_slice(&value.to_ne_bytes());
    frame
}

struct SimDevice {
    name: String,
    stream: UnixStream,
    capability: Capability,
    live: Arc<AtomicUsize>,
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InputDevice for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
        let mut frame = [0u8; FRAME_LEN];
        match self.stream.read(&mut frame) {
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device unplugged")),
            Ok(FRAME_LEN) => Ok(Some(InputRecord::new(
                u16::from_ne_bytes([frame[0], frame[1]]),
                u16::from_ne_bytes([frame[2], frame[3]]),
                i32::from_ne_bytes([frame[4], frame[5], frame[6], frame[7]]),
            ))),
            Ok(n) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("short frame of {n} bytes"),
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Provider handing out the reading ends of a fixed set of socket pairs.
pub struct SimProvider {
    pending: Mutex<BTreeMap<PathBuf, (UnixStream, Capability)>>,
    live: Arc<AtomicUsize>,
}

impl DeviceProvider for SimProvider {
    fn candidates(&self) -> inputtap::Result<Vec<PathBuf>> {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pending.keys().cloned().collect())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (stream, capability) = pending
            .remove(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        stream.set_nonblocking(true)?;

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimDevice {
            name: path.display().to_string(),
            stream,
            capability,
            live: self.live.clone(),
        }))
    }

    fn describe(&self) -> String {
        String::from("simulated devices")
    }
}

/// Test side of the simulated devices.
pub struct Rig {
    writers: BTreeMap<String, UnixStream>,
    live: Arc<AtomicUsize>,
}

impl Rig {
    pub fn new(devices: &[(&str, Capability)]) -> (Self, SimProvider) {
        let live = Arc::new(AtomicUsize::new(0));
        let mut writers = BTreeMap::new();
        let mut pending = BTreeMap::new();

        for &(name, capability) in devices {
            let (reader, writer) = UnixStream::pair().expect("Failed to create socket pair");
            writers.insert(name.to_string(), writer);
            pending.insert(PathBuf::from(name), (reader, capability));
        }

        let provider = SimProvider {
            pending: Mutex::new(pending),
            live: live.clone(),
        };
        (Self { writers, live }, provider)
    }

    pub fn send(&mut self, device: &str, records: &[(u16, u16, i32)]) {
        let mut bytes = Vec::with_capacity(records.len() * FRAME_LEN);
        for &(kind, code, value) in records {
            bytes.extend_from_slice(&encode(kind, code, value));
        }
        self.writers
            .get_mut(device)
            .expect("Unknown simulated device")
            .write_all(&bytes)
            .expect("Failed to write records");
    }

    /// Simulate unplugging a device.
    pub fn unplug(&mut self, device: &str) {
        self.writers.remove(device);
    }

    /// Number of simulated devices currently open.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
