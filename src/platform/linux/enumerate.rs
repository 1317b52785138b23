//! Device/source enumeration.

use crate::config::DevicePattern;
use crate::error::{Error, Result};
use crate::event::SourceId;
use crate::source::{Capability, DeviceProvider, SourceHandle};
use std::fs;
use std::path::PathBuf;

/// Expand a `dir/prefix*` pattern into candidate paths, sorted by name.
///
/// A directory that cannot be read is `EnumerationFailed`; an empty match
/// is `NoDevicesFound`.
pub fn expand_pattern(pattern: &DevicePattern) -> Result<Vec<PathBuf>> {
    let failed = |source| Error::EnumerationFailed {
        path: pattern.dir.clone(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(&pattern.dir).map_err(failed)? {
        let entry = entry.map_err(failed)?;
        let name = entry.file_name();
        if pattern.matches(&name.to_string_lossy()) {
            paths.try_reserve(1)?;
            paths.push(entry.path());
        }
    }

    if paths.is_empty() {
        return Err(Error::NoDevicesFound(pattern.to_string()));
    }

    paths.sort();
    Ok(paths)
}

/// Open and classify every candidate the provider lists.
///
/// Candidates that fail to open are skipped with a warning; candidates that
/// are neither keyboard nor pointer are closed and skipped. Fails with
/// `NoUsableDevices` only when nothing was accepted.
pub fn enumerate(provider: &dyn DeviceProvider, mirror: bool) -> Result<Vec<SourceHandle>> {
    let candidates = provider.candidates()?;
    if candidates.is_empty() {
        return Err(Error::NoDevicesFound(provider.describe()));
    }

    let mut accepted = Vec::new();
    accepted.try_reserve_exact(candidates.len())?;

    for (index, path) in candidates.iter().enumerate() {
        let device = match provider.open(path) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Failed to open {}: {}", path.display(), e);
                continue;
            }
        };

        let capability = device.capability();
        if capability == Capability::Unsupported {
            log::debug!("Unsupported input device: {}", path.display());
            continue;
        }

        log::info!(
            "Found {} device: {} ({})",
            capability,
            path.display(),
            device.name()
        );

        let mut handle = SourceHandle::new(SourceId(index as u32), path.clone(), capability, device);
        if mirror {
            attach_mirror(&mut handle);
        }
        accepted.push(handle);
    }

    if accepted.is_empty() {
        return Err(Error::NoUsableDevices {
            checked: candidates.len(),
        });
    }

    // a boxed slice has no spare capacity
    Ok(accepted.into_boxed_slice().into_vec())
}

fn attach_mirror(handle: &mut SourceHandle) {
    match handle.device_mut().open_mirror() {
        Ok(Some(mirror)) => {
            log::debug!("Mirroring {} through a virtual device", handle.path().display());
            handle.set_mirror(mirror);
        }
        Ok(None) => log::debug!("{} does not support mirroring", handle.path().display()),
        Err(e) => log::warn!(
            "Failed to create mirror for {}: {}",
            handle.path().display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InputRecord;
    use crate::source::{InputDevice, Mirror};
    use std::io;
    use std::os::fd::RawFd;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDevice {
        capability: Capability,
        live: Arc<AtomicUsize>,
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl InputDevice for FakeDevice {
        fn name(&self) -> &str {
            "fake"
        }
        fn raw_fd(&self) -> RawFd {
            -1
        }
        fn capability(&self) -> Capability {
            self.capability
        }
        fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
            Ok(None)
        }
        fn open_mirror(&mut self) -> io::Result<Option<Box<dyn Mirror>>> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    /// Candidate names encode the outcome: `kbd*`, `ptr*`, `joy*` open; `bad*` fails.
    struct Scripted {
        names: Vec<&'static str>,
        live: Arc<AtomicUsize>,
    }

    impl DeviceProvider for Scripted {
        fn candidates(&self) -> Result<Vec<PathBuf>> {
            Ok(self.names.iter().map(PathBuf::from).collect())
        }

        fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
            let name = path.to_string_lossy();
            let capability = if name.starts_with("kbd") {
                Capability::Keyboard
            } else if name.starts_with("ptr") {
                Capability::Pointer
            } else if name.starts_with("joy") {
                Capability::Unsupported
            } else {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            };
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                capability,
                live: self.live.clone(),
            }))
        }
    }

    fn scripted(names: &[&'static str]) -> Scripted {
        Scripted {
            names: names.to_vec(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[test]
    fn test_partial_failure_keeps_survivors() {
        let provider = scripted(&["kbd0", "bad1", "ptr2", "joy3", "bad4"]);
        let sources = enumerate(&provider, false).unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources.capacity(), 2);
        assert_eq!(sources[0].capability(), Capability::Keyboard);
        assert_eq!(sources[0].id(), SourceId(0));
        assert_eq!(sources[1].capability(), Capability::Pointer);
        assert_eq!(sources[1].id(), SourceId(2));

        // the unsupported candidate was opened and closed again
        assert_eq!(provider.live.load(Ordering::SeqCst), 2);
        drop(sources);
        assert_eq!(provider.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_candidates_rejected() {
        let provider = scripted(&["bad0", "joy1", "bad2"]);
        let err = enumerate(&provider, false).unwrap_err();

        assert!(matches!(err, Error::NoUsableDevices { checked: 3 }));
        assert_eq!(provider.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_candidates() {
        let provider = scripted(&[]);
        let err = enumerate(&provider, false).unwrap_err();
        assert!(matches!(err, Error::NoDevicesFound(_)));
    }

    #[test]
    fn test_mirror_failure_is_not_fatal() {
        let provider = scripted(&["kbd0"]);
        let sources = enumerate(&provider, true).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(!sources[0].has_mirror());
    }

    #[test]
    fn test_expand_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["event3", "event0", "mouse0", "event12"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let pattern = DevicePattern {
            dir: dir.path().to_path_buf(),
            prefix: "event".into(),
        };
        let paths = expand_pattern(&pattern).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["event0", "event12", "event3"]);
    }

    #[test]
    fn test_expand_pattern_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mouse0"), b"").unwrap();

        let empty = DevicePattern {
            dir: dir.path().to_path_buf(),
            prefix: "event".into(),
        };
        assert!(matches!(
            expand_pattern(&empty),
            Err(Error::NoDevicesFound(_))
        ));

        let missing = DevicePattern {
            dir: dir.path().join("absent"),
            prefix: "event".into(),
        };
        assert!(matches!(
            expand_pattern(&missing),
            Err(Error::EnumerationFailed { .. })
        ));
    }
}
