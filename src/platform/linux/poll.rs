//! Poll-multiplexed reactor over evdev-style sources.

use super::registry::{WAKE_TOKEN, WaitRegistry};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::event::{EventKind, InputRecord, NativeEvent, SourceId, ev, route_input};
use crate::hook::{Translator, dispatch};
use crate::source::SourceHandle;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Ready slots collected per wait.
const EVENT_BUFFER_SIZE: usize = 8;

/// Records drained from one source between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Sources registered in one epoll registry, plus its wake source.
///
/// A source is in `sources` exactly when its descriptor is registered.
pub(crate) struct PollBackend {
    // sources are deregistered and closed before the registry
    sources: HashMap<SourceId, SourceHandle>,
    registry: Option<WaitRegistry>,
    timeout: Duration,
    opened: usize,
}

impl PollBackend {
    /// Register every source and hook the wake source up to `token`.
    pub(crate) fn open(
        sources: Vec<SourceHandle>,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<Self> {
        let registry = WaitRegistry::new().map_err(Error::WaitRegistryCreateFailed)?;
        let opened = sources.len();

        let mut live = HashMap::with_capacity(opened);
        for handle in sources {
            match registry.add(handle.raw_fd(), u64::from(handle.id().0)) {
                Ok(()) => {
                    live.insert(handle.id(), handle);
                }
                Err(e) => {
                    log::warn!(
                        "Failed to add {} to the wait registry: {}",
                        handle.path().display(),
                        e
                    );
                }
            }
        }

        if live.is_empty() {
            return Err(Error::NoUsableDevices { checked: opened });
        }

        let waker = registry.waker();
        token.on_cancel(move || waker.wake());

        Ok(Self {
            sources: live,
            registry: Some(registry),
            timeout,
            opened,
        })
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Relay records until `token` is cancelled or every source is retired.
    pub(crate) fn run(&mut self, token: &CancelToken, translator: &mut dyn Translator) -> Result<()> {
        let mut ready = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BUFFER_SIZE];
        let mut result = Ok(());

        dispatch(translator, EventKind::SessionEnabled, &NativeEvent::Session);

        while token.is_running() {
            let count = match self.wait(&mut ready) {
                Ok(count) => count,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("Waiting on the registry failed: {}", e);
                    result = Err(Error::Unknown(format!("epoll_wait failed: {e}")));
                    break;
                }
            };

            for slot in &ready[..count] {
                let (key, flags) = (slot.u64, slot.events);
                if key == WAKE_TOKEN {
                    if let Some(registry) = &self.registry {
                        registry.waker().drain();
                    }
                    continue;
                }
                self.service(SourceId(key as u32), flags, token, translator);
            }

            if self.sources.is_empty() {
                log::error!(
                    "All {} input sources were retired, stopping session",
                    self.opened
                );
                result = Err(Error::NoUsableDevices {
                    checked: self.opened,
                });
                break;
            }
        }

        dispatch(translator, EventKind::SessionDisabled, &NativeEvent::Session);
        result
    }

    fn wait(&self, ready: &mut [libc::epoll_event]) -> io::Result<usize> {
        match &self.registry {
            Some(registry) => registry.wait(ready, self.timeout),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "registry closed")),
        }
    }

    /// Drain one ready source, retiring it on a hard error or hang-up.
    fn service(
        &mut self,
        id: SourceId,
        flags: u32,
        token: &CancelToken,
        translator: &mut dyn Translator,
    ) {
        let Some(handle) = self.sources.get_mut(&id) else {
            log::trace!("Readiness for retired {}", id);
            return;
        };

        match pump(handle, token, translator) {
            Ok(()) if flags & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 => {
                log::warn!("{} hung up, retiring it", handle.path().display());
                self.retire(id);
            }
            Ok(()) => {}
            Err(source) => {
                let err = Error::DeviceReadFailed {
                    name: handle.path().display().to_string(),
                    source,
                };
                log::warn!("{}; retiring source", err);
                self.retire(id);
            }
        }
    }

    /// Deregister and close one source.
    fn retire(&mut self, id: SourceId) {
        if let Some(handle) = self.sources.remove(&id) {
            if let Some(registry) = &self.registry
                && let Err(e) = registry.remove(handle.raw_fd())
            {
                log::debug!("Failed to deregister {}: {}", handle.path().display(), e);
            }
            log::debug!("Closed {}", handle.path().display());
        }
    }

    /// Close every source, then the registry. Safe to call more than once.
    pub(crate) fn close(&mut self) {
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();
        for id in ids {
            self.retire(id);
        }
        self.registry.take();
    }
}

impl Drop for PollBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain queued records from one source until it would block.
///
/// An overflow marker switches the source into resync: records are
/// discarded until the next frame marker, then held keys are reconciled
/// with the device. Resync state survives across calls.
///
/// Draining stops early once `token` is cancelled, so a flooding source
/// cannot hold the reactor past a stop.
pub(crate) fn pump(
    handle: &mut SourceHandle,
    token: &CancelToken,
    translator: &mut dyn Translator,
) -> io::Result<()> {
    let mut drained = 0usize;
    while let Some(record) = handle.read_record()? {
        drained += 1;
        if drained % CANCEL_CHECK_INTERVAL == 0 && !token.is_running() {
            log::debug!("Stop requested, leaving {} undrained", handle.path().display());
            break;
        }

        if handle.is_syncing() {
            if record.is_report() {
                finish_resync(handle, translator);
            }
            continue;
        }

        if record.is_overflow() {
            log::debug!(
                "Event queue overflow on {}, resynchronizing",
                handle.path().display()
            );
            handle.set_syncing(true);
            continue;
        }

        forward(handle, record, translator);
    }
    Ok(())
}

fn forward(handle: &mut SourceHandle, record: InputRecord, translator: &mut dyn Translator) {
    handle.mirror_record(&record);

    match route_input(&record) {
        Some(kind) => {
            handle.note_forwarded(&record);
            let native = NativeEvent::Evdev {
                source: handle.id(),
                record,
            };
            dispatch(translator, kind, &native);
        }
        None if record.kind == ev::EV_SYN => {}
        None => log::trace!(
            "Ignoring record type {:#x} code {:#x} from {}",
            record.kind,
            record.code,
            handle.id()
        ),
    }
}

fn finish_resync(handle: &mut SourceHandle, translator: &mut dyn Translator) {
    handle.set_syncing(false);

    let fixes = handle.reconcile();
    log::debug!(
        "{} caught up after overflow, merging {} key changes",
        handle.path().display(),
        fixes.len()
    );

    if fixes.is_empty() {
        return;
    }
    for record in fixes {
        forward(handle, record, translator);
    }
    handle.mirror_record(&InputRecord::new(ev::EV_SYN, ev::SYN_REPORT, 0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Capability, InputDevice};
    use std::collections::{BTreeSet, VecDeque};
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    /// Scripted reads: `Some(record)`, `None` for "would block", or an error.
    struct Script {
        steps: VecDeque<io::Result<Option<InputRecord>>>,
        keys: Option<BTreeSet<u16>>,
    }

    impl InputDevice for Script {
        fn name(&self) -> &str {
            "script"
        }
        fn raw_fd(&self) -> RawFd {
            -1
        }
        fn capability(&self) -> Capability {
            Capability::Keyboard
        }
        fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }
        fn key_state(&self) -> Option<BTreeSet<u16>> {
            self.keys.clone()
        }
    }

    fn rec(kind: u16, code: u16, value: i32) -> io::Result<Option<InputRecord>> {
        Ok(Some(InputRecord::new(kind, code, value)))
    }

    fn handle(steps: Vec<io::Result<Option<InputRecord>>>, keys: Option<BTreeSet<u16>>) -> SourceHandle {
        SourceHandle::new(
            SourceId(4),
            PathBuf::from("script"),
            Capability::Keyboard,
            Box::new(Script {
                steps: steps.into(),
                keys,
            }),
        )
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(EventKind, u16, i32)>,
    }

    impl Translator for Recorder {
        fn on_event(&mut self, kind: EventKind, event: &NativeEvent) {
            if let NativeEvent::Evdev { record, .. } = event {
                self.seen.push((kind, record.code, record.value));
            }
        }
    }

    #[test]
    fn test_pump_preserves_order_and_stops_on_would_block() {
        let mut source = handle(
            vec![
                rec(ev::EV_KEY, 30, 1),
                rec(ev::EV_SYN, ev::SYN_REPORT, 0),
                rec(ev::EV_KEY, 30, 0),
                rec(ev::EV_KEY, 31, 1),
                Ok(None),
                rec(ev::EV_KEY, 31, 0),
            ],
            None,
        );
        let mut sink = Recorder::default();

        pump(&mut source, &CancelToken::new(), &mut sink).unwrap();
        assert_eq!(
            sink.seen,
            vec![
                (EventKind::KeyDown, 30, 1),
                (EventKind::KeyUp, 30, 0),
                (EventKind::KeyDown, 31, 1),
            ]
        );

        pump(&mut source, &CancelToken::new(), &mut sink).unwrap();
        assert_eq!(sink.seen.last(), Some(&(EventKind::KeyUp, 31, 0)));
    }

    #[test]
    fn test_resync_discards_until_caught_up() {
        let mut source = handle(
            vec![
                rec(ev::EV_KEY, 30, 1),
                rec(ev::EV_SYN, ev::SYN_DROPPED, 0),
                rec(ev::EV_KEY, 30, 0),
                rec(ev::EV_KEY, 32, 1),
                Ok(None),
                rec(ev::EV_KEY, 32, 0),
                rec(ev::EV_SYN, ev::SYN_REPORT, 0),
                rec(ev::EV_KEY, 33, 1),
                rec(ev::EV_KEY, 33, 0),
            ],
            Some(BTreeSet::new()),
        );
        let mut sink = Recorder::default();

        // the burst is split across two wake-ups
        pump(&mut source, &CancelToken::new(), &mut sink).unwrap();
        assert!(source.is_syncing());
        pump(&mut source, &CancelToken::new(), &mut sink).unwrap();
        assert!(!source.is_syncing());

        assert_eq!(
            sink.seen,
            vec![
                (EventKind::KeyDown, 30, 1),
                // merged: 30 was forwarded as held but the kernel says it is up
                (EventKind::KeyUp, 30, 0),
                (EventKind::KeyDown, 33, 1),
                (EventKind::KeyUp, 33, 0),
            ]
        );
    }

    #[test]
    fn test_resync_reports_keys_pressed_during_overflow() {
        let mut source = handle(
            vec![
                rec(ev::EV_SYN, ev::SYN_DROPPED, 0),
                rec(ev::EV_KEY, 42, 1),
                rec(ev::EV_SYN, ev::SYN_REPORT, 0),
            ],
            Some([42].into_iter().collect()),
        );
        let mut sink = Recorder::default();

        pump(&mut source, &CancelToken::new(), &mut sink).unwrap();
        assert_eq!(sink.seen, vec![(EventKind::KeyDown, 42, 1)]);
    }

    #[test]
    fn test_pump_surfaces_read_errors() {
        let mut source = handle(
            vec![
                rec(ev::EV_REL, ev::REL_X, 4),
                Err(io::Error::from_raw_os_error(libc::ENODEV)),
            ],
            None,
        );
        let mut sink = Recorder::default();

        assert!(pump(&mut source, &CancelToken::new(), &mut sink).is_err());
        assert_eq!(sink.seen, vec![(EventKind::Motion, ev::REL_X, 4)]);
    }

    /// Never runs dry.
    struct Flood;

    impl InputDevice for Flood {
        fn name(&self) -> &str {
            "flood"
        }
        fn raw_fd(&self) -> RawFd {
            -1
        }
        fn capability(&self) -> Capability {
            Capability::Pointer
        }
        fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
            Ok(Some(InputRecord::new(ev::EV_REL, ev::REL_X, 1)))
        }
    }

    struct CancelOnFirst {
        token: CancelToken,
        seen: usize,
    }

    impl Translator for CancelOnFirst {
        fn on_event(&mut self, _kind: EventKind, _event: &NativeEvent) {
            self.seen += 1;
            self.token.cancel();
        }
    }

    #[test]
    fn test_pump_yields_to_stop_on_flooding_source() {
        let mut source = SourceHandle::new(
            SourceId(1),
            PathBuf::from("flood"),
            Capability::Pointer,
            Box::new(Flood),
        );
        let token = CancelToken::new();
        let mut sink = CancelOnFirst {
            token: token.clone(),
            seen: 0,
        };

        pump(&mut source, &token, &mut sink).unwrap();
        assert!(sink.seen >= 1);
        assert!(sink.seen < CANCEL_CHECK_INTERVAL);
    }

    #[test]
    fn test_unregistrable_sources_are_rejected() {
        let token = CancelToken::new();
        let backend = PollBackend::open(
            vec![handle(Vec::new(), None)],
            Duration::from_millis(10),
            &token,
        );
        // fd -1 cannot be registered, so nothing survives registration
        assert!(matches!(backend, Err(Error::NoUsableDevices { checked: 1 })));
    }

    struct Socket(UnixStream);

    impl InputDevice for Socket {
        fn name(&self) -> &str {
            "socket"
        }
        fn raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
        fn capability(&self) -> Capability {
            Capability::Pointer
        }
        fn read_record(&mut self) -> io::Result<Option<InputRecord>> {
            Ok(None)
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let (reader, _writer) = UnixStream::pair().unwrap();
        let source = SourceHandle::new(
            SourceId(0),
            PathBuf::from("socket"),
            Capability::Pointer,
            Box::new(Socket(reader)),
        );

        let token = CancelToken::new();
        let mut backend = PollBackend::open(vec![source], Duration::from_millis(10), &token).unwrap();
        assert_eq!(backend.source_count(), 1);

        backend.close();
        backend.close();
        assert_eq!(backend.source_count(), 0);

        let mut sink = |_: EventKind, _: &NativeEvent| {};
        assert!(matches!(backend.run(&token, &mut sink), Err(Error::Unknown(_))));
    }

    #[test]
    fn test_run_returns_when_cancelled() {
        let (reader, _writer) = UnixStream::pair().unwrap();
        let source = SourceHandle::new(
            SourceId(0),
            PathBuf::from("socket"),
            Capability::Pointer,
            Box::new(Socket(reader)),
        );

        let token = CancelToken::new();
        let mut backend = PollBackend::open(vec![source], Duration::from_secs(30), &token).unwrap();

        let canceller = token.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let mut kinds = Vec::new();
        let mut sink = |kind: EventKind, _: &NativeEvent| kinds.push(kind);
        let started = std::time::Instant::now();
        backend.run(&token, &mut sink).unwrap();
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(kinds, vec![EventKind::SessionEnabled, EventKind::SessionDisabled]);
    }
}
