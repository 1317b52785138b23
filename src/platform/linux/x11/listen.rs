//! XRecord context owning the control and data display connections.

use crate::cancel::CancelToken;
use crate::config::ContextMode;
use crate::error::{Error, Result};
use crate::platform::linux::context::{InterceptContext, RecordCategory, Sink};
use std::ffi::{CString, c_void};
use std::os::raw::{c_char, c_int, c_uchar, c_ulong};
use std::ptr::{self, null_mut};
use std::slice;
use std::sync::{Arc, Mutex, PoisonError};
use x11::xlib;
use x11::xrecord;

const FALSE: c_int = 0;
const TRUE: c_int = 1;

/// Context id shared with the stop path.
///
/// Cleared under the lock before the context is freed, so a late stop never
/// touches a freed context.
struct Remote {
    display: Option<CString>,
    context: Mutex<Option<xrecord::XRecordContext>>,
}

impl Remote {
    fn display_ptr(&self) -> *const c_char {
        self.display.as_ref().map_or(ptr::null(), |name| name.as_ptr())
    }

    /// Disable the context from a fresh connection, unblocking a synchronous
    /// `XRecordEnableContext` on the data display.
    fn disable(&self) {
        let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(context) = *context else {
            return;
        };

        unsafe {
            let dpy = xlib::XOpenDisplay(self.display_ptr());
            if dpy.is_null() {
                log::error!("Failed to open X display to disable the record context");
                return;
            }
            xrecord::XRecordDisableContext(dpy, context);
            xlib::XSync(dpy, FALSE);
            xlib::XCloseDisplay(dpy);
        }
    }
}

/// Callback closure. `sink` is only non-null while Xlib may invoke the
/// callback on the data display.
struct Slot {
    sink: *mut c_void,
    remote: Arc<Remote>,
    sync: bool,
    disable_requested: bool,
}

/// XRecord callback
unsafe extern "C" fn record_callback(closure: *mut c_char, raw_data: *mut xrecord::XRecordInterceptData) {
    unsafe {
        let Some(data) = raw_data.as_ref() else {
            return;
        };

        if let Some(slot) = closure.cast::<Slot>().as_mut()
            && let Some(sink) = slot.sink.cast::<Sink<'_>>().as_mut()
        {
            if slot.sync && !slot.disable_requested && !sink.token().is_running() {
                slot.disable_requested = true;
                slot.remote.disable();
            }

            // data_len counts 4-byte units
            let datum: &[u8] = if data.data.is_null() {
                &[]
            } else {
                slice::from_raw_parts(data.data as *const c_uchar, data.data_len as usize * 4)
            };
            sink.deliver(RecordCategory::from_raw(data.category), datum);
        }

        xrecord::XRecordFreeData(raw_data);
    }
}

/// An allocated record context plus the two display connections it needs.
pub(crate) struct RecordSession {
    control: *mut xlib::Display,
    data: *mut xlib::Display,
    remote: Arc<Remote>,
    slot: Box<Slot>,
}

impl RecordSession {
    /// Open both displays, verify RECORD, and create a context over the core
    /// input events of all clients.
    ///
    /// Anything acquired before a failure is released again.
    pub(crate) fn open(display: Option<&str>, mode: ContextMode, token: &CancelToken) -> Result<Self> {
        let label = display
            .map(str::to_string)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_default();
        let name = display
            .map(CString::new)
            .transpose()
            .map_err(|_| Error::DisplayOpenFailed(label.clone()))?;

        let remote = Arc::new(Remote {
            display: name,
            context: Mutex::new(None),
        });
        let mut session = Self {
            control: null_mut(),
            data: null_mut(),
            remote: remote.clone(),
            slot: Box::new(Slot {
                sink: null_mut(),
                remote: remote.clone(),
                sync: mode == ContextMode::Sync,
                disable_requested: false,
            }),
        };

        unsafe {
            session.control = xlib::XOpenDisplay(remote.display_ptr());
            if session.control.is_null() {
                return Err(Error::DisplayOpenFailed(label));
            }
            session.data = xlib::XOpenDisplay(remote.display_ptr());
            if session.data.is_null() {
                return Err(Error::DisplayOpenFailed(label));
            }

            let (mut opcode, mut first_event, mut first_error) = (0, 0, 0);
            if xlib::XQueryExtension(
                session.control,
                c"RECORD".as_ptr(),
                &mut opcode,
                &mut first_event,
                &mut first_error,
            ) == FALSE
            {
                return Err(Error::FeatureUnavailable("RECORD"));
            }

            let (mut major, mut minor) = (0, 0);
            if xrecord::XRecordQueryVersion(session.control, &mut major, &mut minor) == 0 {
                return Err(Error::VersionQueryFailed("RECORD"));
            }
            log::debug!("XRecord version {}.{}", major, minor);

            // key repeat arrives as press/press/release instead of
            // synthetic release/press pairs
            let mut supported = FALSE;
            xlib::XkbSetDetectableAutoRepeat(session.data, TRUE, &mut supported);
            if supported == FALSE {
                log::warn!("Could not enable detectable auto-repeat");
            }

            let range = xrecord::XRecordAllocRange();
            if range.is_null() {
                return Err(Error::ContextAllocFailed);
            }
            (*range).device_events.first = xlib::KeyPress as c_uchar;
            (*range).device_events.last = xlib::MotionNotify as c_uchar;
            (*range).delivered_events.first = xlib::MappingNotify as c_uchar;
            (*range).delivered_events.last = xlib::MappingNotify as c_uchar;

            let mut clients: c_ulong = xrecord::XRecordAllClients;
            let mut ranges = [range];
            let context = xrecord::XRecordCreateContext(
                session.control,
                0,
                &mut clients,
                1,
                ranges.as_mut_ptr(),
                1,
            );
            xlib::XFree(range.cast());

            if context == 0 {
                return Err(Error::ContextCreateFailed);
            }
            xlib::XSync(session.control, FALSE);

            *remote.context.lock().unwrap_or_else(PoisonError::into_inner) = Some(context);
        }

        if mode == ContextMode::Sync {
            let remote = remote.clone();
            token.on_cancel(move || remote.disable());
        }

        log::info!("Recording core input events from display {:?}", label);
        Ok(session)
    }

    fn context(&self) -> Result<xrecord::XRecordContext> {
        self.remote
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or(Error::ContextEnableFailed)
    }

    fn closure(&mut self, sink: &mut Sink<'_>) -> *mut c_char {
        self.slot.sink = (sink as *mut Sink<'_>).cast();
        (self.slot.as_mut() as *mut Slot).cast()
    }

    /// Free the context, then close the data and control displays.
    /// Safe to call more than once.
    pub(crate) fn close(&mut self) {
        let context = self
            .remote
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        unsafe {
            if let Some(context) = context
                && !self.control.is_null()
            {
                xrecord::XRecordDisableContext(self.control, context);
                xrecord::XRecordFreeContext(self.control, context);
                xlib::XSync(self.control, FALSE);
            }
            if !self.data.is_null() {
                xlib::XCloseDisplay(self.data);
                self.data = null_mut();
            }
            if !self.control.is_null() {
                xlib::XCloseDisplay(self.control);
                self.control = null_mut();
            }
        }
    }
}

impl InterceptContext for RecordSession {
    fn enable(&mut self, sink: &mut Sink<'_>) -> Result<()> {
        let context = self.context()?;
        let closure = self.closure(sink);
        let status = unsafe {
            xrecord::XRecordEnableContext(self.data, context, Some(record_callback), closure)
        };
        self.slot.sink = null_mut();

        if status == 0 {
            return Err(Error::ContextEnableFailed);
        }
        Ok(())
    }

    fn enable_async(&mut self, sink: &mut Sink<'_>) -> Result<()> {
        let context = self.context()?;
        let closure = self.closure(sink);
        let status = unsafe {
            xrecord::XRecordEnableContextAsync(self.data, context, Some(record_callback), closure)
        };
        self.slot.sink = null_mut();

        if status == 0 {
            return Err(Error::ContextEnableFailed);
        }
        Ok(())
    }

    fn process_replies(&mut self, sink: &mut Sink<'_>) {
        if self.data.is_null() {
            return;
        }
        self.closure(sink);
        unsafe {
            xrecord::XRecordProcessReplies(self.data);
        }
        self.slot.sink = null_mut();
    }

    fn disable(&mut self) {
        if let Ok(context) = self.context() {
            unsafe {
                xrecord::XRecordDisableContext(self.control, context);
                xlib::XSync(self.control, FALSE);
            }
        }
    }
}

impl Drop for RecordSession {
    fn drop(&mut self) {
        self.close();
    }
}
