//! Raw event records handed across the translator boundary.
//!
//! The engine never builds canonical events itself. It relays the
//! backend-native data below and lets the [`Translator`](crate::Translator)
//! decide what it means.

use std::fmt;
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Linux input-event ABI numbers the engine needs for routing and resync.
pub mod ev {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
    pub const EV_ABS: u16 = 0x03;
    pub const EV_MSC: u16 = 0x04;
    pub const EV_REP: u16 = 0x14;

    pub const SYN_REPORT: u16 = 0x00;
    pub const SYN_DROPPED: u16 = 0x03;

    pub const REL_X: u16 = 0x00;
    pub const REL_Y: u16 = 0x01;
    pub const REL_HWHEEL: u16 = 0x06;
    pub const REL_WHEEL: u16 = 0x08;
    pub const REL_WHEEL_HI_RES: u16 = 0x0b;
    pub const REL_HWHEEL_HI_RES: u16 = 0x0c;

    pub const ABS_X: u16 = 0x00;
    pub const ABS_Y: u16 = 0x01;

    pub const KEY_ESC: u16 = 1;
    /// First code of the button block (`BTN_MISC`).
    pub const BTN_MISC: u16 = 0x100;
    pub const BTN_LEFT: u16 = 0x110;
    /// First key code after the button block (`KEY_OK`).
    pub const KEY_OK: u16 = 0x160;
}

/// X11 core event types carried in recorded wire data.
pub mod x {
    pub const KEY_PRESS: u8 = 2;
    pub const KEY_RELEASE: u8 = 3;
    pub const BUTTON_PRESS: u8 = 4;
    pub const BUTTON_RELEASE: u8 = 5;
    pub const MOTION_NOTIFY: u8 = 6;
    pub const MAPPING_NOTIFY: u8 = 34;
}

/// Stable identity of one source for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// One Linux `input_event` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputRecord {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
    pub time: SystemTime,
}

impl InputRecord {
    /// Create a record stamped with the current time.
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self {
            kind,
            code,
            value,
            time: SystemTime::now(),
        }
    }

    /// The kernel dropped events because the client queue overflowed.
    pub fn is_overflow(&self) -> bool {
        self.kind == ev::EV_SYN && self.code == ev::SYN_DROPPED
    }

    /// End of an event frame.
    pub fn is_report(&self) -> bool {
        self.kind == ev::EV_SYN && self.code == ev::SYN_REPORT
    }
}

/// A decoded X11 core input event taken from XRecord wire data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WireEvent {
    /// Event type with the send-event bit masked off.
    pub kind: u8,
    /// Keycode or button number.
    pub detail: u8,
    /// Server timestamp in milliseconds.
    pub time: u32,
    pub root_x: i16,
    pub root_y: i16,
    /// Modifier and button state before the event.
    pub state: u16,
}

impl WireEvent {
    /// Size of a core protocol event on the wire.
    pub const WIRE_LEN: usize = 32;

    /// Decode a core event from the bytes of an XRecord datum.
    ///
    /// Recorded server data uses the client's byte order.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return None;
        }

        let u16_at = |at: usize| u16::from_ne_bytes([bytes[at], bytes[at + 1]]);
        let i16_at = |at: usize| i16::from_ne_bytes([bytes[at], bytes[at + 1]]);

        Some(Self {
            kind: bytes[0] & 0x7f,
            detail: bytes[1],
            time: u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            root_x: i16_at(20),
            root_y: i16_at(22),
            state: u16_at(28),
        })
    }
}

/// Backend-native data for one relayed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NativeEvent {
    /// Session-level notification with no native payload.
    Session,
    /// A record read from an evdev source.
    Evdev { source: SourceId, record: InputRecord },
    /// A core event recorded from the X server.
    X11(WireEvent),
}

/// Which translator callback a record was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventKind {
    SessionEnabled,
    SessionDisabled,
    KeyDown,
    KeyUp,
    ButtonDown,
    ButtonUp,
    Motion,
    Wheel,
    MappingChanged,
}

/// Owned copy of one translator callback, for consumers that queue work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawEvent {
    pub kind: EventKind,
    pub native: NativeEvent,
}

impl RawEvent {
    pub fn new(kind: EventKind, native: NativeEvent) -> Self {
        Self { kind, native }
    }
}

/// Pick the callback for an evdev record.
///
/// Returns `None` for records that carry no input (frame markers,
/// miscellaneous scan codes, LEDs and so on).
pub fn route_input(record: &InputRecord) -> Option<EventKind> {
    match record.kind {
        ev::EV_KEY => {
            let button = (ev::BTN_MISC..ev::KEY_OK).contains(&record.code);
            match (button, record.value) {
                (false, 0) => Some(EventKind::KeyUp),
                (false, _) => Some(EventKind::KeyDown),
                (true, 0) => Some(EventKind::ButtonUp),
                (true, _) => Some(EventKind::ButtonDown),
            }
        }
        ev::EV_REL => match record.code {
            ev::REL_X | ev::REL_Y => Some(EventKind::Motion),
            ev::REL_WHEEL | ev::REL_HWHEEL | ev::REL_WHEEL_HI_RES | ev::REL_HWHEEL_HI_RES => {
                Some(EventKind::Wheel)
            }
            _ => None,
        },
        ev::EV_ABS => match record.code {
            ev::ABS_X | ev::ABS_Y => Some(EventKind::Motion),
            _ => None,
        },
        _ => None,
    }
}

/// Pick the callback for a recorded X11 core event.
pub fn route_wire(event: &WireEvent) -> Option<EventKind> {
    match event.kind {
        x::KEY_PRESS => Some(EventKind::KeyDown),
        x::KEY_RELEASE => Some(EventKind::KeyUp),
        x::BUTTON_PRESS => Some(EventKind::ButtonDown),
        x::BUTTON_RELEASE => Some(EventKind::ButtonUp),
        x::MOTION_NOTIFY => Some(EventKind::Motion),
        x::MAPPING_NOTIFY => Some(EventKind::MappingChanged),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_keys_and_buttons() {
        let key = |code, value| route_input(&InputRecord::new(ev::EV_KEY, code, value));

        assert_eq!(key(30, 1), Some(EventKind::KeyDown));
        assert_eq!(key(30, 2), Some(EventKind::KeyDown));
        assert_eq!(key(30, 0), Some(EventKind::KeyUp));
        assert_eq!(key(ev::BTN_LEFT, 1), Some(EventKind::ButtonDown));
        assert_eq!(key(ev::BTN_LEFT, 0), Some(EventKind::ButtonUp));
        assert_eq!(key(ev::KEY_OK, 1), Some(EventKind::KeyDown));
    }

    #[test]
    fn test_route_pointer_axes() {
        let rel = |code| route_input(&InputRecord::new(ev::EV_REL, code, 3));

        assert_eq!(rel(ev::REL_X), Some(EventKind::Motion));
        assert_eq!(rel(ev::REL_Y), Some(EventKind::Motion));
        assert_eq!(rel(ev::REL_WHEEL), Some(EventKind::Wheel));
        assert_eq!(rel(ev::REL_HWHEEL_HI_RES), Some(EventKind::Wheel));
        assert_eq!(rel(0x09), None);

        let abs = InputRecord::new(ev::EV_ABS, ev::ABS_Y, 400);
        assert_eq!(route_input(&abs), Some(EventKind::Motion));
    }

    #[test]
    fn test_frame_markers_are_not_routed() {
        assert_eq!(route_input(&InputRecord::new(ev::EV_SYN, ev::SYN_REPORT, 0)), None);
        assert_eq!(route_input(&InputRecord::new(ev::EV_MSC, 4, 458756)), None);
        assert!(InputRecord::new(ev::EV_SYN, ev::SYN_DROPPED, 0).is_overflow());
    }

    #[test]
    fn test_wire_decode() {
        let mut bytes = [0u8; 32];
        bytes[0] = x::BUTTON_PRESS | 0x80;
        bytes[1] = 3;
        bytes[4..8].copy_from_slice(&123_456u32.to_ne_bytes());
        bytes[20..22].copy_from_slice(&640i16.to_ne_bytes());
        bytes[22..24].copy_from_slice(&(-12i16).to_ne_bytes());
        bytes[28..30].copy_from_slice(&0x0104u16.to_ne_bytes());

        let event = WireEvent::decode(&bytes).unwrap();
        assert_eq!(event.kind, x::BUTTON_PRESS);
        assert_eq!(event.detail, 3);
        assert_eq!(event.time, 123_456);
        assert_eq!((event.root_x, event.root_y), (640, -12));
        assert_eq!(event.state, 0x0104);
        assert_eq!(route_wire(&event), Some(EventKind::ButtonDown));
    }

    #[test]
    fn test_wire_decode_short_datum() {
        assert_eq!(WireEvent::decode(&[x::KEY_PRESS; 8]), None);
    }
}
