//! X11 interception through the RECORD extension.

mod listen;

pub(crate) use listen::RecordSession;
