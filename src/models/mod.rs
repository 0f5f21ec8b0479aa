mod capture_kind;
mod event;
mod opcode;

pub use capture_kind::CaptureKind;
pub use event::{pad_name, Event, EventDecoder, RawEvent};
pub use opcode::{Opcode, ADMIN_FLAG};
