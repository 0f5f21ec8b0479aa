pub mod capture;
pub mod counter;
pub mod monitor;
pub mod session;
pub mod source;

pub use capture::{EventCapture, SessionSummary};
pub use counter::{CommandProbe, CounterCapture, CounterProbe, CounterSummary, Elevation, FileProbe};
pub use monitor::{SessionCounters, SessionState, SessionStatus};
pub use session::{CaptureSession, CaptureWorker, Flow};
pub use source::{event_channel, ChannelSource, EventSender, EventSource, IterSource, RawEventSender, SourcePoll};
