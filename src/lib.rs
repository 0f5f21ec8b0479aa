pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod processors;
pub mod realtime;
pub mod utils;

// 주요 기능 재내보내기(re-exporting)
pub use config::{CaptureConfig, Verbosity};
pub use error::{CaptureError, DecodeError, Result};
pub use models::{CaptureKind, Event, EventDecoder, Opcode, RawEvent};
pub use processors::{AggregationTable, DiffCounters, WorkloadAggregator};
pub use realtime::{event_channel, CaptureSession, CounterCapture, EventCapture, SessionState, SessionSummary};
pub use utils::{DeviceFilter, FixedCapacityHistory, IntervalGate, Logger};
