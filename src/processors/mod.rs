pub mod aggregator;
pub mod diff;
pub mod streams;

pub use aggregator::{AggregationTable, SizeBucket, WorkloadAggregator};
pub use diff::{parse_counter_dump, CounterSnapshot, DiffCounters, WearReport};
pub use streams::{StreamCounter, StreamStats};
