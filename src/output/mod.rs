pub mod csv;
pub mod pending;
pub mod reader;
pub mod sink;
pub mod statistics;

pub use self::csv::{event_record, WorkloadWriter};
pub use self::reader::{statistics_path_for, WorkloadReader};
pub use self::pending::PendingWriter;
pub use self::sink::{OutputPaths, OutputSink, WorkloadOpener};
pub use self::statistics::{MemoryStatistics, StatisticsFile, StatisticsRecord, StatisticsSink};
