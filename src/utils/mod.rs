pub mod constants;
pub mod filter;
pub mod history;
pub mod interval;
pub mod logger;

pub use self::filter::{parse_filter_list, DeviceFilter};
pub use self::history::FixedCapacityHistory;
pub use self::interval::IntervalGate;
pub use self::logger::Logger;
