// 초 -> 나노초
pub const NANOSECONDS: f64 = 1_000_000_000.0;

// linux/sched.h, linux/genhd.h
pub const TASK_COMM_LEN: usize = 16;
pub const DISK_NAME_LEN: usize = 32;

// length 필드 단위 (512B 섹터)
pub const SECTOR_SIZE: u64 = 512;

// 설정 기본값
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_ECHO_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_ROTATE_ROWS: u64 = 25_000_000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 200_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
pub const MAX_POLL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_LATENCY_WARN_SECS: f64 = 10.0;
pub const DEFAULT_GATE_MAX_WAIT_FACTOR: f64 = 10.0;
pub const DEFAULT_COUNTER_INTERVAL_SECS: f64 = 60.0;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 65_536;

// workload 버퍼가 이만큼 차면 파일로 내보낸다
pub const WORKLOAD_DRAIN_BYTES: usize = 64 * 1024;
