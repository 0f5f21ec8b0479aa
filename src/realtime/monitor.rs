use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::processors::AggregationTable;

/// Created -> Running -> ShuttingDown -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Running,
            2 => SessionState::ShuttingDown,
            _ => SessionState::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// 워커와 소유자가 공유하는 카운터. 워커만 쓰고 소유자는 읽기만 한다.
#[derive(Debug, Default)]
pub struct SessionCounters {
    state: AtomicU8,
    accepted: AtomicU64,
    filtered: AtomicU64,
    malformed: AtomicU64,
    warnings: AtomicU64,
    // flush 시점마다 갱신되는 grand total 사본
    live_totals: Mutex<AggregationTable>,
}

impl SessionCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn add_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn publish_totals(&self, table: &AggregationTable) {
        if let Ok(mut guard) = self.live_totals.lock() {
            guard.clone_from(table);
        }
    }

    pub fn live_totals(&self) -> AggregationTable {
        self.live_totals
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            accepted: self.accepted(),
            filtered: self.filtered(),
            malformed: self.malformed(),
            warnings: self.warnings(),
        }
    }
}

/// 실행 중에도 읽을 수 있는 가벼운 상태 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub accepted: u64,
    pub filtered: u64,
    pub malformed: u64,
    pub warnings: u64,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] accepted: {}, filtered: {}, malformed: {}, warnings: {}",
            self.state, self.accepted, self.filtered, self.malformed, self.warnings
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_state() {
        let counters = SessionCounters::new();
        assert_eq!(counters.state(), SessionState::Created);
        counters.set_state(SessionState::Running);
        counters.add_accepted();
        counters.add_accepted();
        counters.add_filtered();
        let status = counters.status();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.accepted, 2);
        assert_eq!(status.filtered, 1);
        assert_eq!(
            status.to_string(),
            "[running] accepted: 2, filtered: 1, malformed: 0, warnings: 0"
        );
    }

    #[test]
    fn test_live_totals_snapshot() {
        let counters = SessionCounters::new();
        let mut table = AggregationTable::new();
        table.increment("sda", "read_0", 8);
        counters.publish_totals(&table);
        table.increment("sda", "read_0", 8);
        // 사본이므로 이후 변경은 보이지 않는다
        assert_eq!(counters.live_totals().total(), 1);
    }
}
