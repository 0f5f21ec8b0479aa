use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Event;

// 캡처 종류. 이벤트 기반(Block, Nvme)과 주기적 카운터(Counter)로 나뉜다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Block,
    Nvme,
    Counter,
}

impl FromStr for CaptureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" | "ssd" => Ok(CaptureKind::Block),
            "nvme" => Ok(CaptureKind::Nvme),
            "counter" | "wai" => Ok(CaptureKind::Counter),
            _ => Err(format!("Unknown capture kind: {s}")),
        }
    }
}

impl CaptureKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            CaptureKind::Block => "Block I/O",
            CaptureKind::Nvme => "NVMe",
            CaptureKind::Counter => "Wear counters",
        }
    }

    // 출력 파일 기본 이름
    pub fn default_base_name(&self) -> &'static str {
        match self {
            CaptureKind::Block => "ssd",
            CaptureKind::Nvme => "nvme",
            CaptureKind::Counter => "wai",
        }
    }

    /// 집계 테이블의 operation 키
    pub fn operation_key(&self, event: &Event) -> String {
        match self {
            CaptureKind::Block => format!("{}_{}", event.opcode, event.command_detail),
            CaptureKind::Nvme | CaptureKind::Counter => event.opcode.to_string(),
        }
    }

    /// workload CSV에 major/minor/secondary 컬럼을 포함하는지
    pub fn has_device_numbers(&self) -> bool {
        matches!(self, CaptureKind::Block)
    }

    pub fn workload_header(&self) -> Vec<&'static str> {
        let mut header = vec![
            "timestamp",
            "task",
            "device",
            "opcode",
            "stream_or_class",
            "start_block",
            "length",
            "latency",
        ];
        if self.has_device_numbers() {
            header.extend(["major", "minor", "secondary_code"]);
        }
        header
    }

    /// 콘솔 에코 한 줄
    pub fn format_line(&self, index: u64, event: &Event) -> String {
        match self {
            CaptureKind::Block => format!(
                "{index:<8} {:>18.6} {:^16} {:>3}:{:<3} {:^10} {:^10} {:^7x} {:>14} {:>7} {:>14.3}",
                event.timestamp,
                event.task_id,
                event.major.unwrap_or(0),
                event.minor.unwrap_or(0),
                event.device,
                event.opcode.to_string(),
                event.command_detail,
                event.start_block,
                event.length,
                event.latency * 1_000_000.0,
            ),
            CaptureKind::Nvme | CaptureKind::Counter => format!(
                "{index:>8} {:<20.6} {:^16} {:^10} {:^16} {:^6} {:>14} {:>7} {:>16.6}",
                event.timestamp,
                event.task_id,
                event.device,
                event.opcode.to_string(),
                event.command_detail,
                event.start_block,
                event.length,
                event.latency,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Opcode;

    #[test]
    fn test_operation_key_per_kind() {
        let mut event = Event::new(0.0, "sda", Opcode::WRITE, 8);
        event.command_detail = 42;
        assert_eq!(CaptureKind::Block.operation_key(&event), "write_42");
        assert_eq!(CaptureKind::Nvme.operation_key(&event), "write");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("NVMe".parse::<CaptureKind>().unwrap(), CaptureKind::Nvme);
        assert_eq!("ssd".parse::<CaptureKind>().unwrap(), CaptureKind::Block);
        assert!("ufs".parse::<CaptureKind>().is_err());
        assert_eq!(CaptureKind::Block.workload_header().len(), 11);
        assert_eq!(CaptureKind::Nvme.workload_header().len(), 8);
    }
}
