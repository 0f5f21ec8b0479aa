use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::models::Opcode;
use crate::utils::constants::{DISK_NAME_LEN, NANOSECONDS, TASK_COMM_LEN};

/// 완료된 I/O 한 건. 소스가 만든 뒤에는 변경하지 않는다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64, // seconds
    pub task_id: String,
    pub device: String,
    pub opcode: Opcode,
    pub command_detail: u32, // NVMe stream / block cmnd
    pub start_block: u64,
    pub length: u64,  // sectors
    pub latency: f64, // seconds
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub secondary_code: Option<u32>, // ata_cmd
}

impl Event {
    pub fn new(timestamp: f64, device: &str, opcode: Opcode, length: u64) -> Self {
        Self {
            timestamp,
            task_id: String::new(),
            device: device.to_string(),
            opcode,
            command_detail: 0,
            start_block: 0,
            length,
            latency: 0.0,
            major: None,
            minor: None,
            secondary_code: None,
        }
    }
}

/// 커널 프로브가 내보내는 고정 레이아웃 레코드
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub timestamp_ns: u64,
    pub task: [u8; TASK_COMM_LEN],
    pub disk: [u8; DISK_NAME_LEN],
    pub opcode: u16,
    pub command_detail: u32,
    pub start_block: u64,
    pub length: u64,
    pub latency_ns: i64,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub secondary_code: Option<u8>,
}

impl RawEvent {
    pub fn new(timestamp_ns: u64, task: &str, disk: &str, opcode: u16) -> Self {
        Self {
            timestamp_ns,
            task: pad_name(task),
            disk: pad_name(disk),
            opcode,
            command_detail: 0,
            start_block: 0,
            length: 0,
            latency_ns: 0,
            major: None,
            minor: None,
            secondary_code: None,
        }
    }
}

// 테스트/어댑터용: 문자열을 NUL 패딩된 고정 길이 배열로
pub fn pad_name<const N: usize>(name: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = name.as_bytes();
    let len = bytes.len().min(N);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

fn decode_name(field: &'static str, raw: &[u8]) -> Result<String, DecodeError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(|s| s.to_string())
        .map_err(|e| DecodeError::new(field, format!("not valid UTF-8: {e}")))
}

/// RawEvent -> Event 변환기.
///
/// 첫 이벤트의 커널 타임스탬프를 디코더 생성 시점의 wall clock에 맞춘다.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    wall_start: f64,
    first_ns: Option<u64>,
}

impl EventDecoder {
    pub fn new() -> Self {
        let wall_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::with_wall_start(wall_start)
    }

    pub fn with_wall_start(wall_start: f64) -> Self {
        Self {
            wall_start,
            first_ns: None,
        }
    }

    pub fn decode(&mut self, raw: &RawEvent) -> Result<Event, DecodeError> {
        let device = decode_name("device", &raw.disk)?;
        if device.is_empty() {
            return Err(DecodeError::new("device", "empty device name"));
        }
        let task_id = decode_name("task", &raw.task)?;

        let first_ns = *self.first_ns.get_or_insert(raw.timestamp_ns);
        // 첫 이벤트보다 이른 타임스탬프는 음수 오프셋으로 그대로 둔다
        let offset_ns = raw.timestamp_ns as i128 - first_ns as i128;
        let timestamp = self.wall_start + offset_ns as f64 / NANOSECONDS;

        Ok(Event {
            timestamp,
            task_id,
            device,
            opcode: Opcode(raw.opcode),
            command_detail: raw.command_detail,
            start_block: raw.start_block,
            length: raw.length,
            latency: raw.latency_ns as f64 / NANOSECONDS,
            major: raw.major.map(u32::from),
            minor: raw.minor.map(u32::from),
            secondary_code: raw.secondary_code.map(u32::from),
        })
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_anchors_to_wall_clock() {
        let mut decoder = EventDecoder::with_wall_start(1000.0);
        let mut raw = RawEvent::new(5_000_000_000, "fio", "nvme0n1", 1);
        raw.length = 8;
        raw.latency_ns = 250_000;

        let first = decoder.decode(&raw).unwrap();
        assert_eq!(first.timestamp, 1000.0);
        assert_eq!(first.device, "nvme0n1");
        assert_eq!(first.task_id, "fio");
        assert_eq!(first.opcode, Opcode::WRITE);
        assert!((first.latency - 0.00025).abs() < 1e-12);

        raw.timestamp_ns = 6_500_000_000;
        let second = decoder.decode(&raw).unwrap();
        assert!((second.timestamp - 1001.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_bad_names() {
        let mut decoder = EventDecoder::with_wall_start(0.0);
        let raw = RawEvent::new(1, "fio", "", 0);
        assert_eq!(decoder.decode(&raw).unwrap_err().field, "device");

        let mut raw = RawEvent::new(1, "fio", "sda", 0);
        raw.task[0] = 0xff;
        assert_eq!(decoder.decode(&raw).unwrap_err().field, "task");
    }

    #[test]
    fn test_event_json_keeps_admin_opcode() {
        let mut event = Event::new(2.5, "nvme0n1", Opcode(0x106), 0);
        event.major = Some(259);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""opcode":262"#));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(back.opcode.is_admin());
    }
}
