use std::io::Write;
use std::path::{Path, PathBuf};

use csv::Writer;

use crate::models::{CaptureKind, Event};
use crate::output::pending::PendingWriter;
use crate::utils::constants::WORKLOAD_DRAIN_BYTES;

/// workload CSV 한 행의 필드
pub fn event_record(kind: CaptureKind, event: &Event) -> Vec<String> {
    let mut record = vec![
        format!("{:.6}", event.timestamp),
        event.task_id.clone(),
        event.device.clone(),
        event.opcode.to_string(),
        event.command_detail.to_string(),
        event.start_block.to_string(),
        event.length.to_string(),
        format!("{:.9}", event.latency),
    ];
    if kind.has_device_numbers() {
        record.push(optional(event.major));
        record.push(optional(event.minor));
        record.push(optional(event.secondary_code));
    }
    record
}

fn optional(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// 이벤트당 한 행을 쓰는 workload CSV writer.
///
/// 문자열 필드는 구분자 등을 포함할 때만 따옴표로 감싼다 (csv 기본 QuoteStyle::Necessary).
/// 행은 `PendingWriter`에 쌓이고 `WORKLOAD_DRAIN_BYTES`가 넘으면 inner로 내보낸다.
/// 내보내기가 실패해도 행은 이미 버퍼에 있으므로 재시도는 `flush`만 다시 부른다.
pub struct WorkloadWriter<W: Write> {
    kind: CaptureKind,
    path: PathBuf,
    writer: Writer<PendingWriter<W>>,
    rows: u64,
}

impl<W: Write> WorkloadWriter<W> {
    pub fn from_writer(inner: W, path: PathBuf, kind: CaptureKind) -> csv::Result<Self> {
        let mut writer = Writer::from_writer(PendingWriter::new(inner));
        writer.write_record(kind.workload_header())?;
        Ok(Self {
            kind,
            path,
            writer,
            rows: 0,
        })
    }

    /// 한 행을 버퍼에 넣는다. 오류가 IO 오류면 행은 이미 들어가 있고 내보내기만 실패한 것이다.
    pub fn write_event(&mut self, event: &Event) -> csv::Result<()> {
        self.writer.write_record(event_record(self.kind, event))?;
        self.rows += 1;
        if self.writer.get_ref().pending_len() >= WORKLOAD_DRAIN_BYTES {
            self.writer.flush()?;
        }
        Ok(())
    }

    /// 버퍼에 남은 바이트를 내보낸다. 실패 후 다시 불러도 같은 행이 두 번 나가지 않는다.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(self) -> Result<W, std::io::Error> {
        self.writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Opcode;
    use crate::output::pending::tests::FlakyWriter;

    #[test]
    fn test_block_rows_and_quoting() {
        let mut writer =
            WorkloadWriter::from_writer(Vec::new(), PathBuf::from("mem"), CaptureKind::Block).unwrap();
        let mut event = Event::new(1.5, "sda", Opcode::READ, 8);
        event.task_id = "kworker,1".to_string();
        event.major = Some(8);
        event.minor = Some(0);
        writer.write_event(&event).unwrap();
        assert_eq!(writer.rows(), 1);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,task,device,opcode,stream_or_class,start_block,length,latency,major,minor,secondary_code"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1.500000,\"kworker,1\",sda,read,0,0,8,0.000000000,8,0,"
        );
    }

    fn fields_per_row(bytes: &[u8]) -> Vec<usize> {
        let mut reader = csv::Reader::from_reader(bytes);
        reader.records().map(|r| r.unwrap().len()).collect()
    }

    #[test]
    fn test_failed_drain_is_resumed_not_rewritten() {
        // 첫 write는 1KB만 나가고 두 번째 write가 실패한다
        let inner = FlakyWriter::new(1024, 1, 1);
        let mut writer =
            WorkloadWriter::from_writer(inner, PathBuf::from("mem"), CaptureKind::Nvme).unwrap();

        let mut large = Event::new(1.0, "nvme0n1", Opcode::WRITE, 8);
        large.task_id = "t".repeat(2 * WORKLOAD_DRAIN_BYTES);
        let err = writer.write_event(&large).unwrap_err();
        assert!(err.is_io_error());
        assert_eq!(writer.rows(), 1);

        writer.flush().unwrap();
        writer.write_event(&Event::new(2.0, "nvme0n1", Opcode::READ, 8)).unwrap();
        assert_eq!(writer.rows(), 2);

        let out = writer.into_inner().unwrap().out;
        assert_eq!(fields_per_row(&out), vec![8, 8]);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("1.000000,").count(), 1);
        assert!(text.ends_with("2.000000,,nvme0n1,read,0,0,8,0.000000000\n"));
    }
}
