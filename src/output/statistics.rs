use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::output::pending::PendingWriter;
use crate::processors::AggregationTable;

/// statistics 파일에 기록되는 레코드 한 건
#[derive(Debug, Clone, Copy)]
pub enum StatisticsRecord<'a> {
    /// 한 epoch 분량. epoch_end는 epoch 안에서 마지막으로 본 타임스탬프.
    Interval {
        epoch_end: f64,
        table: &'a AggregationTable,
    },
    /// 세션 누적 합계 (close / rotate 시점)
    Total { table: &'a AggregationTable },
}

impl StatisticsRecord<'_> {
    pub fn key(&self) -> String {
        match self {
            StatisticsRecord::Interval { epoch_end, .. } => format!("{epoch_end:.6}"),
            StatisticsRecord::Total { .. } => "total".to_string(),
        }
    }

    /// `{"<epoch_end>": {device: {op: {size: count}}}}` 형태의 JSON 한 줄
    pub fn to_json_line(&self) -> io::Result<String> {
        let table = match self {
            StatisticsRecord::Interval { table, .. } | StatisticsRecord::Total { table } => table,
        };
        let mut record = Map::new();
        record.insert(self.key(), serde_json::to_value(table)?);
        Ok(Value::Object(record).to_string())
    }
}

/// 집계 결과를 받는 쪽. 파일이 기본이고 테스트에서는 메모리 구현을 쓴다.
///
/// `write_record`가 IO 오류를 내면 레코드는 sink 안에 남아 있어야 하고,
/// `retry_pending`은 그 남은 부분만 다시 내보낸다. 같은 레코드를 두 번 넘기지 않는다.
pub trait StatisticsSink: Send {
    fn write_record(&mut self, record: &StatisticsRecord<'_>) -> io::Result<()>;

    fn retry_pending(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    fn path(&self) -> Option<&Path> {
        None
    }
}

/// JSON Lines 형식의 statistics 파일
pub struct StatisticsFile<W: Write = File> {
    path: PathBuf,
    writer: Option<PendingWriter<W>>,
}

impl StatisticsFile<File> {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self::from_writer(file, path))
    }
}

impl<W: Write> StatisticsFile<W> {
    pub fn from_writer(inner: W, path: PathBuf) -> Self {
        Self {
            path,
            writer: Some(PendingWriter::new(inner)),
        }
    }

    fn writer(&mut self) -> io::Result<&mut PendingWriter<W>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("statistics file already closed"))
    }

    /// 닫은 뒤 inner를 돌려준다
    pub fn into_inner(mut self) -> io::Result<Option<W>> {
        self.writer.take().map(PendingWriter::into_inner).transpose()
    }
}

impl<W: Write + Send> StatisticsSink for StatisticsFile<W> {
    fn write_record(&mut self, record: &StatisticsRecord<'_>) -> io::Result<()> {
        let line = record.to_json_line()?;
        let writer = self.writer()?;
        writeln!(writer, "{line}")?;
        // 한 epoch 단위로 내보낸다
        writer.flush()
    }

    fn retry_pending(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                self.writer = Some(writer);
                return Err(e);
            }
        }
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// 메모리에 JSON 라인을 쌓는 sink. clone은 같은 버퍼를 공유한다.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatistics {
    lines: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemoryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

impl StatisticsSink for MemoryStatistics {
    fn write_record(&mut self, record: &StatisticsRecord<'_>) -> io::Result<()> {
        let line = record.to_json_line()?;
        self.lines
            .lock()
            .map_err(|_| io::Error::other("statistics buffer poisoned"))?
            .push(line);
        Ok(())
    }

    // write_record는 전부 넣거나 아무것도 넣지 않는다
    fn retry_pending(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::pending::tests::FlakyWriter;

    #[test]
    fn test_record_encoding() {
        let mut table = AggregationTable::new();
        table.increment("nvme0n1", "write", 8);
        table.increment("nvme0n1", "write", 8);

        let interval = StatisticsRecord::Interval {
            epoch_end: 12.5,
            table: &table,
        };
        assert_eq!(
            interval.to_json_line().unwrap(),
            r#"{"12.500000":{"nvme0n1":{"write":{"8":2}}}}"#
        );

        let total = StatisticsRecord::Total { table: &table };
        assert!(total.to_json_line().unwrap().starts_with(r#"{"total":"#));
    }

    #[test]
    fn test_statistics_file_close_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x-statistics.jsonl");
        let mut file = StatisticsFile::create(&path).unwrap();
        let table = AggregationTable::new();
        file.write_record(&StatisticsRecord::Total { table: &table }).unwrap();
        file.close().unwrap();
        assert!(file.write_record(&StatisticsRecord::Total { table: &table }).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"total\":{}}\n");
    }

    #[test]
    fn test_retry_does_not_duplicate_record() {
        // 첫 write는 10바이트만 나가고 다음 write가 실패한다
        let mut file = StatisticsFile::from_writer(FlakyWriter::new(10, 1, 1), PathBuf::from("mem"));
        let mut table = AggregationTable::new();
        table.increment("nvme0n1", "write", 8);
        let interval = StatisticsRecord::Interval {
            epoch_end: 1.0,
            table: &table,
        };

        assert!(file.write_record(&interval).is_err());
        file.retry_pending().unwrap();
        file.write_record(&StatisticsRecord::Total { table: &table }).unwrap();

        let out = file.into_inner().unwrap().unwrap().out;
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            concat!(
                r#"{"1.000000":{"nvme0n1":{"write":{"8":1}}}}"#,
                "\n",
                r#"{"total":{"nvme0n1":{"write":{"8":1}}}}"#,
                "\n"
            )
        );
    }
}
