use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{Reader, StringRecord, StringRecordsIntoIter};

use crate::error::{CaptureError, DecodeError, Result};
use crate::models::{Event, Opcode};

/// 헤더 이름 -> 컬럼 위치
#[derive(Debug, Clone)]
pub struct WorkloadColumns {
    index: HashMap<String, usize>,
}

impl WorkloadColumns {
    pub fn from_header(header: &StringRecord) -> Result<Self> {
        let index: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_lowercase(), i))
            .collect();
        for required in ["timestamp", "device", "opcode", "length"] {
            if !index.contains_key(required) {
                return Err(CaptureError::config(format!(
                    "workload header is missing the '{required}' column"
                )));
            }
        }
        Ok(Self { index })
    }

    fn field<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 한 행 -> Event. 숫자 필드 파싱 실패는 DecodeError.
    pub fn decode(&self, record: &StringRecord) -> std::result::Result<Event, DecodeError> {
        let device = self
            .field(record, "device")
            .ok_or_else(|| DecodeError::new("device", "empty device name"))?;
        let opcode: Opcode = self
            .field(record, "opcode")
            .ok_or_else(|| DecodeError::new("opcode", "missing opcode"))?
            .parse()?;

        Ok(Event {
            timestamp: self.required(record, "timestamp")?,
            task_id: self.field(record, "task").unwrap_or_default().to_string(),
            device: device.to_string(),
            opcode,
            command_detail: self.optional(record, "stream_or_class")?.unwrap_or(0),
            start_block: self.optional(record, "start_block")?.unwrap_or(0),
            length: self.required(record, "length")?,
            latency: self.optional(record, "latency")?.unwrap_or(0.0),
            major: self.optional(record, "major")?,
            minor: self.optional(record, "minor")?,
            secondary_code: self.optional(record, "secondary_code")?,
        })
    }

    fn required<T: std::str::FromStr>(
        &self,
        record: &StringRecord,
        name: &'static str,
    ) -> std::result::Result<T, DecodeError> {
        self.optional(record, name)?
            .ok_or_else(|| DecodeError::new(name, "missing value"))
    }

    fn optional<T: std::str::FromStr>(
        &self,
        record: &StringRecord,
        name: &'static str,
    ) -> std::result::Result<Option<T>, DecodeError> {
        match self.field(record, name) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| DecodeError::new(name, format!("cannot parse '{raw}'"))),
            None => Ok(None),
        }
    }
}

/// 이전에 저장한 workload CSV를 다시 Event로 읽는다
pub struct WorkloadReader<R: Read = File> {
    path: PathBuf,
    columns: WorkloadColumns,
    records: StringRecordsIntoIter<R>,
}

impl WorkloadReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CaptureError::io("opening workload", path, e))?;
        Self::from_reader(file, path.to_path_buf())
    }
}

impl<R: Read> WorkloadReader<R> {
    pub fn from_reader(inner: R, path: PathBuf) -> Result<Self> {
        let mut reader = Reader::from_reader(inner);
        let header = reader
            .headers()
            .map_err(|e| CaptureError::io("reading workload header", &path, e.into()))?
            .clone();
        let columns = WorkloadColumns::from_header(&header)?;
        Ok(Self {
            path,
            columns,
            records: reader.into_records(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Read> Iterator for WorkloadReader<R> {
    type Item = std::result::Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(match record {
            Ok(record) => self.columns.decode(&record),
            Err(e) => Err(DecodeError::new("row", e.to_string())),
        })
    }
}

/// "ssd-20240101_0-workload.csv" -> "ssd-20240101_0-statistics.jsonl"
pub fn statistics_path_for(workload: &Path) -> PathBuf {
    let name = workload
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workload.csv");
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    let replaced = if stem.contains("workload") {
        stem.replacen("workload", "statistics", 1)
    } else {
        format!("{stem}-statistics")
    };
    workload.with_file_name(format!("{replaced}.jsonl"))
}
