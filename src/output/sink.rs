use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{CaptureError, Result};
use crate::log_warn;
use crate::models::{CaptureKind, Event};
use crate::output::csv::WorkloadWriter;
use crate::output::statistics::StatisticsFile;

/// 한 번의 rotation이 만드는 파일 쌍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub date: NaiveDate,
    pub ext_no: u32,
    pub workload: PathBuf,
    pub statistics: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, base: &str, date: NaiveDate, ext_no: u32) -> Self {
        let stem = format!("{base}-{}_{ext_no}", date.format("%Y%m%d"));
        Self {
            date,
            ext_no,
            workload: dir.join(format!("{stem}-workload.csv")),
            statistics: dir.join(format!("{stem}-statistics.jsonl")),
        }
    }

    fn exists(&self) -> bool {
        self.workload.exists() || self.statistics.exists()
    }

    /// `ext_no`부터 올려 가며 아직 없는 이름을 찾는다 (같은 날 이전 실행 파일 보호)
    pub fn probe(dir: &Path, base: &str, date: NaiveDate, start_ext_no: u32) -> Self {
        let mut ext_no = start_ext_no;
        loop {
            let paths = Self::new(dir, base, date, ext_no);
            if !paths.exists() {
                return paths;
            }
            ext_no += 1;
        }
    }
}

/// workload 파일을 여는 함수. 기본은 `File::create`.
pub type WorkloadOpener = Box<dyn FnMut(&Path) -> io::Result<Box<dyn Write + Send>> + Send>;

fn create_file(path: &Path) -> io::Result<Box<dyn Write + Send>> {
    Ok(Box::new(File::create(path)?))
}

/// workload CSV + statistics 파일 쌍과 rotation 정책.
///
/// statistics 파일은 열기만 하고 집계기에 넘긴다. 집계기가 그 파일을 닫는다.
pub struct OutputSink {
    dir: PathBuf,
    base: String,
    kind: CaptureKind,
    rotate_rows: u64,
    current: OutputPaths,
    open_workload: WorkloadOpener,
    workload: Option<WorkloadWriter<Box<dyn Write + Send>>>,
    produced: Vec<OutputPaths>,
}

impl OutputSink {
    pub fn open(
        dir: impl Into<PathBuf>,
        base: &str,
        kind: CaptureKind,
        rotate_rows: u64,
        today: NaiveDate,
    ) -> Result<(Self, StatisticsFile)> {
        Self::open_with(dir, base, kind, rotate_rows, today, Box::new(create_file))
    }

    /// workload 파일을 `open_workload`로 연다. statistics 파일은 항상 일반 파일이다.
    pub fn open_with(
        dir: impl Into<PathBuf>,
        base: &str,
        kind: CaptureKind,
        rotate_rows: u64,
        today: NaiveDate,
        mut open_workload: WorkloadOpener,
    ) -> Result<(Self, StatisticsFile)> {
        let dir = dir.into();
        if rotate_rows == 0 {
            return Err(CaptureError::config("rotation row threshold must be > 0"));
        }
        std::fs::create_dir_all(&dir).map_err(|e| CaptureError::io("creating", &dir, e))?;

        let paths = OutputPaths::probe(&dir, base, today, 0);
        let (workload, statistics) = open_pair(&paths, kind, &mut open_workload)?;
        let sink = Self {
            dir,
            base: base.to_string(),
            kind,
            rotate_rows,
            current: paths.clone(),
            open_workload,
            workload: Some(workload),
            produced: vec![paths],
        };
        Ok((sink, statistics))
    }

    /// 한 행 기록. 내보내기가 실패하면 남은 바이트만 한 번 더 보내고 그래도 실패하면 IoError.
    pub fn write_event(&mut self, event: &Event) -> Result<()> {
        let writer = self
            .workload
            .as_mut()
            .ok_or(CaptureError::SessionClosed("OutputSink::write_event"))?;
        match writer.write_event(event) {
            Ok(()) => Ok(()),
            // 행이 버퍼에 들어가지 못한 경우. 다시 써도 같은 결과다.
            Err(e) if !e.is_io_error() => {
                Err(CaptureError::io("encoding workload", writer.path(), e.into()))
            }
            Err(first) => {
                log_warn!("workload write failed, retrying once: {first}");
                writer
                    .flush()
                    .map_err(|e| CaptureError::io("writing workload", writer.path(), e))
            }
        }
    }

    pub fn should_rotate(&self, today: NaiveDate) -> bool {
        today != self.current.date || self.rows() >= self.rotate_rows
    }

    /// 현재 workload 파일을 닫고 다음 파일 쌍을 연다. 새 statistics 파일을 돌려준다.
    ///
    /// 날짜가 바뀌었으면 ext_no를 0부터, 같은 날이면 다음 번호부터 찾는다.
    pub fn rotate(&mut self, today: NaiveDate) -> Result<StatisticsFile> {
        self.close_workload()?;

        let start_ext_no = if today != self.current.date {
            0
        } else {
            self.current.ext_no + 1
        };
        let paths = OutputPaths::probe(&self.dir, &self.base, today, start_ext_no);
        let (workload, statistics) = open_pair(&paths, self.kind, &mut self.open_workload)?;
        self.workload = Some(workload);
        self.current = paths.clone();
        self.produced.push(paths);
        Ok(statistics)
    }

    pub fn close(&mut self) -> Result<()> {
        self.close_workload()
    }

    // 닫기도 쓰기와 같이 한 번 재시도한다
    fn close_workload(&mut self) -> Result<()> {
        if let Some(mut writer) = self.workload.take() {
            if let Err(first) = writer.flush() {
                log_warn!("workload flush failed, retrying once: {first}");
                writer
                    .flush()
                    .map_err(|e| CaptureError::io("closing workload", writer.path(), e))?;
            }
        }
        Ok(())
    }

    /// 현재 파일에 쓴 행 수 (rotation 이후 0부터)
    pub fn rows(&self) -> u64 {
        self.workload.as_ref().map(|w| w.rows()).unwrap_or(0)
    }

    pub fn current(&self) -> &OutputPaths {
        &self.current
    }

    /// 이 세션이 연 모든 파일 쌍
    pub fn produced(&self) -> &[OutputPaths] {
        &self.produced
    }

    pub fn is_closed(&self) -> bool {
        self.workload.is_none()
    }
}

fn open_pair(
    paths: &OutputPaths,
    kind: CaptureKind,
    open_workload: &mut WorkloadOpener,
) -> Result<(WorkloadWriter<Box<dyn Write + Send>>, StatisticsFile)> {
    let inner = open_workload(&paths.workload)
        .map_err(|e| CaptureError::io("opening workload", &paths.workload, e))?;
    let workload = WorkloadWriter::from_writer(inner, paths.workload.clone(), kind)
        .map_err(|e| CaptureError::io("opening workload", &paths.workload, e.into()))?;
    let statistics = StatisticsFile::create(&paths.statistics)
        .map_err(|e| CaptureError::io("opening statistics", &paths.statistics, e))?;
    Ok((workload, statistics))
}
