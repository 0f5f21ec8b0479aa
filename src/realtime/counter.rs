use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};

use crate::config::{CaptureConfig, Verbosity};
use crate::error::{CaptureError, DecodeError, Result};
use crate::output::PendingWriter;
use crate::processors::diff::{parse_counter_dump, CounterSnapshot, DiffCounters, WearReport, HOST_WRITES, WEAR_KEYS};
use crate::realtime::monitor::SessionCounters;
use crate::realtime::session::{CaptureWorker, Flow};
use crate::utils::IntervalGate;
use crate::{log, log_warn};

pub const WAI_HEADER: [&str; 9] = [
    "timestamp",
    "cum_host_writes",
    "cum_nand_written",
    "cum_nand_erased",
    "host_writes",
    "nand_written",
    "nand_erased",
    "waf",
    "wai",
];

/// 권한 상승 방법. 전역 상태 없이 probe 생성 시 넘긴다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Elevation {
    #[default]
    None,
    /// `sudo -S`. 비밀번호가 있으면 stdin으로 넘긴다.
    Sudo { password: Option<String> },
}

/// 절대값 카운터 덤프를 읽어 오는 쪽
pub trait CounterProbe: Send + 'static {
    fn read(&mut self) -> Result<CounterSnapshot>;

    fn describe(&self) -> String;
}

/// 외부 명령을 실행해서 stdout의 key=value 덤프를 읽는다
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
    elevation: Elevation,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>, elevation: Elevation) -> Self {
        Self {
            program: program.into(),
            args,
            elevation,
        }
    }

    /// 공백으로 나뉜 명령줄 하나에서 생성
    pub fn from_command_line(command_line: &str, elevation: Elevation) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| CaptureError::config("empty counter command"))?;
        Ok(Self::new(program, parts.collect(), elevation))
    }

    fn command(&self) -> Command {
        match &self.elevation {
            Elevation::None => {
                let mut command = Command::new(&self.program);
                command.args(&self.args);
                command
            }
            Elevation::Sudo { .. } => {
                let mut command = Command::new("sudo");
                command.arg("-S").arg(&self.program).args(&self.args);
                command
            }
        }
    }
}

impl CounterProbe for CommandProbe {
    fn read(&mut self) -> Result<CounterSnapshot> {
        let program = PathBuf::from(&self.program);
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::io("running", &program, e))?;

        if let (Elevation::Sudo { password: Some(password) }, Some(mut stdin)) =
            (&self.elevation, child.stdin.take())
        {
            writeln!(stdin, "{password}").map_err(|e| CaptureError::io("writing password to", &program, e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| CaptureError::io("waiting for", &program, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::io(
                "running",
                &program,
                std::io::Error::other(format!("{}: {}", output.status, stderr.trim())),
            ));
        }
        snapshot_from(&String::from_utf8_lossy(&output.stdout))
    }

    fn describe(&self) -> String {
        let elevated = match self.elevation {
            Elevation::None => "",
            Elevation::Sudo { .. } => "sudo ",
        };
        format!("{elevated}{} {}", self.program, self.args.join(" "))
    }
}

/// 이미 덤프된 파일을 읽는다
pub struct FileProbe {
    path: PathBuf,
}

impl FileProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CounterProbe for FileProbe {
    fn read(&mut self) -> Result<CounterSnapshot> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| CaptureError::io("reading counters", &self.path, e))?;
        snapshot_from(&text)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// host_writes가 없는 덤프는 쓸 수 없다
fn snapshot_from(text: &str) -> Result<CounterSnapshot> {
    let snapshot = parse_counter_dump(text);
    if !snapshot.contains_key(HOST_WRITES) {
        return Err(DecodeError::new(HOST_WRITES, "missing from counter dump").into());
    }
    Ok(snapshot)
}

/// `{base}-{date}_{n}-wai.csv` 중 아직 없는 이름
pub fn counter_path(dir: &Path, base: &str, date: NaiveDate) -> PathBuf {
    let mut ext_no = 0;
    loop {
        let path = dir.join(format!("{base}-{}_{ext_no}-wai.csv", date.format("%Y%m%d")));
        if !path.exists() {
            return path;
        }
        ext_no += 1;
    }
}

/// 주기적으로 카운터를 읽어 WAF/WAI 변화를 기록하는 워커
pub struct CounterCapture<P: CounterProbe> {
    probe: P,
    interval: Duration,
    poll_timeout: Duration,
    verbosity: Verbosity,
    gate: IntervalGate,
    writer: Option<csv::Writer<PendingWriter<File>>>,
    path: Option<PathBuf>,
    start: Option<CounterSnapshot>,
    previous: Option<CounterSnapshot>,
    next_due: Instant,
    rows: u64,
    counters: Arc<SessionCounters>,
    fatal_error: Option<String>,
}

impl<P: CounterProbe> CounterCapture<P> {
    pub fn new(config: &CaptureConfig, probe: P) -> Result<Self> {
        config.validate()?;
        let interval = Duration::try_from_secs_f64(config.counter_interval_secs)
            .map_err(|e| CaptureError::config(format!("counter interval: {e}")))?;

        let (writer, path) = if config.verbosity.file {
            std::fs::create_dir_all(&config.output_dir)
                .map_err(|e| CaptureError::io("creating", &config.output_dir, e))?;
            let path = counter_path(&config.output_dir, config.base_name(), Local::now().date_naive());
            let file = File::create(&path).map_err(|e| CaptureError::io("opening counters", &path, e))?;
            let mut writer = csv::Writer::from_writer(PendingWriter::new(file));
            writer
                .write_record(WAI_HEADER)
                .map_err(|e| CaptureError::io("writing counters", &path, e.into()))?;
            log!("Writing counters to {}", path.display());
            (Some(writer), Some(path))
        } else {
            (None, None)
        };

        Ok(Self {
            probe,
            interval,
            poll_timeout: config.poll_timeout(),
            verbosity: config.verbosity,
            gate: IntervalGate::from_secs(config.effective_echo_interval())?,
            writer,
            path,
            start: None,
            previous: None,
            next_due: Instant::now() + interval,
            rows: 0,
            counters: SessionCounters::new(),
            fatal_error: None,
        })
    }

    /// 한 번 읽고 이전 값과 비교. host_writes가 늘었거나 `force`이면 한 행을 기록한다.
    fn sample(&mut self, force: bool) -> Result<()> {
        let current = match self.probe.read() {
            Ok(snapshot) => snapshot,
            // 기준값이 없으면 이후 행을 계산할 수 없다
            Err(e) if self.start.is_none() => return Err(e),
            Err(e) => {
                self.counters.add_malformed();
                log_warn!("counter read failed ({}): {e}", self.probe.describe());
                return Ok(());
            }
        };
        self.counters.add_accepted();

        let Some(start) = self.start.clone() else {
            log!("Initial counters: {}", format_snapshot(&current));
            self.start = Some(current.clone());
            self.previous = Some(current);
            return Ok(());
        };
        let previous = self.previous.clone().unwrap_or_else(|| start.clone());

        let interval = DiffCounters::between(&previous, &current, &WEAR_KEYS);
        if interval.get(HOST_WRITES) < 0 {
            self.counters.add_warning();
            log_warn!("host_writes went backwards: {}", interval.get(HOST_WRITES));
        }
        if interval.get(HOST_WRITES) > 0 || force {
            let cumulative = DiffCounters::between(&start, &current, &WEAR_KEYS);
            self.write_row(&cumulative.wear(), &interval.wear())?;
        }
        self.previous = Some(current);
        Ok(())
    }

    fn write_row(&mut self, cumulative: &WearReport, interval: &WearReport) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let row = [
            timestamp,
            cumulative.host_writes.to_string(),
            cumulative.nand_written.to_string(),
            cumulative.nand_erased.to_string(),
            interval.host_writes.to_string(),
            interval.nand_written.to_string(),
            interval.nand_erased.to_string(),
            format!("{:.2}", interval.waf),
            format!("{:.2}", interval.wai),
        ];

        if self.verbosity.console && self.gate.ready(now_secs()) {
            log!("{}", row.join(", "));
        }

        if let (Some(writer), Some(path)) = (self.writer.as_mut(), self.path.as_ref()) {
            // 행은 버퍼에 한 번만 넣고, 재시도는 남은 바이트만 내보낸다
            writer
                .write_record(&row)
                .map_err(|e| CaptureError::io("encoding counters", path, e.into()))?;
            if let Err(first) = writer.flush() {
                log_warn!("counter write failed, retrying once: {first}");
                writer
                    .flush()
                    .map_err(|e| CaptureError::io("writing counters", path, e))?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl<P: CounterProbe> CaptureWorker for CounterCapture<P> {
    type Summary = CounterSummary;

    fn name(&self) -> &str {
        "counters"
    }

    fn begin(&mut self) -> Result<()> {
        let result = self.sample(false);
        if let Err(e) = &result {
            self.fatal_error = Some(e.to_string());
        }
        result
    }

    fn work(&mut self) -> Result<Flow> {
        let now = Instant::now();
        if now < self.next_due {
            thread::sleep((self.next_due - now).min(self.poll_timeout));
            return Ok(Flow::Continue);
        }
        self.next_due += self.interval;
        if let Err(e) = self.sample(false) {
            self.fatal_error = Some(e.to_string());
            return Err(e);
        }
        Ok(Flow::Continue)
    }

    fn finish(&mut self) -> Result<()> {
        // 첫 읽기가 실패했다면 마지막 행을 만들 기준이 없다
        if self.start.is_some() {
            self.sample(true)?;
        }
        if let (Some(writer), Some(path)) = (self.writer.as_mut(), self.path.as_ref()) {
            if let Err(first) = writer.flush() {
                log_warn!("counter flush failed, retrying once: {first}");
                writer
                    .flush()
                    .map_err(|e| CaptureError::io("closing counters", path, e))?;
            }
        }
        self.writer = None;
        Ok(())
    }

    fn summary(&self) -> CounterSummary {
        let start = self.start.clone().unwrap_or_default();
        let end = self.previous.clone().unwrap_or_default();
        let deltas = DiffCounters::all(&start, &end);
        CounterSummary {
            wear: DiffCounters::between(&start, &end, &WEAR_KEYS).wear(),
            start,
            end,
            deltas,
            readings: self.counters.accepted(),
            failed_reads: self.counters.malformed(),
            rows: self.rows,
            path: self.path.clone(),
            fatal_error: self.fatal_error.clone(),
        }
    }

    fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }
}

#[derive(Debug, Clone)]
pub struct CounterSummary {
    pub start: CounterSnapshot,
    pub end: CounterSnapshot,
    pub deltas: DiffCounters,
    pub wear: WearReport,
    pub readings: u64,
    pub failed_reads: u64,
    pub rows: u64,
    pub path: Option<PathBuf>,
    pub fatal_error: Option<String>,
}

impl CounterSummary {
    pub fn print(&self) {
        log!("===== Wear counter summary =====");
        log!("Start: {}", format_snapshot(&self.start));
        log!("End  : {}", format_snapshot(&self.end));
        for (key, delta) in &self.deltas.deltas {
            log!("  {key:<24} {delta:+}");
        }
        self.wear.print();
        log!("Readings: {} (failed {}), rows: {}", self.readings, self.failed_reads, self.rows);
        if let Some(error) = &self.fatal_error {
            log!("Stopped by error: {error}");
        }
    }
}

fn format_snapshot(snapshot: &CounterSnapshot) -> String {
    WEAR_KEYS
        .iter()
        .map(|key| format!("{key}={}", snapshot.get(*key).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn now_secs() -> f64 {
    Local::now().timestamp_millis() as f64 / 1000.0
}
