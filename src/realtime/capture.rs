use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};

use crate::config::{CaptureConfig, Verbosity};
use crate::error::{CaptureError, Result};
use crate::models::{CaptureKind, Event};
use crate::output::{OutputPaths, OutputSink, StatisticsSink, WorkloadOpener};
use crate::processors::{AggregationTable, StreamStats, WorkloadAggregator};
use crate::realtime::monitor::SessionCounters;
use crate::realtime::session::{CaptureSession, CaptureWorker, Flow};
use crate::realtime::source::{EventSource, SourcePoll};
use crate::utils::constants::SECTOR_SIZE;
use crate::utils::{DeviceFilter, FixedCapacityHistory, IntervalGate};
use crate::{log, log_warn};

type Clock = Box<dyn FnMut() -> NaiveDate + Send>;

// 워커가 결과를 쓸 곳
enum Outputs {
    /// verbosity에 file이 있으면 workload/statistics 파일 쌍
    Files(Option<WorkloadOpener>),
    /// workload 없이 statistics sink만 (리플레이)
    Statistics(Box<dyn StatisticsSink>),
}

/// 블록/NVMe 이벤트 캡처 워커.
///
/// 이벤트 하나마다 filter -> aggregate -> history -> 파일 기록 -> 콘솔 에코 순서로 처리한다.
pub struct EventCapture<S: EventSource> {
    kind: CaptureKind,
    source: S,
    poll_timeout: Duration,
    verbosity: Verbosity,
    filter: DeviceFilter,
    history: Option<FixedCapacityHistory<Event>>,
    aggregator: WorkloadAggregator,
    sink: Option<OutputSink>,
    gate: IntervalGate,
    streams: StreamStats,
    latency_warn_secs: f64,
    counters: Arc<SessionCounters>,
    today: Clock,
    // 마지막 이벤트를 받은 시각과 그 타임스탬프. idle 중 이벤트 시간 추정에 쓴다.
    last_event_at: Option<(Instant, f64)>,
    fatal_error: Option<String>,
}

impl<S: EventSource> EventCapture<S> {
    /// 설정대로 워커를 만든다. verbosity에 file이 있으면 workload/statistics 파일 쌍을 연다.
    pub fn new(config: &CaptureConfig, source: S) -> Result<Self> {
        Self::build(config, source, Box::new(|| Local::now().date_naive()), Outputs::Files(None))
    }

    /// 날짜 함수를 지정한다 (rotation 테스트, 리플레이)
    pub fn with_clock(
        config: &CaptureConfig,
        source: S,
        today: impl FnMut() -> NaiveDate + Send + 'static,
    ) -> Result<Self> {
        Self::build(config, source, Box::new(today), Outputs::Files(None))
    }

    /// workload 파일을 주어진 함수로 연다. 나머지는 `new`와 같다.
    pub fn with_workload_opener(
        config: &CaptureConfig,
        source: S,
        open_workload: WorkloadOpener,
    ) -> Result<Self> {
        Self::build(
            config,
            source,
            Box::new(|| Local::now().date_naive()),
            Outputs::Files(Some(open_workload)),
        )
    }

    /// workload 파일 없이 주어진 statistics sink에만 기록한다 (리플레이)
    pub fn with_statistics(
        config: &CaptureConfig,
        source: S,
        statistics: Box<dyn StatisticsSink>,
    ) -> Result<Self> {
        Self::build(
            config,
            source,
            Box::new(|| Local::now().date_naive()),
            Outputs::Statistics(statistics),
        )
    }

    fn build(
        config: &CaptureConfig,
        source: S,
        mut today: Clock,
        outputs: Outputs,
    ) -> Result<Self> {
        config.validate()?;
        if config.kind == CaptureKind::Counter {
            return Err(CaptureError::config(
                "counter capture does not consume events, use CounterCapture",
            ));
        }

        let filter = config.device_filter()?;
        let echo_interval = config.effective_echo_interval();
        let max_wait = Duration::try_from_secs_f64(echo_interval * config.gate_max_wait_factor)
            .unwrap_or(Duration::MAX);
        let gate = IntervalGate::from_secs(echo_interval)?.with_max_wait(max_wait);
        let history = (config.history_capacity > 0)
            .then(|| FixedCapacityHistory::new(config.history_capacity));
        let mut aggregator = WorkloadAggregator::new(config.flush_interval_secs)?
            .with_echo(config.verbosity.statistics_echo);

        let mut sink = None;
        match outputs {
            Outputs::Statistics(statistics) => aggregator = aggregator.with_sink(statistics),
            Outputs::Files(opener) if config.verbosity.file => {
                let (dir, base) = (&config.output_dir, config.base_name());
                let (output, statistics) = match opener {
                    Some(opener) => {
                        OutputSink::open_with(dir, base, config.kind, config.rotate_rows, today(), opener)?
                    }
                    None => OutputSink::open(dir, base, config.kind, config.rotate_rows, today())?,
                };
                log!("Writing workload to {}", output.current().workload.display());
                aggregator = aggregator.with_sink(Box::new(statistics));
                sink = Some(output);
            }
            Outputs::Files(_) => {}
        }

        Ok(Self {
            kind: config.kind,
            source,
            poll_timeout: config.poll_timeout(),
            verbosity: config.verbosity,
            filter,
            history,
            aggregator,
            sink,
            gate,
            streams: StreamStats::new(),
            latency_warn_secs: config.latency_warn_secs,
            counters: SessionCounters::new(),
            today,
            last_event_at: None,
            fatal_error: None,
        })
    }

    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    /// 이벤트 한 건 처리. 오류는 모두 세션을 끝내는 오류다.
    pub fn on_event(&mut self, event: Event) -> Result<()> {
        if !self.filter.matches(&event.device) {
            self.counters.add_filtered();
            return Ok(());
        }

        // 이벤트를 집계하기 전에 rotation을 끝내야 statistics와 workload 파일 경계가 일치한다
        self.rotate_if_needed()?;

        let flushes = self.aggregator.flush_count();
        let operation = self.kind.operation_key(&event);
        self.aggregator
            .update(event.timestamp, &event.device, &operation, event.length)?;
        self.counters.add_accepted();
        if let Some(history) = self.history.as_mut() {
            history.append(event.clone());
        }
        if self.aggregator.flush_count() != flushes {
            self.counters.publish_totals(self.aggregator.grand_total());
        }

        if self.kind == CaptureKind::Nvme && event.opcode.is_write() {
            self.streams.add(event.command_detail, event.length);
        }

        self.persist(&event)?;

        if self.verbosity.console && self.gate.ready(event.timestamp) {
            log!("{}", self.kind.format_line(self.counters.accepted(), &event));
        }

        if event.latency < 0.0 || event.latency > self.latency_warn_secs {
            self.counters.add_warning();
            log_warn!(
                "suspicious latency {:.6}s on {} at {:.6}",
                event.latency,
                event.device,
                event.timestamp
            );
        }

        self.last_event_at = Some((Instant::now(), event.timestamp));
        Ok(())
    }

    // rotation은 다음 행을 쓰기 직전에 확인한다. 임계값에 딱 맞게 끝나면 빈 파일 쌍이 생기지 않는다.
    fn rotate_if_needed(&mut self) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let today = (self.today)();
        if sink.should_rotate(today) {
            let statistics = sink.rotate(today)?;
            self.aggregator.rotate_sink(Box::new(statistics))?;
            log!("Rotated output to {}", sink.current().workload.display());
        }
        Ok(())
    }

    fn persist(&mut self, event: &Event) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.write_event(event),
            None => Ok(()),
        }
    }

    /// 이벤트가 없을 때의 타이머 경로: 만료된 epoch flush, 날짜 변경 rotation
    pub fn on_idle(&mut self) -> Result<()> {
        if let Some((received, timestamp)) = self.last_event_at {
            let now = timestamp + received.elapsed().as_secs_f64();
            if self.aggregator.flush_if_due(now)? {
                self.counters.publish_totals(self.aggregator.grand_total());
            }
        }

        if let Some(sink) = self.sink.as_mut() {
            let today = (self.today)();
            if today != sink.current().date {
                let statistics = sink.rotate(today)?;
                self.aggregator.rotate_sink(Box::new(statistics))?;
                log!("Date changed, rotated output to {}", sink.current().workload.display());
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Flow> {
        match self.source.poll(self.poll_timeout) {
            SourcePoll::Event(event) => self.on_event(event)?,
            SourcePoll::Malformed(error) => {
                self.counters.add_malformed();
                log_warn!("dropping event: {error}");
            }
            SourcePoll::Idle => self.on_idle()?,
            SourcePoll::Exhausted => return Ok(Flow::Finished),
        }
        Ok(Flow::Continue)
    }

    /// history 스냅샷 (오래된 것부터)
    pub fn history(&self) -> Vec<Event> {
        self.history
            .as_ref()
            .map(FixedCapacityHistory::snapshot)
            .unwrap_or_default()
    }

    pub fn aggregator(&self) -> &WorkloadAggregator {
        &self.aggregator
    }

    pub fn output_files(&self) -> Vec<OutputPaths> {
        self.sink
            .as_ref()
            .map(|sink| sink.produced().to_vec())
            .unwrap_or_default()
    }
}

impl<S: EventSource> CaptureWorker for EventCapture<S> {
    type Summary = SessionSummary;

    fn name(&self) -> &str {
        self.kind.display_name()
    }

    fn work(&mut self) -> Result<Flow> {
        let result = self.step();
        if let Err(e) = &result {
            self.fatal_error = Some(e.to_string());
        }
        result
    }

    fn finish(&mut self) -> Result<()> {
        let closed = self.aggregator.close();
        let sink_closed = match self.sink.as_mut() {
            Some(sink) => sink.close(),
            None => Ok(()),
        };
        self.counters.publish_totals(self.aggregator.grand_total());

        let result = closed.and(sink_closed);
        if let Err(e) = &result {
            self.fatal_error.get_or_insert_with(|| e.to_string());
        }
        result
    }

    fn summary(&self) -> SessionSummary {
        let grand_total = self.aggregator.grand_total().clone();
        let total_length = grand_total.total_length();
        SessionSummary {
            kind: self.kind,
            accepted: self.counters.accepted(),
            filtered: self.counters.filtered(),
            malformed: self.counters.malformed(),
            warnings: self.counters.warnings(),
            per_operation: grand_total.per_operation(),
            total_length,
            bytes_moved: total_length.saturating_mul(SECTOR_SIZE),
            grand_total,
            streams: (self.kind == CaptureKind::Nvme).then(|| self.streams.clone()),
            files: self.output_files(),
            flushes: self.aggregator.flush_count(),
            fatal_error: self.fatal_error.clone(),
        }
    }

    fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }
}

impl<S: EventSource> CaptureSession<EventCapture<S>> {
    /// Stopped 이후의 history 스냅샷
    pub fn history(&self) -> Result<Vec<Event>> {
        Ok(self.stopped_worker()?.history())
    }
}

/// 세션 종료 후 최종 집계
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub kind: CaptureKind,
    pub accepted: u64,
    pub filtered: u64,
    pub malformed: u64,
    pub warnings: u64,
    pub grand_total: AggregationTable,
    pub per_operation: BTreeMap<String, u64>,
    /// 섹터 단위 길이 합
    pub total_length: u64,
    pub bytes_moved: u64,
    pub streams: Option<StreamStats>,
    pub files: Vec<OutputPaths>,
    pub flushes: u64,
    pub fatal_error: Option<String>,
}

impl SessionSummary {
    /// 걸러졌거나 디코드에 실패한 이벤트 수
    pub fn dropped(&self) -> u64 {
        self.filtered + self.malformed
    }

    pub fn print(&self) {
        for line in self.to_string().lines() {
            log!("{line}");
        }
        if let Some(streams) = &self.streams {
            streams.print();
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== {} capture summary =====", self.kind.display_name())?;
        writeln!(f, "Accepted events : {}", self.accepted)?;
        writeln!(
            f,
            "Dropped events  : {} (filtered {}, malformed {})",
            self.dropped(),
            self.filtered,
            self.malformed
        )?;
        writeln!(f, "Warnings        : {}", self.warnings)?;
        writeln!(f, "Statistics flushes: {}", self.flushes)?;
        for (operation, count) in &self.per_operation {
            writeln!(f, "  {operation:<20} {count}")?;
        }
        writeln!(
            f,
            "Total length    : {} sectors ({} bytes)",
            self.total_length, self.bytes_moved
        )?;
        for paths in &self.files {
            writeln!(f, "Output: {}", paths.workload.display())?;
        }
        if let Some(error) = &self.fatal_error {
            writeln!(f, "Stopped by error: {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Opcode;
    use crate::output::MemoryStatistics;
    use crate::realtime::source::IterSource;

    fn memory_config(kind: CaptureKind) -> CaptureConfig {
        let mut config = CaptureConfig::new(kind);
        config.verbosity = Verbosity::CONSOLE_ONLY;
        config.echo_interval_secs = 100.0;
        config
    }

    fn write_event(ts: f64, device: &str, length: u64, stream: u32) -> Event {
        let mut event = Event::new(ts, device, Opcode::WRITE, length);
        event.command_detail = stream;
        event
    }

    #[test]
    fn test_pipeline_counts_and_streams() {
        let config = memory_config(CaptureKind::Nvme);
        let source = IterSource::from_events(vec![]);
        let mut capture = EventCapture::new(&config, source).unwrap();

        capture.on_event(write_event(0.0, "nvme0n1", 8, 1)).unwrap();
        capture.on_event(write_event(0.1, "nvme0n1", 16, 2)).unwrap();
        let mut read = Event::new(0.2, "nvme0n1", Opcode::READ, 8);
        read.latency = 20.0;
        capture.on_event(read).unwrap();
        capture.finish().unwrap();

        let summary = capture.summary();
        assert_eq!(summary.accepted, 3);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.per_operation["write"], 2);
        assert_eq!(summary.total_length, 32);
        assert_eq!(summary.bytes_moved, 32 * 512);
        let streams = summary.streams.unwrap();
        assert_eq!(streams.total().count, 2);
        assert_eq!(streams.get(2).length, 16);
        assert_eq!(capture.history().len(), 3);
    }

    #[test]
    fn test_block_operation_keys() {
        let config = memory_config(CaptureKind::Block);
        let mut capture = EventCapture::new(&config, IterSource::from_events(vec![])).unwrap();
        capture.on_event(write_event(0.0, "sda", 8, 0x800)).unwrap();
        let total = capture.aggregator().grand_total();
        assert_eq!(total.get("sda", "write_2048", 8), 1);
        assert!(capture.summary().streams.is_none());
    }

    #[test]
    fn test_counter_kind_is_rejected() {
        let config = memory_config(CaptureKind::Counter);
        let result = EventCapture::new(&config, IterSource::from_events(vec![]));
        assert!(matches!(result, Err(CaptureError::Config(_))));
    }

    #[test]
    fn test_idle_flushes_expired_epoch() {
        let mut config = memory_config(CaptureKind::Nvme);
        config.flush_interval_secs = 0.001;
        let stats = MemoryStatistics::new();
        let mut capture = EventCapture::with_statistics(
            &config,
            IterSource::from_events(vec![]),
            Box::new(stats.clone()),
        )
        .unwrap();

        capture.on_event(write_event(5.0, "nvme0n1", 8, 0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        capture.on_idle().unwrap();
        assert_eq!(stats.lines().len(), 1);
        assert_eq!(capture.counters().live_totals().total(), 1);

        capture.finish().unwrap();
        // 남은 epoch가 없으므로 total만 추가된다
        assert_eq!(stats.lines().len(), 2);
        assert!(stats.lines()[1].starts_with("{\"total\""));
    }

    #[test]
    fn test_history_disabled() {
        let mut config = memory_config(CaptureKind::Nvme);
        config.history_capacity = 0;
        let mut capture = EventCapture::new(&config, IterSource::from_events(vec![])).unwrap();
        capture.on_event(write_event(0.0, "nvme0n1", 8, 0)).unwrap();
        assert!(capture.history().is_empty());
    }

    struct RejectingSink;

    impl StatisticsSink for RejectingSink {
        fn write_record(&mut self, _record: &crate::output::StatisticsRecord<'_>) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }

        fn retry_pending(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }

        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_history_only_holds_accepted_events() {
        let config = memory_config(CaptureKind::Nvme);
        let mut capture = EventCapture::with_statistics(
            &config,
            IterSource::from_events(vec![]),
            Box::new(RejectingSink),
        )
        .unwrap();

        capture.on_event(write_event(0.0, "nvme0n1", 8, 0)).unwrap();
        // epoch 경계에서 flush가 실패하면 이 이벤트는 집계되지 않는다
        let err = capture.on_event(write_event(5.0, "nvme0n1", 8, 0)).unwrap_err();
        assert!(matches!(err, CaptureError::Io { .. }));

        let history = capture.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, 0.0);
        assert_eq!(capture.counters().accepted(), 1);
    }
}
