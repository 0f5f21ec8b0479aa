use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::output::statistics::{StatisticsRecord, StatisticsSink};
use crate::{log, log_warn};

pub type SizeBucket = u64;

/// device -> operation -> size bucket -> count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationTable(BTreeMap<String, BTreeMap<String, BTreeMap<SizeBucket, u64>>>);

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 없는 키는 0으로 만든 뒤 1 증가
    pub fn increment(&mut self, device: &str, operation: &str, bucket: SizeBucket) {
        *self
            .0
            .entry(device.to_string())
            .or_default()
            .entry(operation.to_string())
            .or_default()
            .entry(bucket)
            .or_insert(0) += 1;
    }

    /// 읽기 전용 조회. 없는 키도 테이블을 바꾸지 않고 0을 돌려준다.
    pub fn get(&self, device: &str, operation: &str, bucket: SizeBucket) -> u64 {
        self.0
            .get(device)
            .and_then(|ops| ops.get(operation))
            .and_then(|sizes| sizes.get(&bucket))
            .copied()
            .unwrap_or(0)
    }

    /// 모든 leaf 카운터 합
    pub fn total(&self) -> u64 {
        self.0
            .values()
            .flat_map(|ops| ops.values())
            .flat_map(|sizes| sizes.values())
            .sum()
    }

    /// (operation, count) 합계. 디바이스를 가로질러 합산한다.
    pub fn per_operation(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for ops in self.0.values() {
            for (op, sizes) in ops {
                *counts.entry(op.clone()).or_insert(0) += sizes.values().sum::<u64>();
            }
        }
        counts
    }

    /// sum(size * count). 버킷이 identity일 때 이동한 길이 합계가 된다.
    pub fn total_length(&self) -> u64 {
        self.0
            .values()
            .flat_map(|ops| ops.values())
            .flat_map(|sizes| sizes.iter())
            .map(|(size, count)| size.saturating_mul(*count))
            .sum()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// epoch 단위 집계기.
///
/// update마다 interval 테이블과 grand-total 테이블을 함께 증가시킨다.
/// epoch 경계를 넘으면 먼저 이전 epoch를 flush한 다음 새 이벤트를 기록한다.
pub struct WorkloadAggregator {
    interval: f64,
    epoch_start: Option<f64>,
    last_seen: Option<f64>,
    current: AggregationTable,
    total: AggregationTable,
    sink: Option<Box<dyn StatisticsSink>>,
    echo: bool,
    closed: bool,
    flushes: u64,
}

impl WorkloadAggregator {
    pub fn new(interval_secs: f64) -> Result<Self> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return Err(CaptureError::config(format!(
                "flush interval must be > 0 seconds, got {interval_secs}"
            )));
        }
        Ok(Self {
            interval: interval_secs,
            epoch_start: None,
            last_seen: None,
            current: AggregationTable::new(),
            total: AggregationTable::new(),
            sink: None,
            echo: false,
            closed: false,
            flushes: 0,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn StatisticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// flush마다 레코드를 콘솔에도 출력 (test 모드)
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn update(&mut self, timestamp: f64, device: &str, operation: &str, size: u64) -> Result<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed("WorkloadAggregator::update"));
        }

        let epoch_start = *self.epoch_start.get_or_insert(timestamp);
        if timestamp - epoch_start > self.interval {
            let epoch_end = self.last_seen.unwrap_or(epoch_start);
            self.flush(epoch_end)?;
            self.epoch_start = Some(timestamp);
        }

        // 순서가 약간 뒤섞여 들어와도 epoch_end는 뒤로 가지 않는다
        self.last_seen = Some(match self.last_seen {
            Some(last) => last.max(timestamp),
            None => timestamp,
        });

        let bucket = bucket(size);
        self.current.increment(device, operation, bucket);
        self.total.increment(device, operation, bucket);
        Ok(())
    }

    /// 이벤트가 없는 동안 호출되는 타이머 경로. epoch가 만료됐으면 flush 하고 다음 이벤트가 새 epoch를 연다.
    pub fn flush_if_due(&mut self, now: f64) -> Result<bool> {
        if self.closed || self.current.is_empty() {
            return Ok(false);
        }
        match self.epoch_start {
            Some(start) if now - start > self.interval => {
                let epoch_end = self.last_seen.unwrap_or(start);
                self.flush(epoch_end)?;
                self.epoch_start = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 현재 interval 테이블을 기록하고 비운다. grand total은 건드리지 않는다.
    pub fn flush(&mut self, epoch_end: f64) -> Result<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed("WorkloadAggregator::flush"));
        }
        let record = StatisticsRecord::Interval {
            epoch_end,
            table: &self.current,
        };
        emit(&mut self.sink, self.echo, &record)?;
        self.current.clear();
        self.flushes += 1;
        Ok(())
    }

    /// 남은 epoch와 total 레코드를 현재 sink에 쓰고 닫은 뒤 새 sink로 교체한다.
    /// grand total과 epoch 기준점은 유지된다.
    pub fn rotate_sink(&mut self, next: Box<dyn StatisticsSink>) -> Result<()> {
        if self.closed {
            return Err(CaptureError::SessionClosed("WorkloadAggregator::rotate_sink"));
        }
        self.finish_sink()?;
        self.sink = Some(next);
        Ok(())
    }

    /// 마지막 flush + total 레코드 + sink 종료. 두 번째 호출은 아무것도 하지 않는다.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.finish_sink();
        self.closed = true;
        result
    }

    fn finish_sink(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            let epoch_end = self.last_seen.or(self.epoch_start).unwrap_or(0.0);
            self.flush(epoch_end)?;
        }
        if self.echo {
            log!("total, {}", StatisticsRecord::Total { table: &self.total }.to_json_line().unwrap_or_default());
        }
        let record = StatisticsRecord::Total { table: &self.total };
        emit(&mut self.sink, false, &record)?;
        if let Some(mut sink) = self.sink.take() {
            sink.close()
                .map_err(|e| CaptureError::io("closing statistics", sink_path(&*sink), e))?;
        }
        Ok(())
    }

    pub fn grand_total(&self) -> &AggregationTable {
        &self.total
    }

    pub fn current(&self) -> &AggregationTable {
        &self.current
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn last_seen(&self) -> Option<f64> {
        self.last_seen
    }
}

// 기본 버킷은 identity. 호출 측에서 미리 버킷팅해서 넘길 수 있다.
fn bucket(size: u64) -> SizeBucket {
    size
}

// 한 번 재시도 후 실패하면 IoError. 재시도는 sink에 남은 부분만 다시 내보낸다.
fn emit(
    sink: &mut Option<Box<dyn StatisticsSink>>,
    echo: bool,
    record: &StatisticsRecord<'_>,
) -> Result<()> {
    if echo {
        if let Ok(line) = record.to_json_line() {
            log!("{line}");
        }
    }
    let Some(sink) = sink.as_mut() else {
        return Ok(());
    };
    match sink.write_record(record) {
        Ok(()) => Ok(()),
        // 직렬화 실패는 재시도해도 같다
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            Err(CaptureError::io("encoding statistics", sink_path(&**sink), e))
        }
        Err(first) => {
            log_warn!("statistics write failed, retrying once: {first}");
            sink.retry_pending()
                .map_err(|e| CaptureError::io("writing statistics", sink_path(&**sink), e))
        }
    }
}

fn sink_path(sink: &dyn StatisticsSink) -> PathBuf {
    sink.path().map(PathBuf::from).unwrap_or_default()
}
