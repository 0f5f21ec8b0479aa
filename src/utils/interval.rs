use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::utils::constants::DEFAULT_GATE_MAX_WAIT_FACTOR;

/// "마지막 트리거 이후 interval 이상 지났는가" 게이트.
///
/// 시간 단위는 초(f64)이며 이벤트 타임스탬프나 wall clock 어느 쪽이든 쓸 수 있다.
/// interval이 0이면 항상 열려 있다.
///
/// 시계가 뒤로 가면 앞으로 진행할 때까지 닫혀 있지만, 뒤로 간 폭이 `max_wait`를
/// 넘으면 기준점을 현재 시각으로 다시 잡고 즉시 연다. 따라서 나쁜 시계 때문에
/// 닫혀 있는 시간은 최대 `max_wait + interval`이다.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: f64,
    max_wait: f64,
    last_fire: Option<f64>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        let interval = interval.as_secs_f64();
        Self {
            interval,
            max_wait: interval * DEFAULT_GATE_MAX_WAIT_FACTOR,
            last_fire: None,
        }
    }

    /// 초 단위 interval로 생성. 음수나 NaN은 설정 오류.
    pub fn from_secs(interval: f64) -> Result<Self> {
        if !interval.is_finite() || interval < 0.0 {
            return Err(CaptureError::config(format!(
                "gate interval must be a non-negative number of seconds, got {interval}"
            )));
        }
        Ok(Self::new(Duration::from_secs_f64(interval)))
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.as_secs_f64();
        self
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn ready(&mut self, now: f64) -> bool {
        if self.interval <= 0.0 {
            self.last_fire = Some(now);
            return true;
        }
        let Some(last) = self.last_fire else {
            self.last_fire = Some(now);
            return true;
        };

        if now < last {
            if last - now > self.max_wait {
                self.last_fire = Some(now);
                return true;
            }
            return false;
        }

        if now - last >= self.interval {
            self.last_fire = Some(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last_fire = None;
    }
}
