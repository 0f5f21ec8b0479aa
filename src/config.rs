use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::models::CaptureKind;
use crate::utils::constants::*;
use crate::utils::DeviceFilter;

/// 출력 방식
///
/// - `c` console: 콘솔 에코만
/// - `f` file: 파일 저장만
/// - `cf` console+file
/// - `t` test: 콘솔 에코 + statistics 에코, 1초 간격
/// - `a` all: 모든 이벤트를 콘솔에 (간격 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Verbosity {
    pub console: bool,
    pub file: bool,
    pub statistics_echo: bool,
    pub every_event: bool,
}

impl Verbosity {
    pub const FILE_ONLY: Verbosity = Verbosity {
        console: false,
        file: true,
        statistics_echo: false,
        every_event: false,
    };

    pub const CONSOLE_ONLY: Verbosity = Verbosity {
        console: true,
        file: false,
        statistics_echo: false,
        every_event: false,
    };

    pub const CONSOLE_AND_FILE: Verbosity = Verbosity {
        console: true,
        file: true,
        statistics_echo: false,
        every_event: false,
    };

    pub const TEST: Verbosity = Verbosity {
        console: true,
        file: false,
        statistics_echo: true,
        every_event: false,
    };

    pub const ALL: Verbosity = Verbosity {
        console: true,
        file: false,
        statistics_echo: false,
        every_event: true,
    };

    /// 설정 interval 대신 적용되는 콘솔 에코 간격
    pub fn echo_interval_override(&self) -> Option<f64> {
        if self.every_event {
            Some(0.0)
        } else if self.statistics_echo {
            Some(1.0)
        } else {
            None
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::FILE_ONLY
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" | "console-only" => return Ok(Verbosity::CONSOLE_ONLY),
            "file" | "file-only" => return Ok(Verbosity::FILE_ONLY),
            "console+file" | "file+console" => return Ok(Verbosity::CONSOLE_AND_FILE),
            "test" | "test-mode" => return Ok(Verbosity::TEST),
            "all" => return Ok(Verbosity::ALL),
            _ => {}
        }

        // 한 글자 플래그 조합 ("cf", "tf" ...)
        let mut verbosity = Verbosity {
            console: false,
            file: false,
            statistics_echo: false,
            every_event: false,
        };
        if s.is_empty() {
            return Err("empty verbosity".to_string());
        }
        for flag in s.chars() {
            match flag {
                'c' => verbosity.console = true,
                'f' => verbosity.file = true,
                's' => verbosity.statistics_echo = true,
                't' => {
                    verbosity.console = true;
                    verbosity.statistics_echo = true;
                }
                'a' => {
                    verbosity.console = true;
                    verbosity.every_event = true;
                }
                _ => return Err(format!("Unknown verbosity flag '{flag}' in '{s}'")),
            }
        }
        Ok(verbosity)
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = String::new();
        if self.every_event {
            flags.push('a');
        } else if self.console && self.statistics_echo {
            flags.push('t');
        } else {
            if self.console {
                flags.push('c');
            }
            if self.statistics_echo {
                flags.push('s');
            }
        }
        if self.file {
            flags.push('f');
        }
        f.write_str(&flags)
    }
}

impl TryFrom<String> for Verbosity {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Verbosity> for String {
    fn from(value: Verbosity) -> Self {
        value.to_string()
    }
}

/// 캡처 세션 설정. 모든 값은 기본값이 있고 CLI나 JSON 파일로 덮어쓴다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub kind: CaptureKind,
    pub output_dir: PathBuf,
    /// None이면 kind의 기본 이름
    pub base_name: Option<String>,
    pub verbosity: Verbosity,
    pub device_filters: Vec<String>,
    pub flush_interval_secs: f64,
    pub echo_interval_secs: f64,
    pub rotate_rows: u64,
    /// 0이면 히스토리를 유지하지 않는다
    pub history_capacity: usize,
    pub poll_timeout_ms: u64,
    pub latency_warn_secs: f64,
    pub gate_max_wait_factor: f64,
    pub counter_interval_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            kind: CaptureKind::Block,
            output_dir: PathBuf::from("."),
            base_name: None,
            verbosity: Verbosity::default(),
            device_filters: Vec::new(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            echo_interval_secs: DEFAULT_ECHO_INTERVAL_SECS,
            rotate_rows: DEFAULT_ROTATE_ROWS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            latency_warn_secs: DEFAULT_LATENCY_WARN_SECS,
            gate_max_wait_factor: DEFAULT_GATE_MAX_WAIT_FACTOR,
            counter_interval_secs: DEFAULT_COUNTER_INTERVAL_SECS,
        }
    }
}

impl CaptureConfig {
    pub fn new(kind: CaptureKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CaptureError::io("reading config", path, e))?;
        let config: CaptureConfig = serde_json::from_str(&text)
            .map_err(|e| CaptureError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn base_name(&self) -> &str {
        self.base_name
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_name())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// verbosity에 따른 실제 콘솔 에코 간격
    pub fn effective_echo_interval(&self) -> f64 {
        self.verbosity
            .echo_interval_override()
            .unwrap_or(self.echo_interval_secs)
    }

    pub fn device_filter(&self) -> Result<DeviceFilter> {
        DeviceFilter::new(&self.device_filters)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.flush_interval_secs.is_finite() || self.flush_interval_secs <= 0.0 {
            return Err(CaptureError::config(format!(
                "flush interval must be > 0 seconds, got {}",
                self.flush_interval_secs
            )));
        }
        if !self.echo_interval_secs.is_finite() || self.echo_interval_secs < 0.0 {
            return Err(CaptureError::config(format!(
                "echo interval must be >= 0 seconds, got {}",
                self.echo_interval_secs
            )));
        }
        if self.rotate_rows == 0 {
            return Err(CaptureError::config("rotation row threshold must be > 0"));
        }
        if self.poll_timeout_ms == 0 || self.poll_timeout_ms > MAX_POLL_TIMEOUT_MS {
            return Err(CaptureError::config(format!(
                "poll timeout must be within 1..={MAX_POLL_TIMEOUT_MS} ms, got {}",
                self.poll_timeout_ms
            )));
        }
        if !self.latency_warn_secs.is_finite() || self.latency_warn_secs <= 0.0 {
            return Err(CaptureError::config("latency warning threshold must be > 0"));
        }
        if !self.gate_max_wait_factor.is_finite() || self.gate_max_wait_factor < 1.0 {
            return Err(CaptureError::config("gate max-wait factor must be >= 1"));
        }
        if !self.counter_interval_secs.is_finite() || self.counter_interval_secs <= 0.0 {
            return Err(CaptureError::config("counter interval must be > 0 seconds"));
        }
        if self.base_name().is_empty() {
            return Err(CaptureError::config("output base name must not be empty"));
        }
        self.device_filter()?;
        Ok(())
    }
}
