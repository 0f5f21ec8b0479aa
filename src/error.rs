use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 캡처 엔진 전체에서 쓰는 에러 타입
#[derive(Debug, Error)]
pub enum CaptureError {
    /// 시작 전에 걸러지는 설정 오류 (필터 패턴, 인터벌, 용량 등)
    #[error("configuration error: {0}")]
    Config(String),

    /// 이벤트 하나를 해석하지 못함. 루프는 계속 돈다.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// 싱크 open/write/rotate 실패
    #[error("I/O error while {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// close/shutdown 이후에 update/write_event 호출
    #[error("session already closed: {0}")]
    SessionClosed(&'static str),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("capture worker panicked")]
    WorkerPanicked,
}

impl CaptureError {
    pub fn config(message: impl Into<String>) -> Self {
        CaptureError::Config(message.into())
    }

    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CaptureError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// 이벤트 한 건의 디코드 실패. 채널을 통해 그대로 전달될 수 있도록 가볍게 유지한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub field: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed event ({}): {}", self.field, self.reason)
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CaptureError::io(
            "opening",
            "/tmp/x.csv",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error while opening /tmp/x.csv: denied");

        let decode: CaptureError = DecodeError::new("device", "empty name").into();
        assert_eq!(decode.to_string(), "malformed event (device): empty name");
    }
}
