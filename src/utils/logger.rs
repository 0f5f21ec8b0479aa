use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Once;
use std::sync::OnceLock;

// 전역 로거: 콘솔 출력 + (init 이후) 로그 파일 미러링
static LOGGER: OnceLock<Mutex<Option<File>>> = OnceLock::new();
static INIT: Once = Once::new();

pub struct Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Logger {
    /// `{output_prefix}_capture.log` 파일을 연다. 두 번째 호출부터는 무시된다.
    pub fn init(output_prefix: &str) {
        INIT.call_once(|| {
            let log_path = log_path_for(output_prefix);

            let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
            if !log_dir.as_os_str().is_empty() && !log_dir.exists() {
                if let Err(e) = fs::create_dir_all(log_dir) {
                    eprintln!("cannot create log directory {}: {e}", log_dir.display());
                    LOGGER.get_or_init(|| Mutex::new(None));
                    return;
                }
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path);

            match file {
                Ok(file) => {
                    println!("logging to '{}'", log_path.display());
                    LOGGER.get_or_init(|| Mutex::new(Some(file)));
                }
                Err(e) => {
                    eprintln!("cannot open log file {}: {e}", log_path.display());
                    LOGGER.get_or_init(|| Mutex::new(None));
                }
            }
        });
    }

    pub fn write(level: Level, message: &str) {
        match level {
            Level::Info => println!("{message}"),
            Level::Warn => eprintln!("WARN: {message}"),
            Level::Error => eprintln!("ERROR: {message}"),
        }

        if let Some(logger) = LOGGER.get() {
            if let Ok(mut file_guard) = logger.lock() {
                if let Some(file) = file_guard.as_mut() {
                    let prefix = match level {
                        Level::Info => "",
                        Level::Warn => "WARN: ",
                        Level::Error => "ERROR: ",
                    };
                    if let Err(e) = writeln!(file, "{prefix}{message}") {
                        eprintln!("log file write failed: {e}");
                    }
                }
            }
        }
    }

    pub fn log(message: &str) {
        Self::write(Level::Info, message);
    }

    pub fn log_warn(message: &str) {
        Self::write(Level::Warn, message);
    }

    pub fn log_error(message: &str) {
        Self::write(Level::Error, message);
    }

    pub fn flush() -> std::io::Result<()> {
        if let Some(logger) = LOGGER.get() {
            if let Ok(mut file_guard) = logger.lock() {
                if let Some(file) = file_guard.as_mut() {
                    file.flush()?;
                }
            }
        }
        Ok(())
    }
}

fn log_path_for(output_prefix: &str) -> PathBuf {
    let output_prefix = output_prefix.trim_end_matches('/');
    let path = Path::new(output_prefix);
    if path.is_dir() {
        path.join("capture.log")
    } else {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("capture");
        dir.join(format!("{file_name}_capture.log"))
    }
}

#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log(&message);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log_warn(&message);
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log_error(&message);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_for_prefix() {
        assert_eq!(
            log_path_for("out/run1"),
            PathBuf::from("out").join("run1_capture.log")
        );
        assert_eq!(log_path_for("ssd"), PathBuf::from("ssd_capture.log"));
    }
}
