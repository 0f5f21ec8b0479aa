use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use iocapture::output::{statistics_path_for, StatisticsFile, WorkloadReader};
use iocapture::processors::DiffCounters;
use iocapture::realtime::{
    event_channel, CaptureSession, CaptureWorker, CommandProbe, CounterCapture, Elevation,
    EventCapture, IterSource, SessionState,
};
use iocapture::utils::constants::DEFAULT_CHANNEL_CAPACITY;
use iocapture::utils::{parse_filter_list, Logger};
use iocapture::*;

// 상태 확인 주기
const STATUS_POLL: Duration = Duration::from_millis(200);

enum Mode {
    /// 외부 tracer가 stdin으로 넘기는 workload 형식 CSV를 실시간 캡처
    Stdin,
    Replay(String),
    Counters(String),
    Diff(PathBuf, PathBuf),
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} [options] --stdin                   - Capture workload CSV rows piped from a tracer until EOF or Ctrl-C", program);
    eprintln!("  {} [options] --replay <glob>           - Re-aggregate previously written workload files", program);
    eprintln!("  {} [options] --counters <command>      - Poll wear counters periodically (add --sudo to elevate)", program);
    eprintln!("  {} --diff <before> <after>             - Compare two counter dumps", program);
    eprintln!("\nOptions:");
    eprintln!("  -o <base>     - Output base name (default: ssd / nvme / wai)");
    eprintln!("  -d <dir>      - Output directory (default: .)");
    eprintln!("  -v <flags>    - Verbosity: c (console), f (file), cf, t (test, 1s), a (every event)");
    eprintln!("  -i <seconds>  - Console echo and statistics flush interval");
    eprintln!("  -f <patterns> - Device filter globs, comma-separated. Example: -f nvme*,sd?");
    eprintln!("  -r <rows>     - Rotate output files after this many rows (default: 25000000)");
    eprintln!("  -k <kind>     - Capture kind: block or nvme (default: block)");
    eprintln!("  -n <count>    - In-memory history capacity, 0 to disable");
    eprintln!("  --config <f>  - Load options from a JSON file (command line flags win)");
    eprintln!("  --sudo        - Run the counter command through sudo -S (password from IOCAPTURE_SUDO_PASSWORD)");
}

fn option_value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} option requires a value"))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> std::result::Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid value '{value}' for {flag}"))
}

/// 인자를 해석해서 (설정, 모드, sudo 여부)를 만든다
fn parse_args(args: &[String]) -> std::result::Result<(CaptureConfig, Mode, bool), String> {
    // --config가 먼저 적용되고 나머지 플래그가 덮어쓴다
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = option_value(args, i, "--config")?;
            CaptureConfig::from_json_file(path).map_err(|e| e.to_string())?
        }
        None => CaptureConfig::default(),
    };

    let mut mode = None;
    let mut sudo = false;
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "-o" => {
                config.base_name = Some(option_value(args, i, flag)?.to_string());
                i += 2;
            }
            "-d" => {
                config.output_dir = PathBuf::from(option_value(args, i, flag)?);
                i += 2;
            }
            "-v" => {
                config.verbosity = option_value(args, i, flag)?.parse::<Verbosity>()?;
                i += 2;
            }
            "-i" => {
                let seconds: f64 = parse_number(option_value(args, i, flag)?, flag)?;
                config.echo_interval_secs = seconds;
                // 0은 에코 간격에만 의미가 있다
                if seconds > 0.0 {
                    config.flush_interval_secs = seconds;
                }
                i += 2;
            }
            "-f" => {
                config.device_filters = parse_filter_list(option_value(args, i, flag)?);
                i += 2;
            }
            "-r" => {
                config.rotate_rows = parse_number(option_value(args, i, flag)?, flag)?;
                i += 2;
            }
            "-k" => {
                config.kind = option_value(args, i, flag)?.parse::<CaptureKind>()?;
                i += 2;
            }
            "-n" => {
                config.history_capacity = parse_number(option_value(args, i, flag)?, flag)?;
                i += 2;
            }
            "--config" => i += 2,
            "--sudo" => {
                sudo = true;
                i += 1;
            }
            "--stdin" => {
                mode = Some(Mode::Stdin);
                i += 1;
            }
            "--replay" => {
                mode = Some(Mode::Replay(option_value(args, i, flag)?.to_string()));
                i += 2;
            }
            "--counters" => {
                mode = Some(Mode::Counters(option_value(args, i, flag)?.to_string()));
                config.kind = CaptureKind::Counter;
                i += 2;
            }
            "--diff" => {
                let before = option_value(args, i, flag)?;
                let after = option_value(args, i + 1, flag)?;
                mode = Some(Mode::Diff(PathBuf::from(before), PathBuf::from(after)));
                i += 3;
            }
            other => return Err(format!("Unknown option '{other}'")),
        }
    }

    let mode = mode.ok_or_else(|| "No mode given".to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok((config, mode, sudo))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("iocapture");

    if args.len() <= 1 {
        eprintln!("Error: No arguments provided");
        print_usage(program);
        return Ok(());
    }

    let (config, mode, sudo) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {e}");
            print_usage(program);
            return Ok(());
        }
    };

    if !matches!(mode, Mode::Diff(..)) {
        Logger::init(&config.output_dir.join(config.base_name()).to_string_lossy());
    }

    let result = match mode {
        Mode::Stdin => capture_stdin(&config).await,
        Mode::Replay(pattern) => replay(&config, &pattern),
        Mode::Counters(command) => capture_counters(&config, &command, sudo).await,
        Mode::Diff(before, after) => diff(&before, &after),
    };

    if let Err(e) = &result {
        log_error!("{e}");
    }
    Logger::flush()?;
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

/// Ctrl-C 또는 워커가 스스로 끝날 때까지 기다린 뒤 join
async fn run_until_stopped<W: CaptureWorker>(session: &mut CaptureSession<W>) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    session.start()?;
    log!("Capture running, press Ctrl-C to stop");
    while session.state() == SessionState::Running {
        if interrupted.load(Ordering::SeqCst) {
            log!("Interrupted, shutting down...");
            session.shutdown();
            break;
        }
        tokio::time::sleep(STATUS_POLL).await;
    }
    signal.abort();

    tokio::task::block_in_place(|| session.join())
}

async fn capture_stdin(config: &CaptureConfig) -> Result<()> {
    let (sender, source) = event_channel(DEFAULT_CHANNEL_CAPACITY);

    // stdin은 블록되므로 전용 스레드에서 읽는다. 끝나면 sender가 drop되어 세션이 종료된다.
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let reader = match WorkloadReader::from_reader(io::stdin(), PathBuf::from("<stdin>")) {
                Ok(reader) => reader,
                Err(e) => {
                    log_error!("{e}");
                    return;
                }
            };
            for delivery in reader {
                let sent = match delivery {
                    Ok(event) => sender.send(event),
                    Err(error) => sender.send_malformed(error),
                };
                if sent.is_err() {
                    break;
                }
            }
        })
        .map_err(|e| CaptureError::io("spawning", "stdin-reader", e))?;

    let mut session = CaptureSession::new(EventCapture::new(config, source)?);
    let result = run_until_stopped(&mut session).await;
    if let Ok(summary) = session.summary() {
        summary.print();
    }
    result
}

fn replay(config: &CaptureConfig, pattern: &str) -> Result<()> {
    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| CaptureError::config(format!("invalid glob '{pattern}': {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(CaptureError::config(format!("no workload files match '{pattern}'")));
    }

    for path in files {
        replay_file(config, &path)?;
    }
    Ok(())
}

fn replay_file(config: &CaptureConfig, path: &Path) -> Result<()> {
    log!("Replaying {}", path.display());
    let reader = WorkloadReader::open(path)?;
    let statistics_path = statistics_path_for(path);
    let statistics = StatisticsFile::create(&statistics_path)
        .map_err(|e| CaptureError::io("opening statistics", &statistics_path, e))?;

    let worker = EventCapture::with_statistics(config, IterSource::new(reader), Box::new(statistics))?;
    let mut session = CaptureSession::new(worker);
    session.start()?;
    let result = session.join();
    if let Ok(summary) = session.summary() {
        summary.print();
    }
    log!("Statistics written to {}", statistics_path.display());
    result
}

async fn capture_counters(config: &CaptureConfig, command: &str, sudo: bool) -> Result<()> {
    let elevation = if sudo {
        Elevation::Sudo {
            password: env::var("IOCAPTURE_SUDO_PASSWORD").ok(),
        }
    } else {
        Elevation::None
    };
    let probe = CommandProbe::from_command_line(command, elevation)?;
    let mut session = CaptureSession::new(CounterCapture::new(config, probe)?);
    let result = run_until_stopped(&mut session).await;
    if let Ok(summary) = session.summary() {
        summary.print();
    }
    result
}

fn diff(before: &Path, after: &Path) -> Result<()> {
    let read = |path: &Path| {
        std::fs::read_to_string(path)
            .map(|text| processors::parse_counter_dump(&text))
            .map_err(|e| CaptureError::io("reading counters", path, e))
    };
    let start = read(before)?;
    let end = read(after)?;

    let deltas = DiffCounters::all(&start, &end);
    for (key, delta) in &deltas.deltas {
        log!("{key:<24} {delta:+}");
    }
    deltas.wear().print();
    Ok(())
}
