use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use iocapture::realtime::IterSource;
use iocapture::*;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn events(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| Event::new(i as f64 * 0.01, "sda", Opcode::WRITE, 8))
        .collect()
}

fn block_config(dir: &Path, rotate_rows: u64) -> CaptureConfig {
    let mut config = CaptureConfig::new(CaptureKind::Block);
    config.output_dir = dir.to_path_buf();
    config.rotate_rows = rotate_rows;
    config
}

fn run(worker: EventCapture<IterSource<std::vec::IntoIter<std::result::Result<Event, DecodeError>>>>) -> SessionSummary {
    let mut session = CaptureSession::new(worker);
    session.start().unwrap();
    session.join().unwrap();
    session.summary().unwrap()
}

fn data_rows(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count() - 1
}

#[test]
fn seven_rows_threshold_three_gives_three_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let config = block_config(dir.path(), 3);
    let worker = EventCapture::with_clock(&config, IterSource::from_events(events(7)), || day(5)).unwrap();
    let summary = run(worker);

    assert_eq!(summary.files.len(), 3);
    let rows: Vec<usize> = summary.files.iter().map(|p| data_rows(&p.workload)).collect();
    assert_eq!(rows, vec![3, 3, 1]);

    let names: HashSet<_> = summary
        .files
        .iter()
        .flat_map(|p| [p.workload.clone(), p.statistics.clone()])
        .collect();
    assert_eq!(names.len(), 6);
    assert_eq!(
        summary.files[2].workload.file_name().unwrap(),
        "ssd-20240305_2-workload.csv"
    );

    // 각 statistics 파일은 누적 total로 끝난다
    let expected_totals = [3, 6, 7];
    for (paths, expected) in summary.files.iter().zip(expected_totals) {
        let text = std::fs::read_to_string(&paths.statistics).unwrap();
        let last = text.lines().last().unwrap();
        assert_eq!(last, format!(r#"{{"total":{{"sda":{{"write_0":{{"8":{expected}}}}}}}}}"#));
    }
    assert_eq!(summary.grand_total.total(), 7);
}

#[test]
fn exact_multiple_does_not_open_empty_pair() {
    let dir = tempfile::tempdir().unwrap();
    let config = block_config(dir.path(), 3);
    let worker = EventCapture::with_clock(&config, IterSource::from_events(events(6)), || day(5)).unwrap();
    let summary = run(worker);
    assert_eq!(summary.files.len(), 2);
}

#[test]
fn date_change_resets_rotation_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = block_config(dir.path(), 100);

    // 첫 세 번의 호출(open + 이벤트 2건)까지는 5일, 그 뒤로는 6일
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let clock = move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            day(5)
        } else {
            day(6)
        }
    };
    let worker = EventCapture::with_clock(&config, IterSource::from_events(events(4)), clock).unwrap();
    let summary = run(worker);

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.files[0].date, day(5));
    assert_eq!(summary.files[1].date, day(6));
    assert_eq!(summary.files[1].ext_no, 0);
    assert_eq!(data_rows(&summary.files[0].workload), 2);
    assert_eq!(data_rows(&summary.files[1].workload), 2);
}

#[test]
fn existing_files_from_earlier_run_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let earlier = dir.path().join("ssd-20240305_0-workload.csv");
    std::fs::write(&earlier, "earlier run\n").unwrap();

    let config = block_config(dir.path(), 100);
    let worker = EventCapture::with_clock(&config, IterSource::from_events(events(2)), || day(5)).unwrap();
    let summary = run(worker);

    assert_eq!(summary.files[0].ext_no, 1);
    assert_eq!(std::fs::read_to_string(&earlier).unwrap(), "earlier run\n");
}
