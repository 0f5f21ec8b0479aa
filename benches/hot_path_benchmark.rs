use criterion::{black_box, criterion_group, criterion_main, Criterion};
use iocapture::models::{CaptureKind, Event, EventDecoder, Opcode, RawEvent};
use iocapture::processors::WorkloadAggregator;
use iocapture::utils::{DeviceFilter, FixedCapacityHistory, IntervalGate};

const DEVICES: [&str; 4] = ["nvme0n1", "nvme1n1", "sda", "loop0"];

fn sample_events(count: usize) -> Vec<Event> {
    (0..count)
        .map(|i| {
            let opcode = if i % 3 == 0 { Opcode::READ } else { Opcode::WRITE };
            let mut event = Event::new(i as f64 * 0.0001, DEVICES[i % DEVICES.len()], opcode, 8 << (i % 4));
            event.command_detail = (i % 4) as u32;
            event
        })
        .collect()
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_filter");

    group.bench_function("accept_all", |b| {
        let filter = DeviceFilter::accept_all();
        b.iter(|| filter.matches(black_box("nvme0n1")))
    });

    group.bench_function("two_globs", |b| {
        let filter = DeviceFilter::new(&["nvme*", "sd?"]).unwrap();
        b.iter(|| {
            for device in DEVICES {
                black_box(filter.matches(black_box(device)));
            }
        })
    });

    group.finish();
}

fn bench_aggregator(c: &mut Criterion) {
    let events = sample_events(10_000);
    let mut group = c.benchmark_group("aggregator");

    group.bench_function("update_10k", |b| {
        b.iter(|| {
            let mut aggregator = WorkloadAggregator::new(1.0).unwrap();
            for event in &events {
                let key = CaptureKind::Block.operation_key(event);
                aggregator
                    .update(event.timestamp, &event.device, &key, event.length)
                    .unwrap();
            }
            black_box(aggregator.grand_total().total())
        })
    });

    group.finish();
}

fn bench_gate_and_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("per_event");

    group.bench_function("interval_gate", |b| {
        let mut gate = IntervalGate::from_secs(1.0).unwrap();
        let mut now = 0.0;
        b.iter(|| {
            now += 0.001;
            black_box(gate.ready(black_box(now)))
        })
    });

    group.bench_function("history_append_full", |b| {
        let mut history = FixedCapacityHistory::new(1024);
        let event = Event::new(0.0, "nvme0n1", Opcode::WRITE, 8);
        b.iter(|| history.append(black_box(event.clone())))
    });

    group.bench_function("decode_raw", |b| {
        let mut decoder = EventDecoder::with_wall_start(0.0);
        let raw = RawEvent::new(1_000, "fio", "nvme0n1", 1);
        b.iter(|| decoder.decode(black_box(&raw)))
    });

    group.finish();
}

criterion_group!(benches, bench_filter, bench_aggregator, bench_gate_and_history);
criterion_main!(benches);
