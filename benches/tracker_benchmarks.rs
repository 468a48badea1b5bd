//! Tracker benchmarks using Criterion.
//!
//! Run with: cargo bench

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use visit_tracker::matching::associate_detections_to_tracks;
use visit_tracker::perception::PerceptionConfig;
use visit_tracker::{BBox, Detection, FrameProcessor, SessionConfig, Tracker, TrackerConfig};

/// Non-overlapping person-sized boxes on a grid.
fn create_test_detections(n: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| {
            let x = (i % 10) as f64 * 60.0;
            let y = (i / 10) as f64 * 110.0;
            Detection::from_xyxy(x, y, x + 40.0, y + 100.0, 0.9).expect("valid detection")
        })
        .collect()
}

fn bench_tracker_update(c: &mut Criterion, n: usize) {
    let mut tracker = Tracker::new(TrackerConfig::default()).expect("valid tracker");
    let detections = create_test_detections(n);

    c.bench_function(&format!("tracker_update_{n}_objects"), |b| {
        b.iter(|| {
            tracker.update(black_box(&detections));
        })
    });
}

fn benchmark_tracker_update_10_objects(c: &mut Criterion) {
    bench_tracker_update(c, 10);
}

fn benchmark_tracker_update_50_objects(c: &mut Criterion) {
    bench_tracker_update(c, 50);
}

/// Every detection overlaps two tracks, forcing the full assignment solve.
fn benchmark_association_contested_50(c: &mut Criterion) {
    let tracks: Vec<BBox> = (0..50)
        .map(|i| {
            let x = i as f64 * 20.0;
            BBox::new(x, 0.0, x + 40.0, 100.0)
        })
        .collect();
    let detections: Vec<BBox> = tracks
        .iter()
        .map(|b| BBox::new(b.x1 + 10.0, b.y1, b.x2 + 10.0, b.y2))
        .collect();

    c.bench_function("association_contested_50", |b| {
        b.iter(|| associate_detections_to_tracks(black_box(&detections), black_box(&tracks), 0.3))
    });
}

fn benchmark_frame_processor_20_people(c: &mut Criterion) {
    let mut processor = FrameProcessor::new(
        TrackerConfig::default(),
        SessionConfig::default(),
        &PerceptionConfig::default(),
    )
    .expect("valid processor");
    let detections = create_test_detections(20);
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut frame = 0_i64;

    c.bench_function("frame_processor_20_people", |b| {
        b.iter(|| {
            frame += 1;
            let now = start + Duration::milliseconds(frame * 33);
            processor.process_frame(black_box(&detections), now)
        })
    });
}

criterion_group!(
    benches,
    benchmark_tracker_update_10_objects,
    benchmark_tracker_update_50_objects,
    benchmark_association_contested_50,
    benchmark_frame_processor_20_people,
);
criterion_main!(benches);
