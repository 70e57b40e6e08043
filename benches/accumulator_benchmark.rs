use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use moto_tracker::models::TrackPoint;
use moto_tracker::services::{Accumulator, RouteExporter, TrackingSession};
use std::hint::black_box;

/// A two-hour ride sampled once per second, heading north-east.
fn synthetic_ride(samples: usize) -> Vec<TrackPoint> {
    let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    (0..samples)
        .map(|i| {
            let step = i as f64;
            TrackPoint::new(
                45.0 + step * 0.0001,
                9.0 + (step * 0.01).sin() * 0.0005 + step * 0.00005,
                t0 + Duration::seconds(i as i64),
            )
            .with_speed(60.0 + (step * 0.1).sin() * 20.0)
        })
        .collect()
}

fn benchmark_accumulator(c: &mut Criterion) {
    let ride = synthetic_ride(7_200);

    let mut group = c.benchmark_group("ride_totals");

    group.bench_function("accumulate_two_hour_ride", |b| {
        b.iter(|| Accumulator::from_points(black_box(&ride)).distance_km())
    });

    let mut session = TrackingSession::new();
    let first = ride[0].clone();
    let started = first.captured_at;
    session
        .start(first, started)
        .expect("Failed to start session");
    for point in &ride[1..] {
        session.record(point.clone());
    }
    let finished = ride[ride.len() - 1].captured_at;
    session.stop(finished).expect("Failed to stop session");

    group.bench_function("build_route_two_hour_ride", |b| {
        b.iter(|| {
            RouteExporter::build_route(black_box(&session), "rider", "Bench", None, finished)
                .expect("Failed to build route")
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_accumulator);
criterion_main!(benches);
