//! Counter behaviour seen through the public sampler API.

use herakles_sampler::sampler::{BundledSampler, RateOptions, Sampler};
use herakles_sampler::{ManualClock, SamplerError};
use std::sync::Arc;

fn sampler_at(start: f64) -> (Sampler, ManualClock) {
    let clock = ManualClock::new(start);
    (Sampler::with_clock("test", Arc::new(clock.clone())), clock)
}

#[test]
fn test_calls_under_a_second_apart_rebaseline() {
    let (mut sampler, clock) = sampler_at(1_000.0);
    assert_eq!(sampler.counter("x", 0.0, RateOptions::per_second()).unwrap(), None);

    clock.advance(0.5);
    assert_eq!(sampler.counter("x", 40.0, RateOptions::per_second()).unwrap(), None);

    // The 0.5s reading is the baseline now: 60 over 1s
    clock.advance(1.0);
    assert_eq!(
        sampler.counter("x", 100.0, RateOptions::per_second()).unwrap(),
        Some(60.0)
    );
}

#[test]
fn test_rate_then_immediate_call_reports_nothing() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler.counter("x", 0.0, RateOptions::per_second()).unwrap();
    clock.advance(1.0);
    assert_eq!(
        sampler.counter("x", 100.0, RateOptions::per_second()).unwrap(),
        Some(100.0)
    );
    assert_eq!(sampler.counter("x", 150.0, RateOptions::per_second()).unwrap(), None);
}

#[test]
fn test_decrease_reports_nothing_and_rebaselines() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler.counter("x", 1000.0, RateOptions::per_second()).unwrap();
    clock.advance(2.0);
    assert_eq!(sampler.counter("x", 5.0, RateOptions::per_second()).unwrap(), None);
    assert!(!sampler.output().contains_key("x"));

    let baseline = sampler.memory_store().baseline("x").unwrap();
    assert_eq!(baseline.value, 5.0);
    assert_eq!(baseline.time, 2.0);
}

#[test]
fn test_rounding_to_one_digit() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler.counter("y", 0.0, RateOptions::per_second()).unwrap();
    clock.advance(3.0);
    let rate = sampler
        .counter("y", 33.0, RateOptions::per_second().round(1))
        .unwrap()
        .unwrap();
    assert_eq!(rate, 11.0);

    clock.advance(7.0);
    let rate = sampler
        .counter("y", 34.0, RateOptions::per_second().round(1))
        .unwrap()
        .unwrap();
    assert_eq!(rate, 0.1);
}

#[test]
fn test_per_minute_scaling() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler.counter("Requests", 0.0, RateOptions::per_minute()).unwrap();
    clock.advance(2.0);
    sampler.counter("Requests", 10.0, RateOptions::per_minute()).unwrap();
    assert_eq!(sampler.output()["requests"].as_f64(), Some(300.0));
}

#[test]
fn test_invalid_rounding_is_error_and_keeps_baseline() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler.counter("x", 10.0, RateOptions::per_second()).unwrap();
    clock.advance(5.0);
    let err = sampler
        .counter("x", 99.0, RateOptions::per_second().round(13))
        .unwrap_err();
    assert!(matches!(err, SamplerError::InvalidRounding(13)));
    assert_eq!(sampler.memory_store().baseline("x").unwrap().value, 10.0);
}

#[test]
fn test_unknown_rate_unit_is_rejected() {
    let err = "fortnight"
        .parse::<herakles_sampler::sampler::RateUnit>()
        .unwrap_err();
    assert!(matches!(err, SamplerError::UnsupportedRateUnit(_)));
}

#[test]
fn test_compute_receives_last_and_current() {
    let (mut sampler, clock) = sampler_at(0.0);
    sampler
        .counter_with("ratio", 4.0, RateOptions::per_second(), |_, _| 0.0)
        .unwrap();
    clock.advance(1.0);
    let rate = sampler
        .counter_with("ratio", 10.0, RateOptions::per_second(), |last, current| {
            assert_eq!((last, current), (4.0, 10.0));
            current / last
        })
        .unwrap();
    assert_eq!(rate, Some(2.5));
}

#[test]
fn test_bundles_keep_independent_baselines() {
    let clock = ManualClock::new(0.0);
    let mut sampler = BundledSampler::with_clock("disk", Arc::new(clock.clone()));
    let per_second = RateOptions::per_second();

    sampler.counter("a", "x", 0.0, per_second).unwrap();
    sampler.counter("b", "x", 1000.0, per_second).unwrap();
    clock.advance(1.0);
    assert_eq!(sampler.counter("a", "x", 50.0, per_second).unwrap(), Some(50.0));
    assert_eq!(sampler.counter("b", "x", 1005.0, per_second).unwrap(), Some(5.0));

    assert_eq!(sampler.output()["a"]["x"].as_f64(), Some(50.0));
    assert_eq!(sampler.output()["b"]["x"].as_f64(), Some(5.0));
}

#[test]
fn test_unavailable_reading_leaves_its_baseline_alone() {
    let (mut sampler, clock) = sampler_at(0.0);
    let readings = [(0.0, Some(0.0)), (10.0, None), (30.0, Some(40.0))];
    let mut step = 0;
    let mut source = move |s: &mut Sampler| -> herakles_sampler::Result<()> {
        let (requests, errors) = readings[step];
        step += 1;
        s.counter("requests", requests, RateOptions::per_second())?;
        match errors {
            Some(value) => {
                s.counter("errors", value, RateOptions::per_second())?;
                Ok(())
            }
            None => Err(SamplerError::unavailable("errors", "log not readable")),
        }
    };

    sampler.run(&mut source).unwrap();

    clock.advance(1.0);
    let out = sampler.run(&mut source).unwrap();
    assert_eq!(out["requests"].as_f64(), Some(10.0));
    assert!(!out.contains_key("errors"));
    let baseline = sampler.memory_store().baseline("errors").unwrap();
    assert_eq!((baseline.time, baseline.value), (0.0, 0.0));

    // 40 over the 2s since the last good reading
    clock.advance(1.0);
    let out = sampler.run(&mut source).unwrap();
    assert_eq!(out["requests"].as_f64(), Some(20.0));
    assert_eq!(out["errors"].as_f64(), Some(20.0));
}
