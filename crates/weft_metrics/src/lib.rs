//! Weft Metrics - counters and timers for the ECS core and its drivers
//!
//! Everything here compiles to zero-cost stubs unless the `metrics`
//! feature is enabled, so instrumented code never needs its own `cfg`.
//!
//! # Usage
//!
//! ```ignore
//! use weft_metrics::Counter;
//!
//! let mut counter = Counter::new();
//! counter.increment("tables_created", 1);
//! for (name, value) in counter.snapshot() {
//!     println!("{name}: {value}");
//! }
//! ```

use std::time::Duration;

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod phase_profiler;
#[cfg(feature = "metrics")]
mod ring_buffer;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use phase_profiler::PhaseProfiler;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;

/// True when the crate was built with the `metrics` feature.
pub const ENABLED: bool = cfg!(feature = "metrics");

/// Mean, minimum and maximum of a window of durations.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Spread {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Spread {
    pub fn mean_ms(&self) -> f64 {
        self.mean.as_secs_f64() * 1000.0
    }
}

// Stubs used when metrics are compiled out. Timed closures still run.

#[cfg(not(feature = "metrics"))]
#[derive(Clone, Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    #[inline(always)]
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn reset_all(&mut self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_window: usize) -> Self { Self }
    #[inline(always)]
    pub fn frame<F: FnOnce() -> R, R>(&mut self, f: F) -> R { f() }
    pub fn record(&mut self, _elapsed: Duration) {}
    pub fn frames(&self) -> u64 { 0 }
    pub fn last(&self) -> Duration { Duration::ZERO }
    pub fn spread(&self) -> Spread { Spread::default() }
}

#[cfg(not(feature = "metrics"))]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _sample: T) -> Option<T> { None }
    pub fn len(&self) -> usize { 0 }
    pub fn is_empty(&self) -> bool { true }
}

#[cfg(not(feature = "metrics"))]
#[derive(Default)]
pub struct PhaseProfiler;

#[cfg(not(feature = "metrics"))]
impl PhaseProfiler {
    pub fn new() -> Self { Self }
    #[inline(always)]
    pub fn time_phase<F: FnOnce() -> R, R>(&mut self, _name: &'static str, f: F) -> R { f() }
    pub fn get_timing(&self, _name: &str) -> Duration { Duration::ZERO }
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ { std::iter::empty() }
}
