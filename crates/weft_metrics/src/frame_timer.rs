//! Per-frame wall time for driver loops

use super::ring_buffer::RingBuffer;
use crate::Spread;
use std::time::{Duration, Instant};

/// Times whole frames and keeps a rolling window of the most recent ones.
pub struct FrameTimer {
    window: RingBuffer<Duration>,
    frames: u64,
}

impl FrameTimer {
    pub fn new(window: usize) -> Self {
        Self {
            window: RingBuffer::new(window),
            frames: 0,
        }
    }

    /// Run one frame and record how long it took.
    pub fn frame<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.window.push(elapsed);
        self.frames += 1;
    }

    /// Frames recorded since creation, not just those in the window.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last(&self) -> Duration {
        self.window.newest().copied().unwrap_or(Duration::ZERO)
    }

    pub fn spread(&self) -> Spread {
        self.window.spread()
    }
}
