//! Bounded sample window

use crate::Spread;
use std::collections::VecDeque;
use std::time::Duration;

/// Keeps the newest `capacity` samples; pushing past capacity evicts the
/// oldest.
pub struct RingBuffer<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample, returning the one it evicted.
    pub fn push(&mut self, sample: T) -> Option<T> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn newest(&self) -> Option<&T> {
        self.samples.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl RingBuffer<Duration> {
    pub fn spread(&self) -> Spread {
        let mut iter = self.samples.iter().copied();
        let Some(first) = iter.next() else {
            return Spread::default();
        };
        let (sum, min, max) = iter.fold((first, first, first), |(sum, min, max), d| {
            (sum + d, min.min(d), max.max(d))
        });
        Spread {
            mean: sum / self.samples.len() as u32,
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn full_window_evicts_oldest() {
        let mut window = RingBuffer::new(2);
        assert_eq!(window.push(ms(5)), None);
        assert_eq!(window.push(ms(7)), None);
        assert_eq!(window.push(ms(9)), Some(ms(5)));
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![ms(7), ms(9)]);
        assert_eq!(window.newest(), Some(&ms(9)));
    }

    #[test]
    fn spread_of_durations() {
        let mut window = RingBuffer::new(4);
        assert_eq!(window.spread(), Spread::default());
        for n in [30, 10, 20] {
            window.push(ms(n));
        }
        assert_eq!(
            window.spread(),
            Spread {
                mean: ms(20),
                min: ms(10),
                max: ms(30),
            }
        );
    }
}
