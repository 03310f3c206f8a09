use heapless::Deque;

use crate::tick::{TICKS_PER_SECOND, Tick};

const WINDOW_SECONDS: usize = 10;
/// max - min over the window must stay below this, m
const LANDED_RANGE_M: f32 = 4.0;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Tick,
    min: f32,
    max: f32,
}

impl Bucket {
    fn new(start: Tick, height: f32) -> Self {
        Self {
            start,
            min: height,
            max: height,
        }
    }
}

/// Rolling 10 s min/max of the averaged height, kept as one bucket per
/// second so the window costs ten entries instead of a thousand samples.
#[derive(Debug, Clone, Default)]
pub struct LandingDetector {
    current: Option<Bucket>,
    completed: Deque<Bucket, WINDOW_SECONDS>,
}

impl LandingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.completed.clear();
    }

    /// Feeds one height. Returns true once a full window stays within
    /// [`LANDED_RANGE_M`].
    pub fn update(&mut self, tick: Tick, height: f32) -> bool {
        let bucket = match &mut self.current {
            Some(bucket) if tick.since(bucket.start) < TICKS_PER_SECOND as i16 => bucket,
            current => {
                if let Some(done) = current.take() {
                    if self.completed.is_full() {
                        self.completed.pop_front();
                    }
                    self.completed.push_back(done).ok();
                }
                current.insert(Bucket::new(tick, height))
            }
        };
        bucket.min = bucket.min.min(height);
        bucket.max = bucket.max.max(height);

        self.is_stable()
    }

    fn is_stable(&self) -> bool {
        if !self.completed.is_full() {
            return false;
        }
        let (min, max) = self
            .completed
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), b| (min.min(b.min), max.max(b.max)));
        max - min < LANDED_RANGE_M
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_trace_lands_after_ten_seconds() {
        let mut detector = LandingDetector::new();
        let mut landed_at = None;
        for tick in 0..1200u16 {
            if detector.update(Tick(tick), 3.0) && landed_at.is_none() {
                landed_at = Some(tick);
            }
        }
        // the tenth bucket closes when the eleventh second starts
        assert_eq!(landed_at, Some(1000));
    }

    #[test]
    fn drifting_trace_never_lands() {
        let mut detector = LandingDetector::new();
        for tick in 0..3000u16 {
            // 4.5 m per 10 s
            let height = 100.0 - tick as f32 * 0.0045;
            assert!(!detector.update(Tick(tick), height));
        }
    }

    #[test]
    fn single_excursion_delays_landing() {
        let mut detector = LandingDetector::new();
        for tick in 0..1000u16 {
            let height = if tick == 500 { 8.0 } else { 0.0 };
            assert!(!detector.update(Tick(tick), height));
        }
        // bucket 5 leaves the window once bucket 15 completes
        let mut landed_at = None;
        for tick in 1000..2000u16 {
            if detector.update(Tick(tick), 0.0) && landed_at.is_none() {
                landed_at = Some(tick);
            }
        }
        assert_eq!(landed_at, Some(1600));
    }

    #[test]
    fn survives_tick_wrap() {
        let mut detector = LandingDetector::new();
        let mut tick = Tick(65_000);
        let mut landed = false;
        for _ in 0..1100 {
            landed = detector.update(tick, 1.0);
            tick = tick.next();
        }
        assert!(landed);
    }
}
