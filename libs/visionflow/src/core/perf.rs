use std::time::{Duration, Instant};

/// Wall-clock capture accumulated across runs of a node or graph.
#[derive(Debug, Default, Clone)]
pub struct PerfCounter {
    beg: Option<Instant>,
    /// Duration of the most recent completed run.
    pub tmp: Duration,
    pub sum: Duration,
    pub min: Duration,
    pub max: Duration,
    pub num: u64,
}

impl PerfCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.beg = Some(Instant::now());
    }

    /// Fold the elapsed time since `start` into the running stats.
    /// Without a matching `start` this is a no-op.
    pub fn stop(&mut self) {
        let Some(beg) = self.beg.take() else { return };
        self.tmp = beg.elapsed();
        self.sum += self.tmp;
        self.num += 1;
        if self.num == 1 || self.tmp < self.min {
            self.min = self.tmp;
        }
        if self.tmp > self.max {
            self.max = self.tmp;
        }
    }

    pub fn avg(&self) -> Duration {
        if self.num == 0 {
            Duration::ZERO
        } else {
            self.sum / self.num as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_runs() {
        let mut p = PerfCounter::new();
        assert_eq!(p.avg(), Duration::ZERO);

        p.start();
        p.stop();
        p.start();
        p.stop();

        assert_eq!(p.num, 2);
        assert!(p.sum >= p.tmp);
        assert!(p.min <= p.max);
        assert!(p.avg() <= p.max);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let mut p = PerfCounter::new();
        p.stop();
        assert_eq!(p.num, 0);
    }
}
