// Liquidity stability tracking
//
// The first sample only sets the baseline. After that, each sample whose
// liquidity moved less than `tolerance` (absolute, native units) from the
// previous one extends the stable streak; any larger move resets it.

/// What the sampler concluded after one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleVerdict {
    /// Keep sampling
    Pending { liquidity: f64, stable_count: u32 },
    /// Liquidity above the minimum and stable long enough
    Qualified { liquidity: f64 },
}

#[derive(Debug, Clone)]
pub struct LiquiditySampler {
    min_liquidity: f64,
    tolerance: f64,
    required_stable: u32,
    previous: Option<f64>,
    stable_count: u32,
}

impl LiquiditySampler {
    pub fn new(min_liquidity: f64, tolerance: f64, required_stable: u32) -> Self {
        Self {
            min_liquidity,
            tolerance,
            required_stable,
            previous: None,
            stable_count: 0,
        }
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn observe(&mut self, liquidity: f64) -> SampleVerdict {
        if let Some(previous) = self.previous {
            if (liquidity - previous).abs() < self.tolerance {
                self.stable_count += 1;
            } else {
                self.stable_count = 0;
            }
        }
        self.previous = Some(liquidity);

        if liquidity >= self.min_liquidity && self.stable_count >= self.required_stable {
            SampleVerdict::Qualified { liquidity }
        } else {
            SampleVerdict::Pending { liquidity, stable_count: self.stable_count }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifies_after_stable_streak() {
        let mut sampler = LiquiditySampler::new(50.0, 0.1, 3);
        assert!(matches!(sampler.observe(60.0), SampleVerdict::Pending { stable_count: 0, .. }));
        assert!(matches!(sampler.observe(60.05), SampleVerdict::Pending { stable_count: 1, .. }));
        assert!(matches!(sampler.observe(60.0), SampleVerdict::Pending { stable_count: 2, .. }));
        assert_eq!(sampler.observe(60.02), SampleVerdict::Qualified { liquidity: 60.02 });
    }

    #[test]
    fn test_jump_resets_streak() {
        let mut sampler = LiquiditySampler::new(50.0, 0.1, 3);
        sampler.observe(60.0);
        sampler.observe(60.0);
        sampler.observe(60.0);
        assert_eq!(sampler.stable_count(), 2);
        sampler.observe(75.0);
        assert_eq!(sampler.stable_count(), 0);
    }

    #[test]
    fn test_stable_but_too_small() {
        let mut sampler = LiquiditySampler::new(50.0, 0.1, 2);
        for _ in 0..10 {
            assert!(matches!(sampler.observe(10.0), SampleVerdict::Pending { .. }));
        }
        assert_eq!(sampler.stable_count(), 9);
    }

    #[test]
    fn test_change_equal_to_tolerance_is_not_stable() {
        let mut sampler = LiquiditySampler::new(0.0, 0.5, 1);
        sampler.observe(1.0);
        assert!(matches!(sampler.observe(1.5), SampleVerdict::Pending { stable_count: 0, .. }));
    }
}
