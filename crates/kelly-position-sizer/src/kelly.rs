use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Kelly Criterion: f* = (p * b - q) / b
///
/// where p is the probability of winning, q = 1 - p and b the reward:risk
/// ratio. Negative values mean the bet has no edge.
pub fn kelly_fraction(p: f64, b: f64) -> f64 {
    let q = 1.0 - p;
    (p * b - q) / b
}

/// Fractional Kelly with hard bounds on the result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.5 = half-Kelly)
    pub multiplier: f64,
    /// Floor on the fraction of equity committed
    pub min_fraction: f64,
    /// Cap on the fraction of equity committed
    pub max_fraction: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.5,
            min_fraction: 0.02,
            max_fraction: 0.25,
        }
    }
}

impl KellyConfig {
    pub fn new(multiplier: f64, min_fraction: f64, max_fraction: f64) -> Result<Self> {
        if multiplier <= 0.0 || multiplier > 1.0 {
            bail!("kelly multiplier must be between 0 and 1");
        }
        if min_fraction < 0.0 || min_fraction > max_fraction {
            bail!("min_fraction must be >= 0 and <= max_fraction");
        }
        if max_fraction <= 0.0 || max_fraction > 1.0 {
            bail!("max_fraction must be between 0 and 1");
        }
        Ok(Self {
            multiplier,
            min_fraction,
            max_fraction,
        })
    }

    /// Quarter-Kelly with a lower ceiling
    pub fn conservative() -> Self {
        Self {
            multiplier: 0.25,
            min_fraction: 0.02,
            max_fraction: 0.15,
        }
    }

    /// Bounded fraction of equity for win probability `p` and ratio `b`.
    ///
    /// Always within `[min_fraction, max_fraction]`, including for NaN or
    /// out-of-range inputs.
    pub fn fraction(&self, p: f64, b: f64) -> f64 {
        if !(b.is_finite() && b > 0.0) || p.is_nan() {
            return self.min_fraction;
        }
        let p = p.clamp(0.0, 1.0);
        let scaled = kelly_fraction(p, b) * self.multiplier;
        scaled.clamp(self.min_fraction, self.max_fraction)
    }
}
