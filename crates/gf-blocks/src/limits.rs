//! Output and ramp limiters with reset hysteresis.
//!
//! Both limiters are three-state machines (free, pinned at the upper
//! limit, pinned at the lower limit) that move exactly one transition per
//! activation change. While free, the limit-check function is positive
//! inside the limits; while pinned, it stays positive until the tracked
//! quantity backs off past the limit by `reset_level`, so engagement and
//! release are separate zero crossings.

use gf_core::Real;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Free,
    AtUpper,
    AtLower,
}

/// Clamps a value to `[min, max]` once the corresponding root fires.
#[derive(Clone, Debug)]
pub struct ValueLimiter {
    min: Real,
    max: Real,
    reset_level: Real,
    state: Activation,
}

impl ValueLimiter {
    pub fn new(min: Real, max: Real, reset_level: Real) -> Self {
        Self {
            min,
            max,
            reset_level,
            state: Activation::Free,
        }
    }

    pub fn set_reset_level(&mut self, level: Real) {
        self.reset_level = level;
    }

    pub fn is_active(&self) -> bool {
        self.state != Activation::Free
    }

    pub fn activation(&self) -> Activation {
        self.state
    }

    /// Event function: negative once the activation should change.
    pub fn limit_check(&self, val: Real) -> Real {
        match self.state {
            Activation::Free => (self.max - val).min(val - self.min),
            Activation::AtUpper => val - (self.max - self.reset_level),
            Activation::AtLower => (self.min + self.reset_level) - val,
        }
    }

    /// Take the one transition the current value calls for.
    pub fn change_activation(&mut self, val: Real) {
        self.state = match self.state {
            Activation::Free => {
                if val >= self.max {
                    Activation::AtUpper
                } else if val <= self.min {
                    Activation::AtLower
                } else {
                    Activation::Free
                }
            }
            Activation::AtUpper | Activation::AtLower => Activation::Free,
        };
    }

    pub fn output(&self, val: Real) -> Real {
        match self.state {
            Activation::Free => val,
            Activation::AtUpper => self.max,
            Activation::AtLower => self.min,
        }
    }

    /// Derivative of the limited output; zero while pinned.
    pub fn deriv(&self, rate: Real) -> Real {
        match self.state {
            Activation::Free => rate,
            _ => 0.0,
        }
    }

    pub fn dout_din(&self) -> Real {
        match self.state {
            Activation::Free => 1.0,
            _ => 0.0,
        }
    }

    pub fn clamp_output(&self, val: Real) -> Real {
        val.clamp(self.min, self.max)
    }
}

/// Limits the rate of change of a differential output.
#[derive(Clone, Debug)]
pub struct RampLimiter {
    min: Real,
    max: Real,
    reset_level: Real,
    state: Activation,
}

impl RampLimiter {
    pub fn new(min: Real, max: Real, reset_level: Real) -> Self {
        Self {
            min,
            max,
            reset_level,
            state: Activation::Free,
        }
    }

    pub fn set_reset_level(&mut self, level: Real) {
        self.reset_level = level;
    }

    pub fn is_active(&self) -> bool {
        self.state != Activation::Free
    }

    /// Event function on the unconstrained rate; negative once the
    /// activation should change.
    pub fn limit_check(&self, rate: Real) -> Real {
        match self.state {
            Activation::Free => (self.max - rate).min(rate - self.min),
            Activation::AtUpper => rate - (self.max - self.reset_level),
            Activation::AtLower => (self.min + self.reset_level) - rate,
        }
    }

    pub fn change_activation(&mut self, rate: Real) {
        self.state = match self.state {
            Activation::Free => {
                if rate >= self.max {
                    Activation::AtUpper
                } else if rate <= self.min {
                    Activation::AtLower
                } else {
                    Activation::Free
                }
            }
            Activation::AtUpper | Activation::AtLower => Activation::Free,
        };
    }

    pub fn output(&self, rate: Real) -> Real {
        match self.state {
            Activation::Free => rate,
            Activation::AtUpper => self.max,
            Activation::AtLower => self.min,
        }
    }

    pub fn dout_din(&self) -> Real {
        match self.state {
            Activation::Free => 1.0,
            _ => 0.0,
        }
    }

    pub fn clamp_ramp(&self, rate: Real) -> Real {
        rate.clamp(self.min, self.max)
    }
}

/// Default reset hysteresis: a thousandth of the limit range, or of the
/// one finite limit's magnitude.
pub fn default_reset_level(min: Real, max: Real) -> Real {
    if max.is_finite() {
        if min.is_finite() {
            (max - min) * 0.001
        } else {
            max.abs() * 0.001
        }
    } else if min.is_finite() {
        min.abs() * 0.001
    } else {
        0.001
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_limiter_engages_and_releases_with_hysteresis() {
        let mut vl = ValueLimiter::new(-1.0, 1.0, 0.1);
        assert!(vl.limit_check(0.5) > 0.0);
        assert!(vl.limit_check(1.2) < 0.0);
        vl.change_activation(1.2);
        assert!(vl.is_active());
        assert_eq!(vl.output(1.2), 1.0);
        assert_eq!(vl.deriv(3.0), 0.0);
        assert_eq!(vl.dout_din(), 0.0);

        // still above max - reset: stays pinned
        assert!(vl.limit_check(0.95) > 0.0);
        // backed off past the reset band: release root fires
        assert!(vl.limit_check(0.85) < 0.0);
        vl.change_activation(0.85);
        assert!(!vl.is_active());
        assert_eq!(vl.output(0.85), 0.85);
    }

    #[test]
    fn value_limiter_takes_one_transition_at_a_time() {
        let mut vl = ValueLimiter::new(-1.0, 1.0, 0.1);
        vl.change_activation(-2.0);
        assert_eq!(vl.activation(), Activation::AtLower);
        // even a value far above max first releases, then re-engages
        vl.change_activation(5.0);
        assert_eq!(vl.activation(), Activation::Free);
        vl.change_activation(5.0);
        assert_eq!(vl.activation(), Activation::AtUpper);
    }

    #[test]
    fn ramp_limiter_pins_the_rate() {
        let mut rl = RampLimiter::new(-0.5, 0.5, 0.01);
        assert_eq!(rl.output(0.3), 0.3);
        assert!(rl.limit_check(0.7) < 0.0);
        rl.change_activation(0.7);
        assert!(rl.is_active());
        assert_eq!(rl.output(0.7), 0.5);
        assert_eq!(rl.clamp_ramp(0.7), 0.5);
        assert!(rl.limit_check(0.48) < 0.0);
        rl.change_activation(0.48);
        assert_eq!(rl.output(0.48), 0.48);
    }

    #[test]
    fn default_reset_scales_with_the_range() {
        assert!((default_reset_level(-1.0, 1.0) - 0.002).abs() < 1e-12);
        assert!((default_reset_level(Real::NEG_INFINITY, 2.0) - 0.002).abs() < 1e-12);
        assert!((default_reset_level(-4.0, Real::INFINITY) - 0.004).abs() < 1e-12);
        assert!((default_reset_level(Real::NEG_INFINITY, Real::INFINITY) - 0.001).abs() < 1e-12);
    }
}
