//! Deadband state machine.
//!
//! The continuous output is a piecewise map of the (biased, pre-gain)
//! input chosen by a discrete stage: flat at `level` inside the band,
//! tracking the excursion outside it, with optional ramp regions that
//! blend between the two on the way out (`ramp_up`) and back in
//! (`ramp_down`), and an alternative shifted mode that follows the input
//! offset by the band width. Entry and exit use separate thresholds
//! (`high`/`low` vs `reset_high`/`reset_low`) so chattering inputs do not
//! flap the stage.

use gf_core::Real;
use gf_dae::ChangeCode;

use crate::kind::DeadbandConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbStage {
    Normal,
    RampUp,
    Outside,
    RampDown,
    Shifted,
}

#[derive(Clone, Debug)]
pub(crate) struct Deadband {
    high: Real,
    low: Real,
    level: Real,
    ramp_up: Real,
    ramp_down: Real,
    reset_high: Real,
    reset_low: Real,
    tolerance: Real,
    shifted: bool,
    stage: DbStage,
    triggered_high: bool,
}

impl Deadband {
    pub fn from_config(cfg: &DeadbandConfig) -> Self {
        Self {
            high: cfg.high,
            low: cfg.low,
            level: cfg.level,
            ramp_up: cfg.ramp_up,
            ramp_down: cfg.ramp_down,
            reset_high: cfg.reset_high.unwrap_or(cfg.high - 1e-6),
            reset_low: cfg.reset_low.unwrap_or(cfg.low + 1e-6),
            tolerance: cfg.tolerance,
            shifted: cfg.shifted,
            stage: DbStage::Normal,
            triggered_high: false,
        }
    }

    pub fn stage(&self) -> DbStage {
        self.stage
    }

    pub fn set_shifted(&mut self, shifted: bool) {
        self.shifted = shifted;
    }

    /// Collapse the release band on the low side, so the stage resets as
    /// soon as the input returns to the center level.
    pub fn suppress_down_deadband(&mut self) {
        self.reset_low = self.level;
        self.reset_high = self.level;
    }

    pub fn compute_value(&self, input: Real) -> Real {
        match self.stage {
            DbStage::Normal => self.level,
            DbStage::Outside => input,
            DbStage::Shifted => {
                if input > self.level {
                    input - (self.high - self.level)
                } else {
                    input + (self.level - self.low)
                }
            }
            DbStage::RampUp => self.ramp_value(input, self.ramp_up),
            DbStage::RampDown => self.ramp_value(input, self.ramp_down),
        }
    }

    fn ramp_value(&self, input: Real, band: Real) -> Real {
        if input > self.level {
            let tband = self.high - self.level + band;
            self.level + (input - self.high) / band * tband
        } else {
            let tband = self.level - self.low + band;
            self.level - (self.low - input) / band * tband
        }
    }

    pub fn dout_din(&self, input: Real) -> Real {
        match self.stage {
            DbStage::Normal => 0.0,
            DbStage::Outside | DbStage::Shifted => 1.0,
            DbStage::RampUp => self.ramp_slope(input, self.ramp_up),
            DbStage::RampDown => self.ramp_slope(input, self.ramp_down),
        }
    }

    fn ramp_slope(&self, input: Real, band: Real) -> Real {
        let tband = if input > self.level {
            self.high - self.level + band
        } else {
            self.level - self.low + band
        };
        tband / band
    }

    /// Event function; crosses zero when the stage should change.
    pub fn root(&self, input: Real) -> Real {
        let tol = self.tolerance;
        match self.stage {
            DbStage::Normal => (self.high - input).min(input - self.low),
            DbStage::Outside => {
                if self.triggered_high {
                    input - self.reset_high + tol
                } else {
                    self.reset_low - input + tol
                }
            }
            DbStage::Shifted => {
                if self.triggered_high {
                    input - self.high + tol
                } else {
                    self.low - input + tol
                }
            }
            DbStage::RampUp => {
                if self.triggered_high {
                    (self.high + self.ramp_up - input).min(input - self.high) + tol
                } else {
                    (self.low - input).min(input - self.low - self.ramp_up) + tol
                }
            }
            DbStage::RampDown => {
                if self.triggered_high {
                    (input - self.reset_high - self.ramp_down).min(self.reset_high - input) + tol
                } else {
                    (input - self.reset_low).min(self.reset_low + self.ramp_down - input) + tol
                }
            }
        }
    }

    fn leave_normal_stage(&self) -> DbStage {
        if self.shifted {
            DbStage::Shifted
        } else if self.ramp_up > 0.0 {
            DbStage::RampUp
        } else {
            DbStage::Outside
        }
    }

    fn enter(&mut self, stage: DbStage) {
        self.stage = stage;
        if stage == DbStage::Normal {
            self.triggered_high = false;
        }
    }

    /// Take exactly one transition for a fired root.
    pub fn trigger(&mut self, input: Real) {
        match self.stage {
            DbStage::Normal => {
                self.triggered_high = input >= self.high;
                self.enter(self.leave_normal_stage());
            }
            DbStage::Outside => {
                if self.ramp_down > 0.0 {
                    self.enter(DbStage::RampDown);
                } else {
                    self.enter(DbStage::Normal);
                }
            }
            DbStage::Shifted => self.enter(DbStage::Normal),
            DbStage::RampUp => {
                if input >= self.high + self.ramp_up || input <= self.low - self.ramp_up {
                    self.enter(DbStage::Outside);
                } else {
                    self.enter(DbStage::Normal);
                }
            }
            DbStage::RampDown => {
                if input >= self.reset_high || input <= self.reset_low {
                    self.enter(DbStage::Outside);
                } else {
                    self.enter(DbStage::Normal);
                }
            }
        }
    }

    /// Move to whatever stage the input calls for, repeating until stable.
    pub fn check(&mut self, input: Real) -> ChangeCode {
        let tol = self.tolerance;
        let before = self.stage;
        match self.stage {
            DbStage::Normal => {
                if (self.high - input).min(input - self.low) < -tol {
                    self.triggered_high = input >= self.high;
                    self.enter(self.leave_normal_stage());
                }
            }
            DbStage::Outside => {
                if self.triggered_high {
                    if input < self.reset_high {
                        if self.ramp_down > 0.0 && input >= self.reset_high - self.ramp_down {
                            self.enter(DbStage::RampDown);
                        } else {
                            self.enter(DbStage::Normal);
                        }
                    }
                } else if input > self.reset_low {
                    if self.ramp_down > 0.0 && input <= self.reset_low + self.ramp_down {
                        self.enter(DbStage::RampDown);
                    } else {
                        self.enter(DbStage::Normal);
                    }
                }
            }
            DbStage::Shifted => {
                if input < self.high - tol && input > self.low + tol {
                    self.enter(DbStage::Normal);
                }
            }
            DbStage::RampUp => {
                if self.triggered_high {
                    if input > self.high + self.ramp_up + tol {
                        self.enter(DbStage::Outside);
                    } else if input < self.high - tol {
                        self.enter(DbStage::Normal);
                    }
                } else if input < self.low - self.ramp_up - tol {
                    self.enter(DbStage::Outside);
                } else if input > self.low + tol {
                    self.enter(DbStage::Normal);
                }
            }
            DbStage::RampDown => {
                if self.triggered_high {
                    if input > self.high + self.ramp_down + tol {
                        self.enter(DbStage::Outside);
                    } else if input < self.high - tol {
                        self.enter(DbStage::Normal);
                    }
                } else if input < self.low - self.ramp_down - tol {
                    self.enter(DbStage::Outside);
                } else if input > self.low + tol {
                    self.enter(DbStage::Normal);
                }
            }
        }
        if self.stage != before {
            // intermediate stages may be skipped in one pass
            ChangeCode::ParameterChange.max(self.check(input))
        } else {
            ChangeCode::NoChange
        }
    }

    /// Choose the stage consistent with a desired (pre-gain) output and
    /// return the input that produces it.
    pub fn init_from_output(&mut self, desired: Real) -> Real {
        self.stage = DbStage::Normal;
        self.triggered_high = false;
        if (desired - self.level).abs() <= 1e-6 {
            return self.level;
        }
        self.triggered_high = desired > self.level;
        if self.shifted {
            self.stage = DbStage::Shifted;
            if desired > self.level {
                (self.high - self.level) + desired
            } else {
                desired - (self.level - self.low)
            }
        } else if desired > self.high + self.ramp_up || desired < self.low - self.ramp_up {
            self.stage = DbStage::Outside;
            desired
        } else if self.ramp_up > 0.0 {
            self.stage = DbStage::RampUp;
            if desired > self.level {
                self.high
                    + (desired - self.level) / (self.high + self.ramp_up - self.level)
                        * self.ramp_up
            } else {
                self.low
                    - (self.level - desired) / (self.level - self.low + self.ramp_up)
                        * self.ramp_up
            }
        } else {
            self.stage = DbStage::Outside;
            desired
        }
    }

    /// Choose the stage consistent with an initial input.
    pub fn init_from_input(&mut self, input: Real) {
        self.stage = DbStage::Normal;
        self.triggered_high = false;
        self.check(input);
    }
}
