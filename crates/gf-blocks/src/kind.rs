//! Block kinds and their declarative configuration.

use gf_core::{Real, MIN_TIME_RESOLUTION};
use serde::{Deserialize, Serialize};

use crate::error::{BlockError, BlockResult};

/// Output clamp configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputLimits {
    pub max: Real,
    pub min: Real,
    /// Hysteresis band for limit release; derived from the range when
    /// absent.
    #[serde(default)]
    pub reset_level: Option<Real>,
}

impl OutputLimits {
    pub fn symmetric(limit: Real) -> Self {
        Self {
            max: limit,
            min: -limit,
            reset_level: None,
        }
    }
}

/// Rate-of-change clamp configuration, differential outputs only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RampLimits {
    pub max: Real,
    pub min: Real,
}

/// Deadband thresholds around a center level, with optional ramp bands
/// that blend the output in and out instead of jumping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadbandConfig {
    pub high: Real,
    pub low: Real,
    #[serde(default)]
    pub level: Real,
    /// Width of the blend region entered when leaving the band; zero
    /// means a hard transition.
    #[serde(default)]
    pub ramp_up: Real,
    /// Width of the blend region entered when re-entering the band.
    #[serde(default)]
    pub ramp_down: Real,
    /// Release thresholds; default to just inside the band.
    #[serde(default)]
    pub reset_high: Option<Real>,
    #[serde(default)]
    pub reset_low: Option<Real>,
    /// Shifted output follows the input offset by the band width instead
    /// of reporting the excursion beyond the band.
    #[serde(default)]
    pub shifted: bool,
    #[serde(default = "default_db_tolerance")]
    pub tolerance: Real,
}

fn default_db_tolerance() -> Real {
    1e-6
}

impl DeadbandConfig {
    pub fn symmetric(band: Real) -> Self {
        Self {
            high: band,
            low: -band,
            level: 0.0,
            ramp_up: 0.0,
            ramp_down: 0.0,
            reset_high: None,
            reset_low: None,
            shifted: false,
            tolerance: default_db_tolerance(),
        }
    }
}

/// The closed set of transfer-function shapes a [`crate::Block`] can take.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    /// Direct feedthrough `K (u + bias)`; stateless unless limited.
    Gain,
    /// Pure integrator `K / s`, starting from `iv`.
    Integral { iv: Real },
    /// First-order lag `K / (1 + T1 s)`. Collapses to a feedthrough state
    /// when `t1` is below the minimum time resolution.
    Delay { t1: Real },
    /// Washout `K s / (1 + T1 s)`.
    Derivative { t1: Real },
    /// Washout followed by a first-order filter.
    FilteredDerivative { t1: Real, t2: Real },
    /// Lead-lag `K (1 + T2 s) / (1 + T1 s)`.
    LeadLag { t1: Real, t2: Real },
    /// Proportional-integral-derivative with a filtered derivative path;
    /// the derivative path disappears entirely when `d` is zero.
    Pid { p: Real, i: Real, d: Real, t1: Real },
    Deadband(DeadbandConfig),
}

impl BlockKind {
    pub fn delay(t1: Real) -> Self {
        Self::Delay { t1 }
    }

    pub fn lead_lag(t1: Real, t2: Real) -> Self {
        Self::LeadLag { t1, t2 }
    }

    pub fn pid(p: Real, i: Real, d: Real) -> Self {
        Self::Pid { p, i, d, t1: 0.01 }
    }

    /// Does the output live in the differential partition?
    pub fn differential_output(&self, simplified: bool) -> bool {
        match self {
            Self::Delay { .. } => !simplified,
            Self::Integral { .. } | Self::FilteredDerivative { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn validate(&self) -> BlockResult<()> {
        match *self {
            Self::Gain | Self::Integral { .. } => Ok(()),
            Self::Delay { t1 } => {
                if t1 < 0.0 || !t1.is_finite() {
                    Err(BlockError::config("delay t1 must be finite and non-negative"))
                } else {
                    Ok(())
                }
            }
            Self::Derivative { t1 } => {
                if t1 < MIN_TIME_RESOLUTION {
                    Err(BlockError::config("derivative t1 below minimum time resolution"))
                } else {
                    Ok(())
                }
            }
            Self::FilteredDerivative { t1, t2 } => {
                if t1 < MIN_TIME_RESOLUTION || t2 < MIN_TIME_RESOLUTION {
                    Err(BlockError::config(
                        "filtered derivative time constants below minimum time resolution",
                    ))
                } else {
                    Ok(())
                }
            }
            Self::LeadLag { t1, t2 } => {
                if t1 < MIN_TIME_RESOLUTION {
                    Err(BlockError::config("lead-lag t1 below minimum time resolution"))
                } else if t2 < 0.0 {
                    Err(BlockError::config("lead-lag t2 must be non-negative"))
                } else {
                    Ok(())
                }
            }
            Self::Pid { d, t1, .. } => {
                if d != 0.0 && t1 < MIN_TIME_RESOLUTION {
                    Err(BlockError::config(
                        "pid derivative filter t1 below minimum time resolution",
                    ))
                } else {
                    Ok(())
                }
            }
            Self::Deadband(db) => {
                if db.low >= db.high {
                    Err(BlockError::config("deadband low must be below deadband high"))
                } else if db.ramp_up < 0.0 || db.ramp_down < 0.0 {
                    Err(BlockError::config("deadband ramp bands must be non-negative"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Everything needed to build a [`crate::Block`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockConfig {
    #[serde(default = "default_block_name")]
    pub name: String,
    pub kind: BlockKind,
    #[serde(default = "default_gain")]
    pub gain: Real,
    #[serde(default)]
    pub bias: Real,
    #[serde(default)]
    pub limits: Option<OutputLimits>,
    #[serde(default)]
    pub ramp_limits: Option<RampLimits>,
    /// Track the input's time derivative instead of its value; only
    /// meaningful for kinds whose coupling supports it.
    #[serde(default)]
    pub differential_input: bool,
}

fn default_block_name() -> String {
    "block".to_string()
}

fn default_gain() -> Real {
    1.0
}

impl BlockConfig {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            name: default_block_name(),
            kind,
            gain: 1.0,
            bias: 0.0,
            limits: None,
            ramp_limits: None,
            differential_input: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_gain(mut self, gain: Real) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_bias(mut self, bias: Real) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_limits(mut self, min: Real, max: Real) -> Self {
        self.limits = Some(OutputLimits {
            max,
            min,
            reset_level: None,
        });
        self
    }

    pub fn with_ramp_limits(mut self, min: Real, max: Real) -> Self {
        self.ramp_limits = Some(RampLimits { max, min });
        self
    }
}
