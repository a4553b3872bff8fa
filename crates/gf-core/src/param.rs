use crate::{ParamError, ParamResult, Real};

/// String-keyed runtime parameter surface.
///
/// Handlers return `Err(ParamError::UnknownParameter)` for keys they do
/// not own; container models forward those keys to their sub-models in
/// declared order, and only the outermost caller treats a still-unhandled
/// key as an error worth surfacing.
pub trait Parameterized {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult;

    fn set_flag(&mut self, name: &str, value: bool) -> ParamResult {
        let _ = value;
        Err(ParamError::unknown_flag(name))
    }

    /// Read a named parameter back, if this model recognizes it.
    fn param(&self, name: &str) -> Option<Real> {
        let _ = name;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gain {
        k: Real,
    }

    impl Parameterized for Gain {
        fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
            match name {
                "k" | "gain" => {
                    self.k = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            }
        }

        fn param(&self, name: &str) -> Option<Real> {
            match name {
                "k" | "gain" => Some(self.k),
                _ => None,
            }
        }
    }

    #[test]
    fn aliases_hit_the_same_field() {
        let mut g = Gain { k: 1.0 };
        g.set_param("gain", 2.5).unwrap();
        assert_eq!(g.param("k"), Some(2.5));
    }

    #[test]
    fn unknown_keys_are_reported_unhandled() {
        let mut g = Gain { k: 1.0 };
        let err = g.set_param("t1", 0.2).unwrap_err();
        assert!(err.is_unhandled());
        let err = g.set_flag("fast", true).unwrap_err();
        assert!(err.is_unhandled());
    }
}
