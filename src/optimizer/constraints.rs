use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Which load the grid connection limits are applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitBasis {
    /// Composite load after the PV credit
    #[default]
    Net,
    /// Composite load before the PV credit
    Gross,
}

/// Big-M linking the shifted amount to its on/off flag.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BigM {
    /// Largest shiftable amount of the horizon
    #[default]
    Derived,
    Fixed(f64),
}

/// Static, horizon-independent scheduling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    pub min_soc_percent: f64,
    pub max_soc_percent: f64,
    /// SOC every vehicle starts with and must leave with
    pub target_soc_percent: f64,
    /// Maximum shift distance in intervals, both directions
    pub shift_window: usize,
    /// Destination flexible load after receiving shifted load, relative to its own
    pub overload_factor: f64,
    /// Smallest shift that counts as "shifted" (kW)
    pub flag_epsilon_kw: f64,
    pub big_m: BigM,
    pub limit_basis: LimitBasis,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_soc_percent: 20.0,
            max_soc_percent: 100.0,
            target_soc_percent: 100.0,
            shift_window: 72,
            overload_factor: 1.5,
            flag_epsilon_kw: 1e-3,
            big_m: BigM::Derived,
            limit_basis: LimitBasis::Net,
        }
    }
}

impl Constraints {
    /// Validate constraints for consistency
    pub fn validate(&self) -> Result<(), InputError> {
        let finite = [
            ("min_soc_percent", self.min_soc_percent),
            ("max_soc_percent", self.max_soc_percent),
            ("target_soc_percent", self.target_soc_percent),
            ("overload_factor", self.overload_factor),
            ("flag_epsilon_kw", self.flag_epsilon_kw),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(InputError::invalid(name, format!("is not finite: {}", value)));
            }
        }

        if self.min_soc_percent < 0.0 || self.max_soc_percent > 100.0 {
            return Err(InputError::invalid("soc", "bounds must lie within 0..=100"));
        }
        if self.min_soc_percent > self.max_soc_percent {
            return Err(InputError::invalid("min_soc_percent", "must be <= max_soc_percent"));
        }
        if self.target_soc_percent < self.min_soc_percent || self.target_soc_percent > self.max_soc_percent {
            return Err(InputError::invalid(
                "target_soc_percent",
                "must lie between min_soc_percent and max_soc_percent",
            ));
        }
        if self.overload_factor < 1.0 {
            return Err(InputError::invalid("overload_factor", "must be >= 1.0"));
        }
        if self.flag_epsilon_kw <= 0.0 {
            return Err(InputError::invalid("flag_epsilon_kw", "must be positive"));
        }
        if let BigM::Fixed(m) = self.big_m {
            if !m.is_finite() || m < 0.0 {
                return Err(InputError::invalid("big_m", format!("must be a non-negative number, got {}", m)));
            }
        }
        Ok(())
    }

    /// Starting at a full battery means there is nothing to charge in the first interval.
    pub fn starts_full(&self) -> bool {
        self.target_soc_percent >= 100.0
    }

    /// Big-M for a horizon whose largest origin capacity is `max_shift_capacity`.
    ///
    /// A fixed value below that capacity would cap every shifted amount at
    /// big-M, so it is rejected.
    pub fn big_m_for(&self, max_shift_capacity: f64) -> Result<f64, InputError> {
        match self.big_m {
            BigM::Derived => Ok(max_shift_capacity),
            BigM::Fixed(m) if m < max_shift_capacity => Err(InputError::invalid(
                "big_m",
                format!("{} is below the largest shiftable amount {} kW", m, max_shift_capacity),
            )),
            BigM::Fixed(m) => Ok(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints_are_valid() {
        let constraints = Constraints::default();
        assert!(constraints.validate().is_ok());
        assert!(constraints.starts_full());
        assert_eq!(constraints.shift_window, 72);
    }

    #[test]
    fn test_validation_invalid_soc() {
        let mut constraints = Constraints::default();
        constraints.min_soc_percent = 110.0;
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_validation_target_outside_bounds() {
        let mut constraints = Constraints::default();
        constraints.max_soc_percent = 90.0;
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_validation_overload_factor() {
        let mut constraints = Constraints::default();
        constraints.overload_factor = 0.9;
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_big_m() {
        let mut constraints = Constraints::default();
        assert_eq!(constraints.big_m_for(7.5), Ok(7.5));
        constraints.big_m = BigM::Fixed(100.0);
        assert_eq!(constraints.big_m_for(7.5), Ok(100.0));
    }

    #[test]
    fn test_fixed_big_m_below_capacity_is_rejected() {
        let constraints = Constraints {
            big_m: BigM::Fixed(5.0),
            ..Constraints::default()
        };
        let err = constraints.big_m_for(7.5).unwrap_err();
        assert!(matches!(err, InputError::InvalidParameter { ref name, .. } if name == "big_m"));
        assert_eq!(constraints.big_m_for(5.0), Ok(5.0));
    }
}
