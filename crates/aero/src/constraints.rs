use simcore::{ExplicitComponent, PropulsionResult, require_finite, require_positive};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RpmConstraintInputs {
    /// rev/min
    pub rpm: f64,
    /// inch
    pub diameter: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RpmConstraintOutputs {
    /// Feasible when `<= 0`.
    pub rpm_con: f64,
}

/// Tip-speed proxy `rpm - limit / D`, with `limit` in rpm·inch.
#[derive(Debug, Clone, Copy)]
pub struct RpmConstraint {
    pub limit: f64,
}

impl Default for RpmConstraint {
    fn default() -> Self {
        RpmConstraint { limit: 150_000.0 }
    }
}

impl RpmConstraint {
    /// Highest rpm allowed for a propeller of `diameter` inches.
    pub fn max_rpm(&self, diameter: f64) -> f64 {
        self.limit / diameter
    }
}

impl ExplicitComponent for RpmConstraint {
    type Inputs = RpmConstraintInputs;
    type Outputs = RpmConstraintOutputs;

    fn check_domain(&self, inputs: &RpmConstraintInputs) -> PropulsionResult<()> {
        require_positive("D_prop", inputs.diameter)?;
        require_finite("rpm", inputs.rpm)
    }

    fn compute(&self, inputs: &RpmConstraintInputs) -> RpmConstraintOutputs {
        RpmConstraintOutputs {
            rpm_con: inputs.rpm - self.max_rpm(inputs.diameter),
        }
    }

    fn linearize(&self, inputs: &RpmConstraintInputs, seed: &RpmConstraintInputs) -> RpmConstraintOutputs {
        let d = inputs.diameter;
        RpmConstraintOutputs {
            rpm_con: seed.rpm + self.limit / (d * d) * seed.diameter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_on_the_boundary() {
        let con = RpmConstraint::default();
        for diameter in [12.0, 14.0, 23.0] {
            let out = con.compute(&RpmConstraintInputs {
                rpm: 150_000.0 / diameter,
                diameter,
            });
            assert_eq!(out.rpm_con, 0.0);
        }
    }

    #[test]
    fn test_sign() {
        let con = RpmConstraint::default();
        assert!(con.compute(&RpmConstraintInputs { rpm: 4899.0, diameter: 14.0 }).rpm_con < 0.0);
        assert!(con.compute(&RpmConstraintInputs { rpm: 12000.0, diameter: 14.0 }).rpm_con > 0.0);
    }

    #[test]
    fn test_tangent() {
        let con = RpmConstraint::default();
        let x = RpmConstraintInputs { rpm: 5000.0, diameter: 14.0 };
        let seed = RpmConstraintInputs { rpm: 1.0, diameter: 0.5 };
        let h = 1e-5;
        let plus = con.compute(&RpmConstraintInputs { rpm: x.rpm + h, diameter: x.diameter + 0.5 * h });
        let minus = con.compute(&RpmConstraintInputs { rpm: x.rpm - h, diameter: x.diameter - 0.5 * h });
        let fd = (plus.rpm_con - minus.rpm_con) / (2.0 * h);
        assert!((con.linearize(&x, &seed).rpm_con - fd).abs() < 1e-5);
    }
}
