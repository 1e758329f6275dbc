use serde::{Deserialize, Serialize};
use simcore::{ExplicitComponent, PropulsionError, PropulsionResult, require_finite};

/// Fitted efficiency curve `efficiency = a * (1 - 1 / (1 + b * throttle^c))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for EscCoefficients {
    fn default() -> Self {
        EscCoefficients {
            a: 1.6054,
            b: 1.6519,
            c: 0.6455,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EscInputs {
    /// fraction in (0, 1]
    pub throttle: f64,
    /// V
    pub voltage_in: f64,
    /// A
    pub current_in: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EscOutputs {
    pub efficiency: f64,
    /// V
    pub voltage_out: f64,
    /// A
    pub current_out: f64,
    /// W, negative while dissipating
    pub power: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElectronicSpeedController {
    pub coefficients: EscCoefficients,
}

impl ElectronicSpeedController {
    pub fn new(coefficients: EscCoefficients) -> Self {
        ElectronicSpeedController { coefficients }
    }

    pub fn efficiency(&self, throttle: f64) -> f64 {
        let EscCoefficients { a, b, c } = self.coefficients;
        a * (1.0 - 1.0 / (1.0 + b * throttle.powf(c)))
    }

    /// d efficiency / d throttle
    pub fn efficiency_slope(&self, throttle: f64) -> f64 {
        let EscCoefficients { a, b, c } = self.coefficients;
        let denom = 1.0 + b * throttle.powf(c);
        a * b * c * throttle.powf(c - 1.0) / (denom * denom)
    }
}

impl ExplicitComponent for ElectronicSpeedController {
    type Inputs = EscInputs;
    type Outputs = EscOutputs;

    fn check_domain(&self, inputs: &EscInputs) -> PropulsionResult<()> {
        if !(inputs.throttle > 0.0 && inputs.throttle <= 1.0) {
            return Err(PropulsionError::DomainViolation {
                quantity: "throttle",
                value: inputs.throttle,
                requirement: "must lie in (0, 1]",
            });
        }
        require_finite("esc_voltage_in", inputs.voltage_in)?;
        require_finite("esc_current_in", inputs.current_in)
    }

    fn compute(&self, inputs: &EscInputs) -> EscOutputs {
        let efficiency = self.efficiency(inputs.throttle);
        EscOutputs {
            efficiency,
            voltage_out: inputs.voltage_in * inputs.throttle * efficiency,
            current_out: inputs.current_in / inputs.throttle,
            power: (efficiency - 1.0) * inputs.current_in * inputs.voltage_in,
        }
    }

    fn linearize(&self, inputs: &EscInputs, seed: &EscInputs) -> EscOutputs {
        let EscInputs {
            throttle: t,
            voltage_in: v,
            current_in: i,
        } = *inputs;
        let eff = self.efficiency(t);
        let d_eff = self.efficiency_slope(t) * seed.throttle;

        EscOutputs {
            efficiency: d_eff,
            voltage_out: seed.voltage_in * t * eff + v * seed.throttle * eff + v * t * d_eff,
            current_out: seed.current_in / t - i * seed.throttle / (t * t),
            power: d_eff * i * v + (eff - 1.0) * (seed.current_in * v + i * seed.voltage_in),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_throttle_efficiency() {
        let esc = ElectronicSpeedController::default();
        let expected = 1.6054 * (1.0 - 1.0 / (1.0 + 1.6519));
        assert!((esc.efficiency(1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_outputs_at_cruise_throttle() {
        let esc = ElectronicSpeedController::default();
        let out = esc.compute(&EscInputs {
            throttle: 0.8,
            voltage_in: 22.0,
            current_in: 8.0,
        });
        let eff = esc.efficiency(0.8);
        assert!((out.voltage_out - 22.0 * 0.8 * eff).abs() < 1e-12);
        assert!((out.current_out - 10.0).abs() < 1e-12);
        assert!((out.power - (eff - 1.0) * 8.0 * 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_throttle_domain() {
        let esc = ElectronicSpeedController::default();
        let at = |throttle| EscInputs {
            throttle,
            voltage_in: 22.0,
            current_in: 8.0,
        };
        assert!(esc.check_domain(&at(0.0)).is_err());
        assert!(esc.check_domain(&at(-0.2)).is_err());
        assert!(esc.check_domain(&at(1.2)).is_err());
        assert!(esc.check_domain(&at(f64::NAN)).is_err());
        assert!(esc.check_domain(&at(1.0)).is_ok());
    }

    #[test]
    fn test_tangent_matches_finite_difference() {
        let esc = ElectronicSpeedController::default();
        let x = EscInputs {
            throttle: 0.6,
            voltage_in: 21.5,
            current_in: 12.0,
        };
        let seed = EscInputs {
            throttle: 0.7,
            voltage_in: -0.4,
            current_in: 1.3,
        };
        let h = 1e-7;
        let shift = |s: f64| EscInputs {
            throttle: x.throttle + s * seed.throttle,
            voltage_in: x.voltage_in + s * seed.voltage_in,
            current_in: x.current_in + s * seed.current_in,
        };
        let plus = esc.compute(&shift(h));
        let minus = esc.compute(&shift(-h));
        let tangent = esc.linearize(&x, &seed);

        let fd = |p: f64, m: f64| (p - m) / (2.0 * h);
        assert!((tangent.efficiency - fd(plus.efficiency, minus.efficiency)).abs() < 1e-6);
        assert!((tangent.voltage_out - fd(plus.voltage_out, minus.voltage_out)).abs() < 1e-5);
        assert!((tangent.current_out - fd(plus.current_out, minus.current_out)).abs() < 1e-5);
        assert!((tangent.power - fd(plus.power, minus.power)).abs() < 1e-5);
    }
}
