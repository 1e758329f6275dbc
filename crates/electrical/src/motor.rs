use serde::{Deserialize, Serialize};
use simcore::{ExplicitComponent, PropulsionResult, require_finite, require_positive};

/// Empirical correlations for one outrunner family:
/// `kv = kv_constant / (mass + kv_mass_offset)` and
/// `resistance = resistance_coefficient * idle_current^resistance_exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorFamily {
    /// rpm/V · kg
    pub kv_constant: f64,
    /// kg
    pub kv_mass_offset: f64,
    pub resistance_coefficient: f64,
    pub resistance_exponent: f64,
}

impl MotorFamily {
    pub fn scorpion() -> Self {
        MotorFamily {
            kv_constant: 1.3132 * 120.0,
            kv_mass_offset: 0.01,
            resistance_coefficient: 0.0467,
            resistance_exponent: -1.892,
        }
    }

    /// rpm/V, a function of mass alone
    pub fn kv(&self, mass: f64) -> f64 {
        self.kv_constant / (mass + self.kv_mass_offset)
    }

    pub fn kv_slope(&self, mass: f64) -> f64 {
        let denom = mass + self.kv_mass_offset;
        -self.kv_constant / (denom * denom)
    }

    /// Ω, a function of idle current alone
    pub fn resistance(&self, idle_current: f64) -> f64 {
        self.resistance_coefficient * idle_current.powf(self.resistance_exponent)
    }

    pub fn resistance_slope(&self, idle_current: f64) -> f64 {
        self.resistance_coefficient * self.resistance_exponent * idle_current.powf(self.resistance_exponent - 1.0)
    }
}

impl Default for MotorFamily {
    fn default() -> Self {
        MotorFamily::scorpion()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorInputs {
    /// kg
    pub mass: f64,
    /// A
    pub idle_current: f64,
    /// V from the ESC
    pub voltage_in: f64,
    /// A from the ESC
    pub current: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorOutputs {
    /// rpm/V
    pub kv: f64,
    /// Ω
    pub resistance: f64,
    /// rev/min
    pub rpm: f64,
    /// W, negative while consuming
    pub power: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Motor {
    pub family: MotorFamily,
}

impl Motor {
    pub fn new(family: MotorFamily) -> Self {
        Motor { family }
    }

    /// Voltage left to spin the shaft after the winding drop.
    pub fn shaft_voltage(&self, inputs: &MotorInputs) -> f64 {
        inputs.voltage_in - inputs.current * self.family.resistance(inputs.idle_current)
    }
}

impl ExplicitComponent for Motor {
    type Inputs = MotorInputs;
    type Outputs = MotorOutputs;

    fn check_domain(&self, inputs: &MotorInputs) -> PropulsionResult<()> {
        require_positive("motor_idle_current", inputs.idle_current)?;
        require_positive("motor_mass", inputs.mass)?;
        require_finite("motor_voltage_in", inputs.voltage_in)?;
        require_finite("motor_current", inputs.current)
    }

    fn compute(&self, inputs: &MotorInputs) -> MotorOutputs {
        let kv = self.family.kv(inputs.mass);
        let resistance = self.family.resistance(inputs.idle_current);
        let voltage_prop = inputs.voltage_in - inputs.current * resistance;
        MotorOutputs {
            kv,
            resistance,
            rpm: kv * voltage_prop,
            power: -inputs.current * inputs.current * resistance - inputs.idle_current * voltage_prop,
        }
    }

    fn linearize(&self, inputs: &MotorInputs, seed: &MotorInputs) -> MotorOutputs {
        let MotorInputs {
            mass,
            idle_current: i0,
            current: i,
            ..
        } = *inputs;
        let kv = self.family.kv(mass);
        let resistance = self.family.resistance(i0);
        let voltage_prop = self.shaft_voltage(inputs);

        let d_kv = self.family.kv_slope(mass) * seed.mass;
        let d_resistance = self.family.resistance_slope(i0) * seed.idle_current;
        let d_voltage_prop = seed.voltage_in - seed.current * resistance - i * d_resistance;

        MotorOutputs {
            kv: d_kv,
            resistance: d_resistance,
            rpm: d_kv * voltage_prop + kv * d_voltage_prop,
            power: -2.0 * i * seed.current * resistance - i * i * d_resistance
                - seed.idle_current * voltage_prop
                - i0 * d_voltage_prop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> MotorInputs {
        MotorInputs {
            mass: 0.5234,
            idle_current: 2.15,
            voltage_in: 15.6,
            current: 10.8,
        }
    }

    #[test]
    fn test_scorpion_correlations() {
        let family = MotorFamily::scorpion();
        assert!((family.kv(0.5234) - 157.584 / 0.5334).abs() < 1e-9);
        assert!((family.resistance(1.0) - 0.0467).abs() < 1e-15);
        assert!((family.resistance(2.15) - 0.0467 * 2.15f64.powf(-1.892)).abs() < 1e-15);
    }

    #[test]
    fn test_rpm_and_power() {
        let motor = Motor::default();
        let x = inputs();
        let out = motor.compute(&x);
        let vp = x.voltage_in - x.current * out.resistance;
        assert!((out.rpm - out.kv * vp).abs() < 1e-9);
        assert!((out.power - (-x.current * x.current * out.resistance - x.idle_current * vp)).abs() < 1e-9);
        assert!(out.power < 0.0);
    }

    #[test]
    fn test_domain() {
        let motor = Motor::default();
        assert!(motor.check_domain(&MotorInputs { idle_current: 0.0, ..inputs() }).is_err());
        assert!(motor.check_domain(&MotorInputs { mass: -0.001, ..inputs() }).is_err());
        assert!(motor.check_domain(&inputs()).is_ok());
    }

    #[test]
    fn test_tangent_matches_finite_difference() {
        let motor = Motor::default();
        let x = inputs();
        let seed = MotorInputs {
            mass: 0.3,
            idle_current: -0.5,
            voltage_in: 1.2,
            current: 0.9,
        };
        let h = 1e-7;
        let shift = |s: f64| MotorInputs {
            mass: x.mass + s * seed.mass,
            idle_current: x.idle_current + s * seed.idle_current,
            voltage_in: x.voltage_in + s * seed.voltage_in,
            current: x.current + s * seed.current,
        };
        let plus = motor.compute(&shift(h));
        let minus = motor.compute(&shift(-h));
        let tangent = motor.linearize(&x, &seed);

        let fd = |p: f64, m: f64| (p - m) / (2.0 * h);
        assert!((tangent.kv - fd(plus.kv, minus.kv)).abs() < 1e-4);
        assert!((tangent.resistance - fd(plus.resistance, minus.resistance)).abs() < 1e-7);
        assert!((tangent.rpm - fd(plus.rpm, minus.rpm)).abs() / tangent.rpm.abs() < 1e-6);
        assert!((tangent.power - fd(plus.power, minus.power)).abs() < 1e-4);
    }
}
